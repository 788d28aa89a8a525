use super::*;
use crate::test_support::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;

fn session_with(
    base_url: String,
    store: Arc<MemoryTokenStore>,
    notifier: Arc<RecordingNotifier>,
    navigator: Arc<RecordingNavigator>,
) -> Arc<AuthSession> {
    AuthSession::new_with_dependencies(base_url, store, notifier, navigator)
}

#[tokio::test]
async fn login_success_routes_student_to_dashboard() {
    let app = Router::new()
        .route(
            "/login",
            post(|| async { Json(json!({"access_token": "tok-1"})) }),
        )
        .route("/current_user", get(|| async { Json(user_json("student")) }));
    let base_url = spawn_backend(app).await;

    let store = Arc::new(MemoryTokenStore::default());
    let notifier = RecordingNotifier::new();
    let navigator = RecordingNavigator::new();
    let session = session_with(base_url, store.clone(), notifier.clone(), navigator.clone());

    let user = session
        .login("a@x.com", "pw", Role::Student)
        .await
        .expect("login");

    assert_eq!(user.role, Role::Student);
    assert_eq!(session.phase().await, AuthPhase::Authenticated);
    assert_eq!(navigator.routes(), vec![Route::Dashboard]);
    assert_eq!(
        TokenStore::load_token(store.as_ref()).await.expect("load"),
        Some("tok-1".to_string())
    );
    assert!(notifier.has_success_containing("Successfully Logged in!"));
}

#[tokio::test]
async fn login_routes_admin_to_instructor_management() {
    let app = Router::new()
        .route(
            "/login",
            post(|| async { Json(json!({"access_token": "tok-adm"})) }),
        )
        .route("/current_user", get(|| async { Json(user_json("admin")) }));
    let base_url = spawn_backend(app).await;

    let navigator = RecordingNavigator::new();
    let session = session_with(
        base_url,
        Arc::new(MemoryTokenStore::default()),
        RecordingNotifier::new(),
        navigator.clone(),
    );

    session
        .login("root@x.com", "pw", Role::Admin)
        .await
        .expect("login");

    assert_eq!(navigator.routes(), vec![Route::ManageInstructors]);
}

#[tokio::test]
async fn login_without_valid_profile_stays_anonymous() {
    // The token is issued, but the follow-up profile fetch yields no
    // identity; the session must not retain the token as authenticated.
    let app = Router::new()
        .route(
            "/login",
            post(|| async { Json(json!({"access_token": "tok-bad"})) }),
        )
        .route(
            "/current_user",
            get(|| async { Json(json!({"error": "User not found"})) }),
        );
    let base_url = spawn_backend(app).await;

    let store = Arc::new(MemoryTokenStore::default());
    let session = session_with(
        base_url,
        store.clone(),
        RecordingNotifier::new(),
        RecordingNavigator::new(),
    );

    let err = session
        .login("ghost@x.com", "pw", Role::Student)
        .await
        .expect_err("must fail");

    assert!(matches!(err, ClientError::Api(_)));
    assert_eq!(session.phase().await, AuthPhase::Anonymous);
    assert_eq!(session.bearer_token().await, None);
    assert_eq!(session.current_user().await, None);
    assert_eq!(TokenStore::load_token(store.as_ref()).await.expect("load"), None);
}

#[tokio::test]
async fn login_failure_surfaces_server_error_message() {
    let app = Router::new().route(
        "/login",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Incorrect password"})),
            )
        }),
    );
    let base_url = spawn_backend(app).await;

    let notifier = RecordingNotifier::new();
    let session = session_with(
        base_url,
        Arc::new(MemoryTokenStore::default()),
        notifier.clone(),
        RecordingNavigator::new(),
    );

    let err = session
        .login("a@x.com", "wrong", Role::Student)
        .await
        .expect_err("must fail");

    assert!(matches!(err, ClientError::Api(_)));
    assert!(notifier.has_error_containing("Incorrect password"));
    assert_eq!(session.phase().await, AuthPhase::Anonymous);
}

#[tokio::test]
async fn register_rejects_empty_fields_without_network_call() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = hits.clone();
    let app = Router::new().route(
        "/users",
        post(move || {
            let hits = hits_handler.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(json!({"msg": "User registered successfully."}))
            }
        }),
    );
    let base_url = spawn_backend(app).await;

    let notifier = RecordingNotifier::new();
    let session = session_with(
        base_url,
        Arc::new(MemoryTokenStore::default()),
        notifier.clone(),
        RecordingNavigator::new(),
    );

    let err = session
        .register("Alice", "", "a@x.com", "pw", Role::Student)
        .await
        .expect_err("must fail");

    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(notifier.has_error_containing("All fields are required!"));
}

#[tokio::test]
async fn register_success_navigates_to_login() {
    let app = Router::new().route(
        "/users",
        post(|| async {
            (
                StatusCode::CREATED,
                Json(json!({"msg": "User registered successfully."})),
            )
        }),
    );
    let base_url = spawn_backend(app).await;

    let notifier = RecordingNotifier::new();
    let navigator = RecordingNavigator::new();
    let session = session_with(
        base_url,
        Arc::new(MemoryTokenStore::default()),
        notifier.clone(),
        navigator.clone(),
    );

    session
        .register("Alice", "alice", "a@x.com", "pw", Role::Student)
        .await
        .expect("register");

    assert_eq!(navigator.routes(), vec![Route::Login]);
    assert!(notifier.has_success_containing("User registered successfully."));
}

#[tokio::test]
async fn restore_revalidates_persisted_token() {
    let app = Router::new().route("/current_user", get(|| async { Json(user_json("student")) }));
    let base_url = spawn_backend(app).await;

    let store = Arc::new(MemoryTokenStore::default());
    TokenStore::save_token(store.as_ref(), "persisted-tok")
        .await
        .expect("seed");

    let session = session_with(
        base_url,
        store,
        RecordingNotifier::new(),
        RecordingNavigator::new(),
    );

    let user = session.restore().await.expect("restored identity");
    assert_eq!(user.username, "alice");
    assert_eq!(session.phase().await, AuthPhase::Authenticated);
    assert_eq!(session.bearer_token().await, Some("persisted-tok".to_string()));
}

#[tokio::test]
async fn restore_with_rejected_token_forces_logout() {
    let app = Router::new().route(
        "/current_user",
        get(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"msg": "Token has been revoked"})),
            )
        }),
    );
    let base_url = spawn_backend(app).await;

    let store = Arc::new(MemoryTokenStore::default());
    TokenStore::save_token(store.as_ref(), "stale-tok")
        .await
        .expect("seed");

    let notifier = RecordingNotifier::new();
    let navigator = RecordingNavigator::new();
    let session = session_with(base_url, store.clone(), notifier.clone(), navigator.clone());

    assert_eq!(session.restore().await, None);
    assert_eq!(session.phase().await, AuthPhase::Anonymous);
    assert_eq!(TokenStore::load_token(store.as_ref()).await.expect("load"), None);
    assert_eq!(navigator.routes(), vec![Route::Login]);
    assert!(notifier.has_error_containing("Session expired. Please log in again."));
}

#[tokio::test]
async fn update_profile_merges_patch_into_memory() {
    let app = Router::new().route(
        "/users/:id",
        patch(|| async { Json(json!({"msg": "User updated"})) }),
    );
    let base_url = spawn_backend(app).await;

    let session = session_with(
        base_url,
        Arc::new(MemoryTokenStore::default()),
        RecordingNotifier::new(),
        RecordingNavigator::new(),
    );
    session
        .force_authenticated("tok", user_with_role(Role::Student))
        .await;

    session
        .update_profile(
            UserId(7),
            ProfileUpdate {
                username: Some("alice2".to_string()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .expect("update");

    let user = session.current_user().await.expect("user");
    assert_eq!(user.username, "alice2");
    assert_eq!(user.email, "a@x.com");
}

#[tokio::test]
async fn logout_clears_session_and_store() {
    let app = Router::new();
    let base_url = spawn_backend(app).await;

    let store = Arc::new(MemoryTokenStore::default());
    let navigator = RecordingNavigator::new();
    let session = session_with(
        base_url,
        store.clone(),
        RecordingNotifier::new(),
        navigator.clone(),
    );
    session
        .force_authenticated("tok", user_with_role(Role::Student))
        .await;
    TokenStore::save_token(store.as_ref(), "tok")
        .await
        .expect("seed");

    session.logout().await;

    assert_eq!(session.phase().await, AuthPhase::Anonymous);
    assert_eq!(session.bearer_token().await, None);
    assert_eq!(session.current_user().await, None);
    assert_eq!(TokenStore::load_token(store.as_ref()).await.expect("load"), None);
    assert_eq!(navigator.routes(), vec![Route::Login]);
}

#[tokio::test]
async fn revocation_report_from_any_manager_forces_logout() {
    let app = Router::new();
    let base_url = spawn_backend(app).await;

    let session = session_with(
        base_url,
        Arc::new(MemoryTokenStore::default()),
        RecordingNotifier::new(),
        RecordingNavigator::new(),
    );
    session
        .force_authenticated("tok", user_with_role(Role::Student))
        .await;

    let mut events = session.subscribe_events();
    session.revocation_reporter().report();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timely")
        .expect("event");
    assert!(matches!(event, SessionEvent::TokenRevoked));
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timely")
        .expect("event");
    assert!(matches!(event, SessionEvent::LoggedOut));

    assert_eq!(session.phase().await, AuthPhase::Anonymous);
    assert_eq!(session.current_user().await, None);
}

#[test]
fn admin_predicate_follows_role_not_wire_flag() {
    let mut user = user_with_role(Role::Student);
    user.is_admin_flag = true;
    assert!(!user.is_admin());

    let admin = user_with_role(Role::Admin);
    assert!(admin.is_admin());
}
