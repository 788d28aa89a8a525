use std::sync::{Arc, Mutex};

use axum::Router;
use serde_json::{json, Value};
use shared::{
    domain::{Role, UserId},
    protocol::UserRecord,
};
use tokio::net::TcpListener;

use crate::{Navigator, Notifier, Route};

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    entries: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("notifier lock").clone()
    }

    pub(crate) fn has_error_containing(&self, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.starts_with("error: ") && entry.contains(needle))
    }

    pub(crate) fn has_success_containing(&self, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.starts_with("success: ") && entry.contains(needle))
    }

    fn record(&self, entry: String) {
        self.entries.lock().expect("notifier lock").push(entry);
    }
}

impl Notifier for RecordingNotifier {
    fn loading(&self, message: &str) {
        self.record(format!("loading: {message}"));
    }

    fn dismiss(&self) {
        self.record("dismiss".to_string());
    }

    fn success(&self, message: &str) {
        self.record(format!("success: {message}"));
    }

    fn error(&self, message: &str) {
        self.record(format!("error: {message}"));
    }
}

#[derive(Default)]
pub(crate) struct RecordingNavigator {
    routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn routes(&self) -> Vec<Route> {
        self.routes.lock().expect("navigator lock").clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        self.routes.lock().expect("navigator lock").push(route);
    }
}

pub(crate) async fn spawn_backend(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

pub(crate) fn user_with_role(role: Role) -> UserRecord {
    UserRecord {
        id: UserId(7),
        name: "Alice".to_string(),
        username: "alice".to_string(),
        email: "a@x.com".to_string(),
        role,
        is_admin_flag: role == Role::Admin,
    }
}

pub(crate) fn user_json(role: &str) -> Value {
    json!({
        "id": 7,
        "name": "Alice",
        "username": "alice",
        "email": "a@x.com",
        "role": role,
        "is_admin": role == "admin",
    })
}
