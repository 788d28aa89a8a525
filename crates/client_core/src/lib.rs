use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use session_store::SessionStore;
use shared::{
    domain::{Role, UserId},
    error::ApiFailure,
    protocol::{LoginRequest, LoginResponse, ProfileUpdate, RegisterRequest, UserRecord, UserSummary},
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

pub mod courses;
pub mod enrollments;
pub mod error;

pub use error::ClientError;

/// Where a completed auth action sends the user. The view layer decides
/// what each route looks like; the session only picks the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Dashboard,
    ManageInstructors,
}

/// Transient notification surface (the toast stack of the original
/// client). `loading` starts an in-progress indicator that stays up
/// until `dismiss`, then a `success` or `error` replaces it.
pub trait Notifier: Send + Sync {
    fn loading(&self, message: &str);
    fn dismiss(&self);
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default notifier: routes everything through tracing.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn loading(&self, message: &str) {
        info!("{message}");
    }

    fn dismiss(&self) {}

    fn success(&self, message: &str) {
        info!("{message}");
    }

    fn error(&self, message: &str) {
        warn!("{message}");
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn navigate(&self, _route: Route) {}
}

/// Durable home for the bearer token across restarts of the client
/// process. Single writer: only [`AuthSession`] touches it.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load_token(&self) -> Result<Option<String>>;
    async fn save_token(&self, token: &str) -> Result<()>;
    async fn clear_token(&self) -> Result<()>;
}

#[async_trait]
impl TokenStore for SessionStore {
    async fn load_token(&self) -> Result<Option<String>> {
        SessionStore::load_token(self).await
    }

    async fn save_token(&self, token: &str) -> Result<()> {
        SessionStore::save_token(self, token).await
    }

    async fn clear_token(&self) -> Result<()> {
        SessionStore::clear_token(self).await
    }
}

/// In-memory token store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load_token(&self) -> Result<Option<String>> {
        Ok(self.token.lock().await.clone())
    }

    async fn save_token(&self, token: &str) -> Result<()> {
        *self.token.lock().await = Some(token.to_string());
        Ok(())
    }

    async fn clear_token(&self) -> Result<()> {
        *self.token.lock().await = None;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A token was validated against the profile endpoint; resource
    /// managers refresh their collections on this.
    Authenticated { user: UserRecord },
    /// The server signalled revocation of the held token.
    TokenRevoked,
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// Handle resource managers use to flag a revoked token. Reports are
/// consumed by a task owned by the session, which runs the one forced
/// logout path; managers never clear session state themselves.
#[derive(Clone)]
pub struct RevocationReporter {
    tx: mpsc::UnboundedSender<()>,
}

impl RevocationReporter {
    pub fn report(&self) {
        let _ = self.tx.send(());
    }
}

/// Maps a non-success payload to a [`ClientError`], routing the revoked
/// token signal onto the revocation channel instead of surfacing it as
/// a generic failure.
pub(crate) fn classify_failure(
    revocations: &RevocationReporter,
    failure: ApiFailure,
    fallback: &str,
) -> ClientError {
    if failure.is_token_revoked() {
        revocations.report();
        return ClientError::TokenRevoked;
    }
    ClientError::api_or(failure.message(), fallback)
}

struct SessionState {
    phase: AuthPhase,
    token: Option<String>,
    user: Option<UserRecord>,
}

/// Owner of the login/logout/registration flows and the authenticated
/// identity. The session is constructed once and injected into every
/// resource manager; the bearer token has no other writer.
///
/// State machine: `Anonymous → Authenticating → Authenticated →
/// Anonymous`. A held token without a validated user is `Anonymous`
/// for every call site.
pub struct AuthSession {
    http: Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    revocations: mpsc::UnboundedSender<()>,
}

impl AuthSession {
    pub fn new(base_url: impl Into<String>, store: Arc<dyn TokenStore>) -> Arc<Self> {
        Self::new_with_dependencies(
            base_url,
            store,
            Arc::new(TracingNotifier),
            Arc::new(NoopNavigator),
        )
    }

    pub fn new_with_dependencies(
        base_url: impl Into<String>,
        store: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (revocations, mut revocation_reports) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            http: Client::new(),
            base_url: base_url.into(),
            store,
            notifier,
            navigator,
            inner: Mutex::new(SessionState {
                phase: AuthPhase::Anonymous,
                token: None,
                user: None,
            }),
            events,
            revocations,
        });

        let weak = Arc::downgrade(&session);
        tokio::spawn(async move {
            while revocation_reports.recv().await.is_some() {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.handle_revoked_token().await;
            }
        });

        session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn revocation_reporter(&self) -> RevocationReporter {
        RevocationReporter {
            tx: self.revocations.clone(),
        }
    }

    pub async fn phase(&self) -> AuthPhase {
        self.inner.lock().await.phase
    }

    pub async fn bearer_token(&self) -> Option<String> {
        self.inner.lock().await.token.clone()
    }

    pub async fn current_user(&self) -> Option<UserRecord> {
        self.inner.lock().await.user.clone()
    }

    pub async fn require_token(&self) -> Result<String, ClientError> {
        self.bearer_token()
            .await
            .ok_or(ClientError::NotAuthenticated)
    }

    /// Authenticates against `/login`, then validates the returned token
    /// against `/current_user`. A token whose follow-up profile fetch
    /// does not yield a valid identity is discarded entirely; the
    /// session never retains a token as authenticated without a user.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<UserRecord, ClientError> {
        self.notifier.loading("Logging you in ...");
        {
            let mut state = self.inner.lock().await;
            state.phase = AuthPhase::Authenticating;
            state.user = None;
        }

        match self.login_flow(email, password, role).await {
            Ok(user) => Ok(user),
            Err(err) => {
                self.clear_session().await;
                self.notifier.dismiss();
                self.notifier.error(&err.notification());
                Err(err)
            }
        }
    }

    async fn login_flow(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<UserRecord, ClientError> {
        let response = self
            .http
            .post(format!("{}/login", self.base_url))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
                role,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            return Err(ClientError::api_or(failure.message(), "Failed to login"));
        }

        let body: LoginResponse = response.json().await?;
        let Some(token) = body.access_token else {
            return Err(ClientError::api("Failed to login"));
        };

        if let Err(err) = self.store.save_token(&token).await {
            warn!("failed to persist bearer token: {err:#}");
        }
        {
            let mut state = self.inner.lock().await;
            state.token = Some(token.clone());
        }

        let Some(user) = self.fetch_profile(&token).await else {
            return Err(ClientError::api("Failed to login"));
        };

        {
            let mut state = self.inner.lock().await;
            state.user = Some(user.clone());
            state.phase = AuthPhase::Authenticated;
        }

        self.notifier.dismiss();
        self.notifier.success("Successfully Logged in!");
        let _ = self.events.send(SessionEvent::Authenticated { user: user.clone() });
        self.navigator.navigate(if user.is_admin() {
            Route::ManageInstructors
        } else {
            Route::Dashboard
        });

        info!(user_id = user.id.0, role = %user.role, "session authenticated");
        Ok(user)
    }

    /// User-initiated logout. Clears token and user unconditionally.
    pub async fn logout(&self) {
        self.notifier.loading("Logging out...");
        self.clear_session().await;
        self.notifier.dismiss();
        self.notifier.success("Successfully logged out");
        self.navigator.navigate(Route::Login);
        let _ = self.events.send(SessionEvent::LoggedOut);
    }

    /// Revalidates any held token against the profile endpoint; a
    /// response without a valid identity forces logout. Runs whenever
    /// the token value changes, including at startup via [`restore`].
    ///
    /// [`restore`]: AuthSession::restore
    pub async fn fetch_current_user(&self) {
        let token = self.bearer_token().await;
        let Some(token) = token else {
            return;
        };

        match self.fetch_profile(&token).await {
            Some(user) => {
                {
                    let mut state = self.inner.lock().await;
                    state.user = Some(user.clone());
                    state.phase = AuthPhase::Authenticated;
                }
                let _ = self.events.send(SessionEvent::Authenticated { user });
            }
            None => {
                warn!("held token failed revalidation; forcing logout");
                self.force_logout("Session expired. Please log in again.")
                    .await;
            }
        }
    }

    /// Startup path: pick up a persisted token and revalidate it.
    pub async fn restore(&self) -> Option<UserRecord> {
        let stored = match self.store.load_token().await {
            Ok(stored) => stored,
            Err(err) => {
                warn!("failed to read persisted token: {err:#}");
                None
            }
        };
        let token = stored?;

        {
            let mut state = self.inner.lock().await;
            state.phase = AuthPhase::Authenticating;
            state.token = Some(token);
        }
        self.fetch_current_user().await;
        self.current_user().await
    }

    /// Registers a new account. All fields must be non-empty; the check
    /// runs before any network call.
    pub async fn register(
        &self,
        name: &str,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<(), ClientError> {
        if [name, username, email, password]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            self.notifier.error("All fields are required!");
            return Err(ClientError::Validation("all fields are required".into()));
        }

        self.notifier.loading("Registering...");
        let response = self
            .http
            .post(format!("{}/users", self.base_url))
            .json(&RegisterRequest {
                name: name.trim().to_string(),
                username: username.trim().to_string(),
                email: email.trim().to_string(),
                password: password.trim().to_string(),
                role,
            })
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.notifier.dismiss();
                let err = ClientError::from(err);
                self.notifier.error(&err.notification());
                return Err(err);
            }
        };

        let status = response.status();
        let body: ApiFailure = response.json().await.unwrap_or_default();
        self.notifier.dismiss();

        if status.is_success() {
            self.notifier
                .success(body.message().unwrap_or("Registration successful!"));
            self.navigator.navigate(Route::Login);
            Ok(())
        } else {
            let err =
                ClientError::api_or(body.message(), "Registration failed. Please try again.");
            self.notifier.error(&err.notification());
            Err(err)
        }
    }

    /// Partial profile update. On success the patch is merged into the
    /// in-memory user without a re-fetch; this is an intentional
    /// optimistic merge, not a guaranteed-consistent read.
    pub async fn update_profile(
        &self,
        user_id: UserId,
        patch: ProfileUpdate,
    ) -> Result<(), ClientError> {
        let token = self.require_token().await?;
        self.notifier.loading("Updating profile...");

        let response = self
            .http
            .patch(format!("{}/users/{}", self.base_url, user_id.0))
            .bearer_auth(&token)
            .json(&patch)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.notifier.dismiss();
                let err = ClientError::from(err);
                self.notifier.error(&err.notification());
                return Err(err);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            self.notifier.dismiss();
            let err = classify_failure(
                &self.revocation_reporter(),
                failure,
                "Failed to update profile.",
            );
            if !matches!(err, ClientError::TokenRevoked) {
                self.notifier.error(&err.notification());
            }
            return Err(err);
        }

        {
            let mut state = self.inner.lock().await;
            if let Some(user) = state.user.as_mut() {
                if let Some(username) = &patch.username {
                    user.username = username.clone();
                }
                if let Some(email) = &patch.email {
                    user.email = email.clone();
                }
            }
        }
        self.notifier.dismiss();
        self.notifier.success("Profile updated successfully!");
        Ok(())
    }

    /// Full user directory (`GET /users`, admin-gated server-side).
    /// Role filtering happens at the call site, as the original
    /// management views did.
    pub async fn list_users(&self) -> Result<Vec<UserSummary>, ClientError> {
        let token = self.require_token().await?;
        let response = self
            .http
            .get(format!("{}/users", self.base_url))
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            return Err(classify_failure(
                &self.revocation_reporter(),
                failure,
                "Failed to load users.",
            ));
        }

        Ok(response.json().await?)
    }

    pub async fn delete_user(&self, user_id: UserId) -> Result<(), ClientError> {
        let token = self.require_token().await?;
        self.notifier.loading("Deleting user...");
        let response = self
            .http
            .delete(format!("{}/users/{}", self.base_url, user_id.0))
            .bearer_auth(&token)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.notifier.dismiss();
                let err = ClientError::from(err);
                self.notifier.error(&err.notification());
                return Err(err);
            }
        };

        self.notifier.dismiss();
        if response.status().is_success() {
            self.notifier.success("User deleted successfully!");
            Ok(())
        } else {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            let err = classify_failure(
                &self.revocation_reporter(),
                failure,
                "Failed to delete user.",
            );
            if !matches!(err, ClientError::TokenRevoked) {
                self.notifier.error(&err.notification());
            }
            Err(err)
        }
    }

    async fn fetch_profile(&self, token: &str) -> Option<UserRecord> {
        let response = self
            .http
            .get(format!("{}/current_user", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .ok()?;
        let user = response.json::<UserRecord>().await.ok()?;
        if user.email.is_empty() {
            return None;
        }
        Some(user)
    }

    /// Clears token and user atomically, then the store. The session
    /// invariant lives here: a user is never retained past its token.
    async fn clear_session(&self) {
        {
            let mut state = self.inner.lock().await;
            state.phase = AuthPhase::Anonymous;
            state.token = None;
            state.user = None;
        }
        if let Err(err) = self.store.clear_token().await {
            warn!("failed to clear persisted token: {err:#}");
        }
    }

    /// The single forced-logout path, shared by failed revalidation and
    /// revocation reports from any manager.
    async fn force_logout(&self, message: &str) {
        self.clear_session().await;
        self.notifier.error(message);
        self.navigator.navigate(Route::Login);
        let _ = self.events.send(SessionEvent::LoggedOut);
    }

    async fn handle_revoked_token(&self) {
        warn!("bearer token revoked by server; forcing logout");
        let _ = self.events.send(SessionEvent::TokenRevoked);
        self.force_logout("Session expired. Please log in again.")
            .await;
    }
}

#[cfg(test)]
impl AuthSession {
    pub(crate) async fn force_authenticated(&self, token: &str, user: UserRecord) {
        let mut state = self.inner.lock().await;
        state.phase = AuthPhase::Authenticated;
        state.token = Some(token.to_string());
        state.user = Some(user);
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
