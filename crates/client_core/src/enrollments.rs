use std::sync::Arc;

use reqwest::Client;
use shared::{
    domain::{CourseId, Role, UserId},
    error::ApiFailure,
    protocol::{EnrollRequest, EnrollResponse, EnrollmentRecord, MyEnrollmentRecord},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{classify_failure, AuthSession, ClientError, Notifier, RevocationReporter, SessionEvent};

#[derive(Default)]
struct EnrollmentState {
    all: Vec<EnrollmentRecord>,
    mine: Vec<MyEnrollmentRecord>,
}

/// Owner of the enrollment collections: "all" (admin view) and "mine"
/// (the logged-in student's). Each fetch replaces its own collection;
/// responses apply in settlement order with no cancellation of stale
/// in-flight calls.
pub struct EnrollmentManager {
    http: Client,
    session: Arc<AuthSession>,
    notifier: Arc<dyn Notifier>,
    revocations: RevocationReporter,
    inner: Mutex<EnrollmentState>,
}

impl EnrollmentManager {
    pub fn new(session: Arc<AuthSession>, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let manager = Arc::new(Self {
            http: Client::new(),
            revocations: session.revocation_reporter(),
            session,
            notifier,
            inner: Mutex::new(EnrollmentState::default()),
        });
        manager.spawn_session_refresh();
        manager
    }

    fn spawn_session_refresh(self: &Arc<Self>) {
        let mut events = self.session.subscribe_events();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Authenticated { .. }) => {
                        let Some(manager) = weak.upgrade() else {
                            break;
                        };
                        if let Err(err) = manager.fetch_all().await {
                            warn!("enrollment refresh after login failed: {err}");
                        }
                        if let Err(err) = manager.fetch_mine().await {
                            warn!("my-enrollment refresh after login failed: {err}");
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub async fn enrollments(&self) -> Vec<EnrollmentRecord> {
        self.inner.lock().await.all.clone()
    }

    pub async fn my_enrollments(&self) -> Vec<MyEnrollmentRecord> {
        self.inner.lock().await.mine.clone()
    }

    /// Client-side convenience check only; it does not guarantee
    /// server-side exclusivity across sessions.
    pub async fn has_active_enrollment(&self) -> bool {
        !self.inner.lock().await.mine.is_empty()
    }

    /// Replaces the "all" collection. A missing token is a silent no-op,
    /// matching the quiet-skip behavior of background refreshes.
    pub async fn fetch_all(&self) -> Result<(), ClientError> {
        let Some(token) = self.session.bearer_token().await else {
            return Ok(());
        };

        let response = self
            .http
            .get(format!("{}/enrollments", self.session.base_url()))
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            return Err(classify_failure(
                &self.revocations,
                failure,
                "Access forbidden: Check user role and permissions",
            ));
        }

        let enrollments: Vec<EnrollmentRecord> = response.json().await?;
        self.inner.lock().await.all = enrollments;
        Ok(())
    }

    /// Replaces the "mine" collection. Requires a token and a resolved
    /// current user; otherwise a silent no-op.
    pub async fn fetch_mine(&self) -> Result<(), ClientError> {
        let Some(token) = self.session.bearer_token().await else {
            return Ok(());
        };
        if self.session.current_user().await.is_none() {
            return Ok(());
        }

        let response = self
            .http
            .get(format!(
                "{}/enrollments/my-enrollments",
                self.session.base_url()
            ))
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            let err = classify_failure(&self.revocations, failure, "Failed to load enrollments.");
            if !matches!(err, ClientError::TokenRevoked) {
                self.notifier.error(&err.notification());
            }
            return Err(err);
        }

        let mine: Vec<MyEnrollmentRecord> = response.json().await?;
        self.inner.lock().await.mine = mine;
        Ok(())
    }

    /// Enrolls the current user. The one-course-at-a-time rule is
    /// checked against local state before any network call; a student
    /// already enrolled is rejected without a round-trip.
    pub async fn enroll(&self, course_id: CourseId) -> Result<(), ClientError> {
        let Some(user) = self.session.current_user().await else {
            self.notifier.error("Only students can enroll in courses!");
            return Err(ClientError::NotAuthenticated);
        };
        if user.role != Role::Student {
            self.notifier.error("Only students can enroll in courses!");
            return Err(ClientError::Validation(
                "only students can enroll in courses".into(),
            ));
        }
        if self.has_active_enrollment().await {
            self.notifier.error(
                "You must unenroll from your current course before enrolling in another!",
            );
            return Err(ClientError::Validation(
                "already enrolled in a course".into(),
            ));
        }

        let token = self.session.require_token().await?;
        let response = self
            .http
            .post(format!("{}/enrollments", self.session.base_url()))
            .bearer_auth(&token)
            .json(&EnrollRequest {
                student_id: user.id,
                course_id,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            let err = classify_failure(&self.revocations, failure, "Failed to enroll.");
            if !matches!(err, ClientError::TokenRevoked) {
                self.notifier.error(&err.notification());
            }
            return Err(err);
        }

        let _body: EnrollResponse = response.json().await?;
        self.notifier.success("Enrolled successfully!");
        if let Err(err) = self.fetch_mine().await {
            warn!("post-enroll refresh failed: {err}");
        }
        Ok(())
    }

    /// Deletes an enrollment by composite key, splices both local
    /// collections, then re-fetches "mine" to reconcile any server-side
    /// effects the local removal missed.
    pub async fn unenroll(&self, student_id: UserId, course_id: CourseId) -> Result<(), ClientError> {
        let token = self.session.require_token().await?;
        let response = self
            .http
            .delete(format!(
                "{}/enrollments/{}/{}",
                self.session.base_url(),
                student_id.0,
                course_id.0
            ))
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            let err = classify_failure(&self.revocations, failure, "Failed to unenroll.");
            if !matches!(err, ClientError::TokenRevoked) {
                self.notifier.error("Error unenrolling from the course.");
            }
            return Err(err);
        }

        {
            let mut state = self.inner.lock().await;
            state
                .all
                .retain(|e| !(e.student_id == student_id && e.course_id == course_id));
            state.mine.retain(|e| e.course_id != course_id);
        }
        if let Err(err) = self.fetch_mine().await {
            warn!("post-unenroll refresh failed: {err}");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/enrollments_tests.rs"]
mod tests;
