use std::sync::Arc;

use reqwest::Client;
use shared::{
    domain::{CourseId, UserId},
    error::ApiFailure,
    protocol::{CourseRecord, CreateCourseRequest, CreateCourseResponse, UpdateCourseRequest},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{classify_failure, AuthSession, ClientError, Notifier, RevocationReporter, SessionEvent};

/// How a settled course mutation reconciles the cached collection.
/// Policy table, per operation: create appends the server-returned
/// record, update re-fetches the whole set (server-computed fields),
/// delete splices locally by id. Every failure leaves the cache
/// untouched; nothing is applied optimistically before settlement.
enum Reconcile {
    Append(CourseRecord),
    Refetch,
    Splice(CourseId),
}

/// Owner of the course collection and its CRUD operations. Responses
/// apply in settlement order (last-write-wins); stale in-flight calls
/// are not cancelled.
pub struct CourseCatalog {
    http: Client,
    session: Arc<AuthSession>,
    notifier: Arc<dyn Notifier>,
    revocations: RevocationReporter,
    inner: Mutex<Vec<CourseRecord>>,
}

impl CourseCatalog {
    pub fn new(session: Arc<AuthSession>, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let catalog = Arc::new(Self {
            http: Client::new(),
            revocations: session.revocation_reporter(),
            session,
            notifier,
            inner: Mutex::new(Vec::new()),
        });
        catalog.spawn_session_refresh();
        catalog
    }

    /// Refreshes the collection whenever the token transitions from
    /// absent to present (login or restored session).
    fn spawn_session_refresh(self: &Arc<Self>) {
        let mut events = self.session.subscribe_events();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Authenticated { .. }) => {
                        let Some(catalog) = weak.upgrade() else {
                            break;
                        };
                        if let Err(err) = catalog.fetch_all().await {
                            warn!("course refresh after login failed: {err}");
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub async fn courses(&self) -> Vec<CourseRecord> {
        self.inner.lock().await.clone()
    }

    /// Replaces the entire cached set with the server's response.
    pub async fn fetch_all(&self) -> Result<(), ClientError> {
        let token = self.session.require_token().await?;
        let response = self
            .http
            .get(format!("{}/courses", self.session.base_url()))
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure: ApiFailure = response.json().await.unwrap_or_default();
            return Err(classify_failure(
                &self.revocations,
                failure,
                "Failed to fetch courses",
            ));
        }

        let courses: Vec<CourseRecord> = response.json().await?;
        *self.inner.lock().await = courses;
        Ok(())
    }

    pub async fn create(
        &self,
        description: &str,
        instructor_id: Option<UserId>,
    ) -> Result<(), ClientError> {
        if description.trim().is_empty() {
            self.notifier.error("Course description is required!");
            return Err(ClientError::Validation(
                "course description is required".into(),
            ));
        }

        let token = self.session.require_token().await?;
        self.notifier.loading("Creating course...");
        let response = self
            .http
            .post(format!("{}/courses", self.session.base_url()))
            .bearer_auth(&token)
            .json(&CreateCourseRequest {
                description: description.to_string(),
                instructor_id,
            })
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => return Err(self.settle_transport_failure(err)),
        };

        if !response.status().is_success() {
            return Err(self
                .settle_api_failure(response, "Failed to create course.")
                .await);
        }

        self.notifier.dismiss();
        let body: CreateCourseResponse = response.json().await?;
        self.notifier.success("Course created successfully!");
        self.reconcile(Reconcile::Append(body.course)).await
    }

    pub async fn update(&self, course_id: CourseId, description: &str) -> Result<(), ClientError> {
        if description.trim().is_empty() {
            self.notifier.error("Course description is required!");
            return Err(ClientError::Validation(
                "course description is required".into(),
            ));
        }

        let token = self.session.require_token().await?;
        self.notifier.loading("Updating course...");
        let response = self
            .http
            .patch(format!("{}/courses/{}", self.session.base_url(), course_id.0))
            .bearer_auth(&token)
            .json(&UpdateCourseRequest {
                description: description.to_string(),
            })
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => return Err(self.settle_transport_failure(err)),
        };

        if !response.status().is_success() {
            return Err(self
                .settle_api_failure(response, "Failed to update course.")
                .await);
        }

        self.notifier.dismiss();
        self.notifier.success("Course updated successfully!");
        self.reconcile(Reconcile::Refetch).await
    }

    pub async fn delete(&self, course_id: CourseId) -> Result<(), ClientError> {
        let token = self.session.require_token().await?;
        self.notifier.loading("Deleting course...");
        let response = self
            .http
            .delete(format!("{}/courses/{}", self.session.base_url(), course_id.0))
            .bearer_auth(&token)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => return Err(self.settle_transport_failure(err)),
        };

        if !response.status().is_success() {
            return Err(self
                .settle_api_failure(response, "Failed to delete course.")
                .await);
        }

        self.notifier.dismiss();
        self.notifier.success("Course deleted successfully!");
        self.reconcile(Reconcile::Splice(course_id)).await
    }

    async fn reconcile(&self, action: Reconcile) -> Result<(), ClientError> {
        match action {
            Reconcile::Append(course) => {
                self.inner.lock().await.push(course);
                Ok(())
            }
            Reconcile::Splice(course_id) => {
                self.inner.lock().await.retain(|course| course.id != course_id);
                Ok(())
            }
            Reconcile::Refetch => self.fetch_all().await,
        }
    }

    fn settle_transport_failure(&self, err: reqwest::Error) -> ClientError {
        self.notifier.dismiss();
        let err = ClientError::from(err);
        self.notifier.error(&err.notification());
        err
    }

    async fn settle_api_failure(&self, response: reqwest::Response, fallback: &str) -> ClientError {
        let failure: ApiFailure = response.json().await.unwrap_or_default();
        self.notifier.dismiss();
        let err = classify_failure(&self.revocations, failure, fallback);
        if !matches!(err, ClientError::TokenRevoked) {
            self.notifier.error(&err.notification());
        }
        err
    }
}

#[cfg(test)]
#[path = "tests/courses_tests.rs"]
mod tests;
