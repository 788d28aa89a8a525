use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{CourseId, Role, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRecord>,
}

/// Authenticated identity as served by `/login` and `/current_user`.
/// `is_admin` is derived server-side from the role; clients must use
/// [`UserRecord::is_admin`] instead of reading the raw flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    #[serde(default, rename = "is_admin")]
    pub is_admin_flag: bool,
}

impl UserRecord {
    /// Canonical authorization predicate. The wire flag and the role can
    /// only disagree on a misbehaving server, in which case the role wins.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Directory row from `GET /users` (that endpoint omits `name`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// Partial update for `PATCH /users/:id`; absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Course row from `GET /courses`. The create response returns a reduced
/// shape without timestamps, hence the optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: CourseId,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructor_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCourseRequest {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructor_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCourseResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    pub course: CourseRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCourseRequest {
    pub description: String,
}

/// Row from `GET /enrollments` (admin view over all students).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub student_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub course_id: CourseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_description: Option<String>,
    pub enrolled_on: NaiveDateTime,
}

/// Row from `GET /enrollments/my-enrollments`; the backend omits
/// `student_id` here, so "mine" is a distinct shape from "all".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MyEnrollmentRecord {
    pub course_id: CourseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_description: Option<String>,
    pub enrolled_on: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub student_id: UserId,
    pub course_id: CourseId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentReceipt {
    pub student_id: UserId,
    pub course_id: CourseId,
    pub enrolled_on: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    pub enrollment: EnrollmentReceipt,
}
