use serde::{Deserialize, Serialize};

/// Exact string the JWT layer puts in `msg` when a blocklisted token is
/// presented.
pub const TOKEN_REVOKED_MESSAGE: &str = "Token has been revoked";

/// Failure envelope returned by the backend. The JWT layer and the
/// resource views reply with `{"msg": ...}`; the auth view replies with
/// `{"error": ...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiFailure {
    pub fn message(&self) -> Option<&str> {
        self.msg.as_deref().or(self.error.as_deref())
    }

    /// Token revocation is signalled through `msg` only; it never comes
    /// from the auth view's `error` field.
    pub fn is_token_revoked(&self) -> bool {
        self.msg.as_deref() == Some(TOKEN_REVOKED_MESSAGE)
    }
}
