// Session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;

/// Lifecycle state of the admin session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No credential, or the previous session has ended
    Anonymous,

    /// A stored credential exists and is being validated against the server.
    /// Transient: only ever observed during `bootstrap()`.
    Validating,

    /// The server accepted the credential
    Authenticated,

    /// A proactive renewal is in flight; the user stays signed in
    Refreshing,
}

impl SessionStatus {
    /// True for states that render protected content
    pub fn is_signed_in(self) -> bool {
        matches!(self, SessionStatus::Authenticated | SessionStatus::Refreshing)
    }
}

/// Authoritative in-memory session snapshot.
///
/// Mutated exclusively by the `SessionController` and published whole on its
/// watch channel, so observers never see a half-applied transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub status: SessionStatus,

    /// Current user. During `Validating` (and after a 5xx bootstrap
    /// failure) this may hold the cached snapshot for display only.
    pub user: Option<UserIdentity>,

    /// Most recent failure absorbed into the state machine
    pub last_error: Option<ErrorInfo>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            status: SessionStatus::Anonymous,
            user: None,
            last_error: None,
        }
    }
}

/// Admin user profile as the API reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// Persisted bearer credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: String) -> Self {
        Self {
            token,
            issued_at: Utc::now(),
        }
    }
}

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub secret: &'a str,
}

/// Login response body
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserIdentity,
}

/// Result of a successful `login()` call
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,

    /// Where the caller should navigate next: the originally intended path
    /// when one was preserved, otherwise the default authenticated path.
    pub redirect_to: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_signed_in() {
        assert!(SessionStatus::Authenticated.is_signed_in());
        assert!(SessionStatus::Refreshing.is_signed_in());
        assert!(!SessionStatus::Anonymous.is_signed_in());
        assert!(!SessionStatus::Validating.is_signed_in());
    }

    #[test]
    fn test_user_identity_wire_format() {
        let json = r#"{"id":"u1","email":"a@b.com","name":"Ada","isAdmin":true}"#;
        let user: UserIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.email.as_deref(), Some("a@b.com"));
        assert!(user.is_admin);
    }

    #[test]
    fn test_user_identity_missing_optionals() {
        let json = r#"{"id":"u2"}"#;
        let user: UserIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "u2");
        assert!(user.email.is_none());
        assert!(!user.is_admin);
    }

    #[test]
    fn test_default_session_is_anonymous() {
        let session = Session::default();
        assert_eq!(session.status, SessionStatus::Anonymous);
        assert!(session.user.is_none());
        assert!(session.last_error.is_none());
    }
}
