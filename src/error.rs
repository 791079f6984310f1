//! Error taxonomy for authentication backends.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Every way an authentication attempt, or a backend configuration, can
/// fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("login is empty")]
    EmptyLogin,

    #[error("directory connection failed: {0}")]
    Connection(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authenticated user has no entry under the search base")]
    UserNotFound,

    #[error("missing required setting `{0}`")]
    MissingSetting(String),

    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl AuthError {
    /// Build an [`AuthError::Connection`] from any transport error.
    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    /// Build an [`AuthError::InvalidSetting`].
    pub fn invalid_setting(
        key: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::EmptyLogin => "empty_login",
            AuthError::Connection(_) => "connection_error",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::UserNotFound => "user_not_found",
            AuthError::MissingSetting(_) | AuthError::InvalidSetting { .. } => {
                "configuration_error"
            },
        }
    }

    /// Whether the error comes from backend configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AuthError::MissingSetting(_) | AuthError::InvalidSetting { .. }
        )
    }

    /// Whether the error must be reported as a failed login.
    ///
    /// `InvalidCredentials` and `UserNotFound` stay indistinguishable for
    /// the end user.
    pub fn is_login_failure(&self) -> bool {
        matches!(
            self,
            AuthError::EmptyLogin
                | AuthError::InvalidCredentials
                | AuthError::UserNotFound
        )
    }

    /// Message safe to return to an unauthenticated client.
    pub fn public_message(&self) -> &'static str {
        if self.is_login_failure() {
            "Invalid login or password."
        } else {
            "Authentication service unavailable."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_failures_share_message() {
        assert_eq!(
            AuthError::InvalidCredentials.public_message(),
            AuthError::UserNotFound.public_message()
        );
        assert_ne!(
            AuthError::UserNotFound.public_message(),
            AuthError::connection("refused").public_message()
        );
    }

    #[test]
    fn test_configuration_errors() {
        let err = AuthError::MissingSetting("AD_URI".into());
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "missing required setting `AD_URI`");
        assert_eq!(err.kind(), "configuration_error");

        let err = AuthError::invalid_setting("AD_STARTTLS", "not a boolean");
        assert!(err.is_configuration());
        assert!(!err.is_login_failure());
    }
}
