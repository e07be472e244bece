//! crates/bookshelf_core/src/error.rs
//!
//! The error taxonomy surfaced to callers of the session and book layers.

use crate::ports::{auth_codes, PortError};

/// Bad local input. Never reaches a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least {0} characters")]
    PasswordTooShort(usize),
    #[error("year must be between 1 and {max}, got {value}")]
    YearOutOfRange { value: i32, max: i32 },
}

/// Why the identity provider turned a request down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReason {
    NotFound,
    WrongCredentials,
    EmailInUse,
    ProviderError,
}

impl AuthReason {
    /// Maps a provider error code onto a reason. Unknown codes are provider errors.
    pub fn from_code(code: &str) -> Self {
        match code {
            auth_codes::USER_NOT_FOUND => AuthReason::NotFound,
            auth_codes::WRONG_PASSWORD | auth_codes::INVALID_CREDENTIAL => AuthReason::WrongCredentials,
            auth_codes::EMAIL_IN_USE => AuthReason::EmailInUse,
            _ => AuthReason::ProviderError,
        }
    }

    /// Message suitable for showing next to the offending form field.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthReason::NotFound => "User not found",
            AuthReason::WrongCredentials => "Incorrect password",
            AuthReason::EmailInUse => "Email already registered",
            AuthReason::ProviderError => "Authentication failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authentication error: {}", reason.user_message())]
    Auth { reason: AuthReason, message: String },

    /// The target of a mutation does not exist under the scoped user.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport, permission or otherwise unexpected backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl CoreError {
    pub fn auth_reason(&self) -> Option<AuthReason> {
        match self {
            CoreError::Auth { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<PortError> for CoreError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => CoreError::NotFound(what),
            PortError::Auth { code, message } => CoreError::Auth {
                reason: AuthReason::from_code(&code),
                message,
            },
            PortError::Unauthorized => CoreError::Backend("permission denied".to_string()),
            PortError::Unexpected(msg) => CoreError::Backend(msg),
        }
    }
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_codes_map_to_reasons() {
        assert_eq!(AuthReason::from_code("auth/user-not-found"), AuthReason::NotFound);
        assert_eq!(AuthReason::from_code("auth/wrong-password"), AuthReason::WrongCredentials);
        assert_eq!(AuthReason::from_code("auth/invalid-credential"), AuthReason::WrongCredentials);
        assert_eq!(AuthReason::from_code("auth/email-already-in-use"), AuthReason::EmailInUse);
        assert_eq!(AuthReason::from_code("auth/too-many-requests"), AuthReason::ProviderError);
    }

    #[test]
    fn port_errors_convert_into_the_taxonomy() {
        let err: CoreError = PortError::auth("auth/wrong-password", "bad").into();
        assert_eq!(err.auth_reason(), Some(AuthReason::WrongCredentials));

        let err: CoreError = PortError::NotFound("book 1".to_string()).into();
        assert_eq!(err, CoreError::NotFound("book 1".to_string()));

        let err: CoreError = PortError::Unauthorized.into();
        assert!(matches!(err, CoreError::Backend(_)));
    }
}
