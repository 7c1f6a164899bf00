use std::collections::BTreeMap;

use thiserror::Error;

/// Stable wire codes for the problem envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AuthenticationRequired,
    InsufficientPermissions,
    ResourceNotFound,
    ValidationError,
    RateLimitExceeded,
    InsufficientCredits,
    FactionRestriction,
    TeamPermissionDenied,
    Conflict,
    Unavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ErrorCode::FactionRestriction => "FACTION_RESTRICTION",
            ErrorCode::TeamPermissionDenied => "TEAM_PERMISSION_DENIED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Unavailable => "UNAVAILABLE",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed")]
    Validation { details: BTreeMap<String, String> },

    #[error("invalid credential")]
    InvalidCredential,

    #[error("second factor required")]
    SecondFactorRequired { challenge_token: String },

    #[error("second factor invalid")]
    SecondFactorInvalid,

    #[error("account disabled")]
    AccountDisabled,

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("faction restriction: {0}")]
    FactionRestriction(String),

    #[error("team permission denied")]
    TeamPermissionDenied,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn validation(field: &str, message: &str) -> Error {
        let mut details = BTreeMap::new();
        details.insert(field.to_string(), message.to_string());
        Error::Validation { details }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation { .. } => ErrorCode::ValidationError,
            Error::InvalidCredential
            | Error::SecondFactorRequired { .. }
            | Error::SecondFactorInvalid
            | Error::AccountDisabled
            | Error::AuthenticationRequired => ErrorCode::AuthenticationRequired,
            Error::InsufficientPermissions => ErrorCode::InsufficientPermissions,
            Error::NotFound(_) => ErrorCode::ResourceNotFound,
            Error::Conflict(_) => ErrorCode::Conflict,
            // Invariant violations caused by input surface as validation
            // errors; concurrent-change violations are retried at the
            // transaction layer and only reach here as conflicts.
            Error::InvariantViolation(_) => ErrorCode::ValidationError,
            Error::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
            Error::FactionRestriction(_) => ErrorCode::FactionRestriction,
            Error::TeamPermissionDenied => ErrorCode::TeamPermissionDenied,
            Error::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            Error::Unavailable(_) => ErrorCode::Unavailable,
        }
    }

    /// Per-field details for the problem envelope; empty for non-validation
    /// kinds so auth failures stay generic on the wire.
    pub fn details(&self) -> BTreeMap<String, String> {
        match self {
            Error::Validation { details } => details.clone(),
            Error::InvariantViolation(detail) => {
                let mut details = BTreeMap::new();
                details.insert("invariant".to_string(), detail.clone());
                details
            }
            _ => BTreeMap::new(),
        }
    }

    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(
            Error::AuthenticationRequired.code().as_str(),
            "AUTHENTICATION_REQUIRED"
        );
        assert_eq!(Error::NotFound("ship").code().as_str(), "RESOURCE_NOT_FOUND");
        assert_eq!(
            Error::RateLimited { retry_after_secs: 3 }.code().as_str(),
            "RATE_LIMIT_EXCEEDED"
        );
        assert_eq!(
            Error::InsufficientCredits {
                required: 10,
                available: 5
            }
            .code()
            .as_str(),
            "INSUFFICIENT_CREDITS"
        );
    }

    #[test]
    fn test_validation_details() {
        let e = Error::validation("tax_rate", "must be between 0.05 and 0.25");
        let details = e.details();
        assert_eq!(details.len(), 1);
        assert!(details["tax_rate"].contains("0.05"));
    }

    #[test]
    fn test_auth_errors_carry_no_details() {
        assert!(Error::InvalidCredential.details().is_empty());
        assert!(Error::AccountDisabled.details().is_empty());
    }
}
