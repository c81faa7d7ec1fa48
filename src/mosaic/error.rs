use thiserror::Error;

use crate::mosaic::mce::error::MceError;
use crate::mosaic::tip::error::TipError;
use crate::mosaic::vtr::error::VtrError;

/// Top-level error, unifying the subsystem error kinds behind the
/// propagation policy in the service façades: `InvalidRequest` maps to a
/// 4xx, everything else to a 5xx with the generic `{ error: true, message }`
/// envelope.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A downstream failure that is not the caller's fault: an upstream
    /// service is unreachable, returned garbage, or a local operation (e.g.
    /// re-encoding a finished mosaic) failed. Always a 5xx.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Vtr(#[from] VtrError),

    #[error(transparent)]
    Tip(#[from] TipError),

    #[error(transparent)]
    Mce(#[from] MceError),
}

impl AppError {
    /// Whether this error should be reported to the HTTP caller as a 4xx
    /// (malformed input) rather than a 5xx (operational failure).
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::InvalidRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_is_a_client_error() {
        let err = AppError::InvalidRequest("missing field".into());
        assert!(err.is_client_error());
    }

    #[test]
    fn wrapped_subsystem_errors_are_not_client_errors() {
        let err: AppError = VtrError::NoResult.into();
        assert!(!err.is_client_error());
    }

    #[test]
    fn internal_errors_are_not_client_errors() {
        let err = AppError::Internal("downstream unavailable".into());
        assert!(!err.is_client_error());
    }
}
