//! Conduit API Layer
//!
//! This module provides the transport for Phabricator's Conduit API and the
//! typed query components layered on top of it. The `ConduitClient` performs
//! authenticated method calls with bounded retry; the endpoint modules
//! (Diffusion, Repository, Maniphest) expose one operation per supported
//! query and translate the client's failure taxonomy 1:1.

use thiserror::Error;

pub mod client;
pub mod diffusion;
pub mod maniphest;
pub mod repository;
pub mod retry;

/// Result type for Conduit operations
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Errors that can occur during Conduit calls
///
/// Every variant preserves the remote error code and message (when one
/// exists) so operators can diagnose failures without re-issuing the call.
/// "Not found" is not part of this taxonomy: domain absence is expressed by
/// the query components themselves (`Option`, absent map keys).
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ConduitError {
    /// Whether a failure may succeed on a later attempt.
    ///
    /// Only transient transport conditions qualify. Authentication,
    /// unknown-method, bad-parameter, and undecodable-response failures are
    /// terminal and surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConduitError::RemoteUnavailable(_) | ConduitError::Timeout(_)
        )
    }
}

/// Map a Conduit error envelope to the failure taxonomy.
///
/// The remote `error_code` and `error_info` are kept verbatim in the
/// variant payload, prefixed with the method that produced them.
pub(crate) fn classify_remote_error(method: &str, code: &str, info: &str) -> ConduitError {
    let detail = format!("{}: {}: {}", method, code, info);
    match code {
        "ERR-INVALID-AUTH" | "ERR-INVALID-SESSION" | "ERR-INVALID-TOKEN" => {
            ConduitError::AuthenticationFailed(detail)
        }
        "ERR-BAD-METHOD" | "ERR-CONDUIT-METHOD" => ConduitError::MethodNotFound(detail),
        _ => ConduitError::InvalidParameters(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_codes_classify_as_authentication_failed() {
        for code in ["ERR-INVALID-AUTH", "ERR-INVALID-SESSION", "ERR-INVALID-TOKEN"] {
            let err = classify_remote_error("user.whoami", code, "bad token");
            assert!(matches!(err, ConduitError::AuthenticationFailed(_)));
            assert!(err.to_string().contains(code));
            assert!(err.to_string().contains("user.whoami"));
        }
    }

    #[test]
    fn test_unknown_method_classifies_as_method_not_found() {
        let err = classify_remote_error("nope.nope", "ERR-BAD-METHOD", "no such method");
        assert!(matches!(err, ConduitError::MethodNotFound(_)));
    }

    #[test]
    fn test_other_codes_classify_as_invalid_parameters() {
        let err = classify_remote_error(
            "maniphest.query",
            "ERR-CONDUIT-CALL",
            "parameter 'ids' must be a list",
        );
        assert!(matches!(err, ConduitError::InvalidParameters(_)));
        assert!(err.to_string().contains("ERR-CONDUIT-CALL"));
    }

    #[test]
    fn test_only_transient_failures_are_retryable() {
        assert!(ConduitError::RemoteUnavailable("503".into()).is_retryable());
        assert!(ConduitError::Timeout("deadline".into()).is_retryable());
        assert!(!ConduitError::AuthenticationFailed("x".into()).is_retryable());
        assert!(!ConduitError::MethodNotFound("x".into()).is_retryable());
        assert!(!ConduitError::InvalidParameters("x".into()).is_retryable());
        assert!(!ConduitError::MalformedResponse("x".into()).is_retryable());
    }
}
