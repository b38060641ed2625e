//! Error types for the Graph adapters.

use gcx_onboard::{DepartmentSourceError, DirectoryError, NotifyError, ResolverError};
use thiserror::Error;

/// Result type alias using `EntraError`.
pub type EntraResult<T> = Result<T, EntraError>;

/// Errors that can occur when talking to Microsoft Graph or blob storage.
#[derive(Debug, Error)]
pub enum EntraError {
    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token acquisition failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Microsoft Graph answered with an error status.
    #[error("Graph API error ({status}): {code} - {message}")]
    GraphApi {
        status: u16,
        code: String,
        message: String,
    },

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// A successful response whose body made no sense.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Circuit breaker is open, requests are being rejected.
    #[error("Circuit breaker open, failing fast")]
    CircuitOpen,

    /// Maximum retry attempts exceeded.
    #[error("Maximum retries ({attempts}) exceeded for rate limit")]
    MaxRetriesExceeded { attempts: u32 },
}

impl EntraError {
    /// Returns true for Graph's rejection of a membership patch that names an
    /// existing member.
    #[must_use]
    pub fn is_already_member(&self) -> bool {
        match self {
            Self::GraphApi { message, .. } => message
                .to_ascii_lowercase()
                .contains("added object references already exist"),
            _ => false,
        }
    }

    /// Returns true if the target resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::GraphApi { status, code, .. }
                if *status == 404 || code == "Request_ResourceNotFound"
        )
    }
}

impl From<EntraError> for DirectoryError {
    fn from(err: EntraError) -> Self {
        if err.is_already_member() {
            return DirectoryError::AlreadyMember {
                message: err.to_string(),
            };
        }
        if err.is_not_found() {
            return DirectoryError::NotFound(err.to_string());
        }

        match err {
            EntraError::GraphApi { code, message, .. } => DirectoryError::Api { code, message },
            EntraError::MaxRetriesExceeded { attempts } => DirectoryError::Throttled { attempts },
            EntraError::CircuitOpen => DirectoryError::Unavailable,
            EntraError::Json(e) => DirectoryError::Decode(e.to_string()),
            EntraError::UnexpectedResponse(msg) => DirectoryError::Decode(msg),
            EntraError::Http(e) => DirectoryError::Transport {
                message: e.to_string(),
                source: Some(Box::new(e)),
            },
            other => DirectoryError::transport(other.to_string()),
        }
    }
}

impl From<EntraError> for ResolverError {
    fn from(err: EntraError) -> Self {
        ResolverError::Store(err.to_string())
    }
}

impl From<EntraError> for DepartmentSourceError {
    fn from(err: EntraError) -> Self {
        DepartmentSourceError::Backend(err.to_string())
    }
}

impl From<EntraError> for NotifyError {
    fn from(err: EntraError) -> Self {
        NotifyError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(status: u16, code: &str, message: &str) -> EntraError {
        EntraError::GraphApi {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_duplicate_member_maps_to_already_member() {
        let err = graph(
            400,
            "Request_BadRequest",
            "One or more added object references already exist for the following modified properties: 'members'.",
        );
        assert!(DirectoryError::from(err).is_already_member());
    }

    #[test]
    fn test_other_bad_request_is_api_error() {
        let err = graph(400, "Request_BadRequest", "Invalid object identifier 'x'.");
        match DirectoryError::from(err) {
            DirectoryError::Api { code, .. } => assert_eq!(code, "Request_BadRequest"),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn test_not_found_by_status_or_code() {
        assert!(matches!(
            DirectoryError::from(graph(404, "Whatever", "gone")),
            DirectoryError::NotFound(_)
        ));
        assert!(matches!(
            DirectoryError::from(graph(400, "Request_ResourceNotFound", "gone")),
            DirectoryError::NotFound(_)
        ));
    }

    #[test]
    fn test_throttling_and_circuit_are_transient() {
        let throttled = DirectoryError::from(EntraError::MaxRetriesExceeded { attempts: 4 });
        assert!(matches!(throttled, DirectoryError::Throttled { attempts: 4 }));
        assert!(DirectoryError::from(EntraError::CircuitOpen).is_transient());
        assert!(DirectoryError::from(EntraError::Auth("expired".into())).is_transient());
    }
}
