use crate::repositories::StoreError;
use thiserror::Error;

/// Broad classification of a failure, used by callers to decide between
/// "show a dismissable notice and keep the last good state" and "surface".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Read/write/subscribe rejected by the network or the store being unreachable.
    Transient,
    /// A bounded operation ran past its deadline.
    Timeout,
    /// Duplicate or already-in-flight action.
    Conflict,
    /// Advisory permission check failed before any write was attempted.
    Forbidden,
    NotFound,
    BadRequest,
    /// Remote payload could not be coerced into an entity.
    Malformed,
    Config,
}

#[derive(Debug, Clone, Error)]
#[error("{message}{}", .details.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
pub struct SyncError {
    kind: ErrorKind,
    message: &'static str,
    details: Option<String>,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Common error constructors
    pub fn transient(message: &'static str) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn timeout(message: &'static str) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn conflict(message: &'static str) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn forbidden(message: &'static str) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn bad_request(message: &'static str) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn malformed(message: &'static str) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub fn config(message: &'static str) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// True for failures the user may retry (network trouble, deadlines).
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient | ErrorKind::Timeout)
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => {
                Self::transient("Remote store unavailable").with_details(reason)
            }
            StoreError::Timeout => Self::timeout("Remote store timed out"),
            StoreError::Rejected(reason) => {
                Self::forbidden("Write rejected by remote store").with_details(reason)
            }
            StoreError::InvalidPath(path) => Self::bad_request("Invalid store path").with_details(path),
            StoreError::Encode(e) => Self::malformed("Failed to encode record").with_details(e.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for SyncError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::bad_request("Validation error").with_details(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed("Malformed payload").with_details(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_kinds() {
        let e: SyncError = StoreError::Unavailable("offline".into()).into();
        assert_eq!(e.kind(), ErrorKind::Transient);
        assert!(e.is_transient());
        assert_eq!(e.to_string(), "Remote store unavailable (offline)");

        let e: SyncError = StoreError::Rejected("rules".into()).into();
        assert_eq!(e.kind(), ErrorKind::Forbidden);
        assert!(!e.is_transient());
    }
}
