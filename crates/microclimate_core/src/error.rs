use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McError {
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Debug endpoint unavailable for {app}{}", last_error_suffix(.last_error))]
    DebugEndpointUnavailable {
        app: String,
        last_error: Option<String>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to attach debugger to {app}: {reason}")]
    AttachFailure { app: String, reason: String },

    #[error("Cannot attach debugger to {app}: {reason}")]
    AttachNotAllowed { app: String, reason: String },

    #[error("Debugger teardown failed for {app}: {reason}")]
    TeardownFailure { app: String, reason: String },

    #[error("Application not found: {0}")]
    NotFound(String),

    #[error("Application {0} has been disposed")]
    Disposed(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(": {e}"))
        .unwrap_or_default()
}

impl McError {
    pub fn attach_failure(app: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AttachFailure {
            app: app.into(),
            reason: reason.into(),
        }
    }

    pub fn attach_not_allowed(app: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AttachNotAllowed {
            app: app.into(),
            reason: reason.into(),
        }
    }

    pub fn teardown(app: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TeardownFailure {
            app: app.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Errors a polling loop swallows and retries on its next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Timeout(_)
                | Self::Http { .. }
                | Self::Deserialize(_)
                | Self::Io(_)
                | Self::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let timeout_err = McError::Timeout(Duration::from_secs(5));
        assert_eq!(timeout_err.to_string(), "Request timeout after 5s");

        let http_err = McError::Http {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(http_err.to_string(), "HTTP error 503: unavailable");

        let attach_err = McError::attach_failure("node-app", "handshake refused");
        assert_eq!(
            attach_err.to_string(),
            "Failed to attach debugger to node-app: handshake refused"
        );
    }

    #[test]
    fn test_endpoint_unavailable_display() {
        let err = McError::DebugEndpointUnavailable {
            app: "node-app".into(),
            last_error: Some("HTTP error 404: not found".into()),
        };
        assert_eq!(
            err.to_string(),
            "Debug endpoint unavailable for node-app: HTTP error 404: not found"
        );

        let err = McError::DebugEndpointUnavailable {
            app: "node-app".into(),
            last_error: None,
        };
        assert_eq!(err.to_string(), "Debug endpoint unavailable for node-app");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(McError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(McError::InvalidResponse("empty".into()).is_retryable());
        assert!(!McError::Cancelled.is_retryable());
        assert!(McError::Cancelled.is_cancelled());
        assert!(!McError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_deserialize_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: McError = json_err.into();
        assert!(matches!(err, McError::Deserialize(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: McError = io_err.into();
        match err {
            McError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io variant"),
        }
    }
}
