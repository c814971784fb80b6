//! Error types and handling
//!
//! This module provides the error type used throughout the DesignCore client.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Content that fails to parse as structured data is never an error: the
//! interpreter degrades to prose instead.

use crate::types::ProjectStatus;
use thiserror::Error;

/// Trait for client error extensions
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display and never contains credentials or
    /// response bodies.
    fn user_hint(&self) -> &str;

    /// Returns whether retrying the same operation may succeed
    fn is_recoverable(&self) -> bool;
}

/// Main client error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Transport**: request rejected, non-2xx reply, timeout, empty stream
/// - **Backend**: envelope with a non-success discriminator
/// - **State**: writes from a stale view, invalid status transitions
///
/// # Examples
///
/// ```
/// use sdk::errors::{ClientError, ErrorExt};
///
/// let error = ClientError::Timeout;
/// assert!(error.is_recoverable());
///
/// let fatal = ClientError::Config("bad base_url".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum ClientError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Transport errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Streamed response had no body")]
    EmptyStream,

    // Backend errors
    #[error("Step rejected by backend: {0}")]
    StepRejected(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    // State errors
    #[error("View for project '{0}' is no longer active")]
    StaleView(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ProjectStatus,
        to: ProjectStatus,
    },

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Transport failures set the project status to failed
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Http { .. } | Self::Timeout | Self::EmptyStream
        )
    }
}

impl ErrorExt for ClientError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Network(_) => "Backend unreachable. Check that the server is running",
            Self::Http { status, .. } if *status >= 500 => {
                "The generation service failed. Try again later"
            }
            Self::Http { .. } => "The backend rejected the request",
            Self::Timeout => "The backend took too long to respond. Try again",
            Self::EmptyStream => "The backend returned an empty stream. Try again",
            Self::StepRejected(_) => "The step did not complete. Retry the step",
            Self::Parse(_) => "The backend sent an unexpected reply",
            Self::ProjectNotFound(_) => "No project with that name exists",
            Self::StaleView(_) => "The project view changed before the result arrived",
            Self::InvalidTransition { .. } => "The project cannot move to that status",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::InvalidTransition { .. } | Self::ProjectNotFound(_) => false,
            _ => true,
        }
    }
}

/// Result alias used across the client
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(ClientError::Network("refused".into()).is_transport());
        assert!(ClientError::Http {
            status: 502,
            body: String::new()
        }
        .is_transport());
        assert!(ClientError::EmptyStream.is_transport());
        assert!(!ClientError::StepRejected("x".into()).is_transport());
        assert!(!ClientError::StaleView("p".into()).is_transport());
    }

    #[test]
    fn test_hints_never_echo_bodies() {
        let err = ClientError::Http {
            status: 500,
            body: "secret-token-123".into(),
        };
        assert!(!err.user_hint().contains("secret"));
        assert_eq!(
            err.user_hint(),
            "The generation service failed. Try again later"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = ClientError::InvalidTransition {
            from: ProjectStatus::Completed,
            to: ProjectStatus::InProgress,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: completed -> in_progress"
        );
        assert!(!err.is_recoverable());
    }
}
