use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::ChannelError;
use crate::request::RequestKind;

/// Errors surfaced by the mediator.
///
/// Cloneable so that a single [`crate::ResultCell`] can hand the same failure
/// to every waiter. Handler errors are kept behind an `Arc` for that reason.
#[derive(Debug, Clone)]
pub enum MediatorError {
    /// No handler is registered for the request's concrete type.
    NoHandlerFound {
        /// Whether the request was dispatched as a command or a query
        kind: RequestKind,
        /// `std::any::type_name` of the request
        request_type: &'static str,
    },
    /// The handler returned an error or panicked.
    HandlerFailed {
        /// `std::any::type_name` of the request
        request_type: &'static str,
        /// The handler's error (panics are converted into an error message)
        source: Arc<anyhow::Error>,
    },
    /// The caller stopped waiting. The handler is not cancelled.
    Timeout {
        /// `std::any::type_name` of the request
        request_type: &'static str,
        /// How long the caller waited
        waited: Duration,
    },
    /// Two handlers were registered for the same command or query type.
    DuplicateHandler {
        /// Table the duplicate was registered in
        kind: RequestKind,
        /// `std::any::type_name` of the request
        request_type: &'static str,
    },
    /// The mediator has been shut down.
    ShutDown,
    /// The underlying channel refused the operation.
    Channel(ChannelError),
    /// A consumer thread could not be started.
    Spawn(String),
    /// Configuration rejected by [`crate::MediatorConfig::validate`].
    InvalidConfig(String),
    /// An internal invariant was violated.
    Internal(String),
}

impl MediatorError {
    /// Wrap a handler error.
    pub fn handler_failed(request_type: &'static str, error: anyhow::Error) -> Self {
        MediatorError::HandlerFailed {
            request_type,
            source: Arc::new(error),
        }
    }

    /// `true` for [`MediatorError::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, MediatorError::Timeout { .. })
    }

    /// `true` for [`MediatorError::NoHandlerFound`].
    #[must_use]
    pub fn is_no_handler(&self) -> bool {
        matches!(self, MediatorError::NoHandlerFound { .. })
    }

    /// `true` for [`MediatorError::HandlerFailed`].
    #[must_use]
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, MediatorError::HandlerFailed { .. })
    }
}

impl fmt::Display for MediatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediatorError::NoHandlerFound { kind, request_type } => {
                write!(f, "no {kind} handler registered for '{request_type}'")
            }
            MediatorError::HandlerFailed {
                request_type,
                source,
            } => {
                write!(f, "handler for '{request_type}' failed: {source}")
            }
            MediatorError::Timeout {
                request_type,
                waited,
            } => {
                write!(
                    f,
                    "timed out after {}ms waiting for '{request_type}'",
                    waited.as_millis()
                )
            }
            MediatorError::DuplicateHandler { kind, request_type } => {
                write!(
                    f,
                    "duplicate {kind} handler registered for '{request_type}'"
                )
            }
            MediatorError::ShutDown => write!(f, "mediator has been shut down"),
            MediatorError::Channel(err) => write!(f, "channel error: {err}"),
            MediatorError::Spawn(msg) => write!(f, "failed to spawn consumer thread: {msg}"),
            MediatorError::InvalidConfig(msg) => write!(f, "invalid mediator configuration: {msg}"),
            MediatorError::Internal(msg) => write!(f, "internal mediator error: {msg}"),
        }
    }
}

impl std::error::Error for MediatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MediatorError::HandlerFailed { source, .. } => {
                let inner: &(dyn std::error::Error + 'static) = &***source;
                Some(inner)
            }
            MediatorError::Channel(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ChannelError> for MediatorError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => MediatorError::ShutDown,
            other => MediatorError::Channel(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_names_request_type() {
        let err = MediatorError::NoHandlerFound {
            kind: RequestKind::Query,
            request_type: "app::GetUser",
        };
        assert_eq!(
            err.to_string(),
            "no query handler registered for 'app::GetUser'"
        );
        assert!(err.is_no_handler());
    }

    #[test]
    fn test_handler_failure_exposes_source() {
        let err = MediatorError::handler_failed("app::Charge", anyhow::anyhow!("card declined"));
        assert!(err.is_handler_failure());
        assert!(err.to_string().contains("card declined"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("card declined"));
    }

    #[test]
    fn test_closed_channel_maps_to_shutdown() {
        let err: MediatorError = ChannelError::Closed.into();
        assert!(matches!(err, MediatorError::ShutDown));
        let err: MediatorError = ChannelError::Full.into();
        assert!(matches!(err, MediatorError::Channel(ChannelError::Full)));
    }

    #[test]
    fn test_timeout_message() {
        let err = MediatorError::Timeout {
            request_type: "app::Slow",
            waited: Duration::from_millis(250),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "timed out after 250ms waiting for 'app::Slow'");
    }
}
