use thiserror::Error;

/// Errors raised by the detection pipeline.
///
/// Payloads are plain strings so one error can be logged and also handed to
/// every loop subscriber.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    /// Model or label artifact missing or malformed.
    #[error("resource error: {0}")]
    Resource(String),

    /// Input shape mismatch or interpreter failure.
    #[error("inference error: {0}")]
    Inference(String),

    /// Frame source unavailable or capture failure.
    #[error("capture error: {message}")]
    Capture { message: String, fatal: bool },

    /// Listener removal for a label that was never registered.
    #[error("no listener registered for label '{0}'")]
    NotFound(String),

    #[error("detection loop is already running")]
    AlreadyRunning,

    #[error("detection loop is not running")]
    NotRunning,
}

impl DetectError {
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Capture failure that the next attempt may not hit again.
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
            fatal: false,
        }
    }

    /// Capture failure that will not resolve itself (device gone).
    pub fn capture_fatal(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
            fatal: true,
        }
    }

    /// Fatal errors stop the detection loop instead of being retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Resource(_) => true,
            Self::Capture { fatal, .. } => *fatal,
            _ => false,
        }
    }
}

pub type Result<T, E = DetectError> = std::result::Result<T, E>;
