//! Error type shared by all pipeline operations.

use crate::pipeline::PipelineState;

/// A specialized Result type for receiver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for receiver operations.
///
/// The enum is `Clone` so that every thread blocked in
/// [`Pipeline::wait`](crate::pipeline::Pipeline::wait) can be handed the
/// same terminal fault.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The sample source or audio sink could not be opened.
    /// Surfaced at construction, never retried.
    #[error("failed to open device: {0}")]
    DeviceInit(String),

    /// An operation was invoked in a state that forbids it.
    #[error("cannot {operation} a {state:?} pipeline")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },

    /// A parameter was rejected before any stage was mutated.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An I/O fault on the running stream. Fatal to the pipeline
    /// instance; observed through `wait()`.
    #[error("stream fault: {0}")]
    Stream(String),
}

impl Error {
    pub fn device_init<S: Into<String>>(msg: S) -> Self {
        Error::DeviceInit(msg.into())
    }

    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        Error::InvalidParameter(msg.into())
    }

    pub fn stream<S: Into<String>>(msg: S) -> Self {
        Error::Stream(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::device_init("no such device");
        assert_eq!(err.to_string(), "failed to open device: no such device");

        let err = Error::InvalidState {
            operation: "start",
            state: PipelineState::Running,
        };
        assert_eq!(err.to_string(), "cannot start a Running pipeline");
    }

    #[test]
    fn test_clone_keeps_message() {
        let err = Error::stream("read timed out");
        assert_eq!(err.clone().to_string(), err.to_string());
    }
}
