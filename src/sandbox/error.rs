use crate::protocol::{DecodeError, ExecutionResult, RequestError};
use std::io;
use thiserror::Error;

/// Message reported when the runner finishes without a `@@RESULT@@` line.
pub const NO_RESULT_MESSAGE: &str = "Execution ended with no RESULT - unclear if successful";

/// Message reported when the timeout clock elapses.
pub const TIMEOUT_MESSAGE: &str = "Timeout waiting for code to finish";

/// Everything that can end a session early or ambiguously.
///
/// None of these escape [`crate::Sandbox::run`]; each one becomes the
/// terminal `{"error": ...}` value of the session.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("Failed to start sandbox runtime '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Sandbox pipe failed while {phase}: {source}")]
    Pipe {
        phase: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Protocol(String),

    #[error("{}", TIMEOUT_MESSAGE)]
    Timeout,

    #[error("{} (runtime never started user code)", TIMEOUT_MESSAGE)]
    StartupTimeout,

    #[error("Sandbox runtime is busy with another execution on this thread")]
    Busy,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SandboxError {
    pub(crate) fn launch(program: &str, source: io::Error) -> Self {
        Self::Launch {
            program: program.to_string(),
            source,
        }
    }

    pub(crate) fn pipe(phase: &'static str, source: io::Error) -> Self {
        Self::Pipe { phase, source }
    }

    pub(crate) fn no_result() -> Self {
        Self::Protocol(NO_RESULT_MESSAGE.to_string())
    }

    pub(crate) fn closed_without_result() -> Self {
        Self::Protocol("Sandbox runtime exited before sending a RESULT".to_string())
    }

    /// Short machine-friendly name used in trace events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Launch { .. } => "launch",
            Self::Pipe { .. } => "pipe",
            Self::Protocol(_) => "protocol",
            Self::Timeout => "timeout",
            Self::StartupTimeout => "startup_timeout",
            Self::Busy => "busy",
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
        }
    }
}

impl From<SandboxError> for ExecutionResult {
    fn from(err: SandboxError) -> Self {
        ExecutionResult::Error(err.to_string())
    }
}
