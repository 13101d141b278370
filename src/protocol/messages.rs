use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Request (host → runner)
// ============================================================================

/// One unit of work for the runner, serialized as a single stdin line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub code: String,
    /// Packages installed with micropip before the code runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<String>>,
    /// Shared-folder paths copied into the sandbox filesystem before running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_in: Option<Vec<PathBuf>>,
    /// Sandbox paths copied back to the shared folder afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_out: Option<Vec<PathBuf>>,
}

/// Reasons a request is refused before anything is launched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("code must not be empty")]
    EmptyCode,

    #[error("{label} path must not be empty")]
    EmptyPath { label: &'static str },

    #[error("{label} path '{path}' must be relative")]
    AbsolutePath { label: &'static str, path: String },

    #[error("{label} path '{path}' escapes the shared folder")]
    EscapingPath { label: &'static str, path: String },
}

impl Request {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            packages: None,
            sync_in: None,
            sync_out: None,
        }
    }

    /// Reject empty code and sync paths that could reach outside the shared folder.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.code.trim().is_empty() {
            return Err(RequestError::EmptyCode);
        }
        for path in self.sync_in.iter().flatten() {
            validate_sync_path(path, "sync_in")?;
        }
        for path in self.sync_out.iter().flatten() {
            validate_sync_path(path, "sync_out")?;
        }
        Ok(())
    }
}

fn validate_sync_path(path: &Path, label: &'static str) -> Result<(), RequestError> {
    if path.as_os_str().is_empty() {
        return Err(RequestError::EmptyPath { label });
    }
    let display = || path.display().to_string();
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(RequestError::AbsolutePath {
                    label,
                    path: display(),
                });
            }
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth.checked_sub(1).ok_or_else(|| RequestError::EscapingPath {
                    label,
                    path: display(),
                })?;
            }
            Component::Normal(_) => depth += 1,
        }
    }
    Ok(())
}

// ============================================================================
// Result (runner → host)
// ============================================================================

/// Terminal value of a session.
///
/// Serializes exactly as the runner emits it: `{"output": ...}` or
/// `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionResult {
    Output(Value),
    Error(String),
}

/// The `@@RESULT@@` payload was not usable.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("RESULT payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("RESULT payload has an unrecognized shape: {0}")]
    Shape(#[source] serde_json::Error),
}

impl ExecutionResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Output(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Output(_) => None,
            Self::Error(message) => Some(message),
        }
    }

    /// Decode a `@@RESULT@@` payload.
    ///
    /// An empty object means the code evaluated to nothing the runner could
    /// serialize; in that case the last `[py]` print stands in as the output.
    /// That fallback never applies to a payload that fails to decode.
    pub fn from_payload(payload: &str, last_print: Option<&str>) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(payload).map_err(DecodeError::Malformed)?;
        if value.as_object().is_some_and(|map| map.is_empty()) {
            let output = last_print
                .map(|text| Value::String(text.to_string()))
                .unwrap_or(Value::Null);
            return Ok(Self::Output(output));
        }
        serde_json::from_value(value).map_err(DecodeError::Shape)
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Output(value) => serde_json::json!({ "output": value }),
            Self::Error(message) => serde_json::json!({ "error": message }),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Non-terminal line forwarded to the caller while a session runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Event {
    /// `[log]` record from Python's `logging` module
    LogHost(String),
    /// `[runner]` lifecycle line, or unprefixed stderr from the runtime itself
    LogChild(String),
    /// Unprefixed line read from the runner's stdout pipe
    LogChildStdout(String),
    /// `[py]` user print
    LogChildStdoutTagged(String),
    /// Unprefixed line read from the merged stdout+stderr pipe
    RawStdout(String),
}

impl Event {
    pub fn text(&self) -> &str {
        match self {
            Event::LogHost(text)
            | Event::LogChild(text)
            | Event::LogChildStdout(text)
            | Event::LogChildStdoutTagged(text)
            | Event::RawStdout(text) => text,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Event::LogHost(_) => "python log",
            Event::LogChild(_) => "deno log",
            Event::LogChildStdout(_) | Event::RawStdout(_) => "stdout",
            Event::LogChildStdoutTagged(_) => "python",
        }
    }
}
