//! Execution engine: runs one request against a supervised runtime process.
//!
//! ```text
//! Sandbox::run ─► Execution ─► Supervisor::acquire ─► ChildHandle
//!                     ▲                                   │ stdout / stderr
//!                     └──────── crossbeam channel ◄─── pump threads
//! ```

mod clock;
mod error;
mod pump;
mod session;
mod signal;
mod supervisor;


use crate::config::SandboxConfig;
use crate::protocol::{encode, ExecutionResult, Request};
use crate::telemetry::content_logging_enabled;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub use clock::TimeoutClock;
pub use error::{SandboxError, NO_RESULT_MESSAGE, TIMEOUT_MESSAGE};
pub use pump::{spawn_pump, PumpMessage, POLL_INTERVAL};
pub use session::{Execution, SessionItem, SessionOptions};
pub use signal::process_exists;
pub use supervisor::{permission_flags, ChildHandle, LaunchSpec, Lease, Supervisor};

/// Caller-facing request. Packages come from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteRequest {
    code: String,
    timeout: Option<Duration>,
    sync_in: Option<Vec<PathBuf>>,
    sync_out: Option<Vec<PathBuf>>,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Override the configured timeout for this request only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shared-folder paths copied into the sandbox before the code runs.
    pub fn sync_in<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.sync_in = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Sandbox paths copied back to the shared folder afterwards.
    pub fn sync_out<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.sync_out = Some(paths.into_iter().map(Into::into).collect());
        self
    }
}

/// Entry point for running Python code in the sandbox runtime.
pub struct Sandbox {
    config: SandboxConfig,
    supervisor: Supervisor,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let supervisor = Supervisor::from_config(&config);
        Self { config, supervisor }
    }

    pub fn with_supervisor(config: SandboxConfig, supervisor: Supervisor) -> Self {
        Self { config, supervisor }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Start a request. Nothing is launched until the first `next()`.
    pub fn run(&self, request: ExecuteRequest) -> Execution<'_> {
        let options = SessionOptions {
            timeout: request.timeout.unwrap_or_else(|| self.config.timeout()),
            clock_start: self.config.timeout_start,
            startup_timeout: self.config.startup_timeout(),
        };
        let prepared = self.prepare(request);
        Execution::new(&self.supervisor, prepared, options)
    }

    /// Run a request to completion and return only its result.
    pub fn execute(&self, request: ExecuteRequest) -> ExecutionResult {
        self.run(request)
            .filter_map(SessionItem::into_result)
            .last()
            .unwrap_or_else(|| SandboxError::no_result().into())
    }

    /// Stop any runtime held for reuse.
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    fn prepare(&self, request: ExecuteRequest) -> Result<String, SandboxError> {
        let ExecuteRequest {
            code,
            sync_in,
            sync_out,
            ..
        } = request;
        let mut wire = Request::new(code);
        if !self.config.packages.is_empty() {
            wire.packages = Some(self.config.packages.clone());
        }
        wire.sync_in = sync_in;
        wire.sync_out = sync_out;
        wire.validate()?;
        if content_logging_enabled() {
            debug!(code = %wire.code, "submitting code");
        } else {
            debug!(code_bytes = wire.code.len(), "submitting code");
        }
        Ok(encode(&wire)?)
    }
}
