//! Command-line / environment configuration and validation.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use defaults::{
    default_clock_start, default_process_policy, default_stream_mode, DEFAULT_RUNNER_SCRIPT,
};
pub use defaults::{
    DEFAULT_STARTUP_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
};

/// Options for launching the sandbox runtime. Validated values keep the child's argv sane.
#[derive(Debug, Parser, Clone)]
#[command(about = "Pyodide sandbox", author, version)]
pub struct SandboxConfig {
    /// Path to the Deno binary that hosts the runner
    #[arg(long = "deno-path", env = "DENO_PATH", default_value = "deno")]
    pub deno_path: String,

    /// Runner entry script passed to `deno run`
    #[arg(long = "runner-script", env = "SANDBOX_RUNNER", default_value = DEFAULT_RUNNER_SCRIPT)]
    pub runner_script: PathBuf,

    /// Host folder exposed to the sandbox as /shared
    #[arg(long = "shared-dir", env = "SANDBOX_SHARED_DIR")]
    pub shared_dir: Option<PathBuf>,

    /// JSON array of package names to install before running code
    #[arg(long = "packages", env = "SANDBOX_PACKAGES", value_name = "JSON")]
    pub packages_json: Option<String>,

    /// Parsed form of --packages, filled in by `validate`
    #[arg(skip)]
    pub packages: Vec<String>,

    /// Grant the runtime write access (only honored with --shared-dir)
    #[arg(
        long = "allow-write",
        env = "SANDBOX_ALLOW_WRITE",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub allow_write: bool,

    /// Ask the runner for verbose sync logs
    #[arg(
        long = "verbose",
        env = "VERBOSE",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub verbose: bool,

    /// Default wall-clock limit for one execution (seconds)
    #[arg(
        long = "timeout-secs",
        env = "SANDBOX_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    pub timeout_secs: u64,

    /// When the timeout clock starts counting
    #[arg(
        long = "timeout-start",
        env = "SANDBOX_TIMEOUT_START",
        value_enum,
        default_value_t = default_clock_start()
    )]
    pub timeout_start: ClockStart,

    /// Limit on runtime startup + package install when --timeout-start=user-code (seconds)
    #[arg(
        long = "startup-timeout-secs",
        env = "SANDBOX_STARTUP_TIMEOUT_SECS",
        default_value_t = DEFAULT_STARTUP_TIMEOUT_SECS
    )]
    pub startup_timeout_secs: u64,

    /// Keep one runtime alive across executions or start a fresh one each time
    #[arg(
        long = "process-policy",
        env = "SANDBOX_PROCESS_POLICY",
        value_enum,
        default_value_t = default_process_policy()
    )]
    pub process_policy: ProcessPolicy,

    /// Read stdout and stderr separately or through one shared pipe
    #[arg(
        long = "stream-mode",
        env = "SANDBOX_STREAM_MODE",
        value_enum,
        default_value_t = default_stream_mode()
    )]
    pub stream_mode: StreamMode,

    /// Enable trace logging to a file
    #[arg(
        long = "logs",
        env = "SANDBOX_LOGS",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub logs: bool,

    /// Disable all trace logging (overrides --logs)
    #[arg(
        long = "no-logs",
        env = "SANDBOX_NO_LOGS",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub no_logs: bool,

    /// Allow submitted code to appear in trace logs
    #[arg(
        long = "log-content",
        env = "SANDBOX_LOG_CONTENT",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub log_content: bool,
}

/// Starting point of the per-execution timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClockStart {
    /// Count from the moment the request is written
    Session,
    /// Count from the runner's "Running user code..." log line
    UserCode,
}

/// Lifetime of the runtime process relative to executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProcessPolicy {
    /// One runtime serves every execution until it dies or times out
    Reuse,
    /// Every execution gets a fresh runtime
    PerCall,
}

/// How the child's output pipes are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StreamMode {
    /// stdout and stderr each get a pipe and a reader thread
    Separate,
    /// stdout and stderr share one pipe and one reader thread
    Merged,
}

impl ClockStart {
    pub fn label(self) -> &'static str {
        match self {
            ClockStart::Session => "session",
            ClockStart::UserCode => "user-code",
        }
    }
}

impl ProcessPolicy {
    pub fn label(self) -> &'static str {
        match self {
            ProcessPolicy::Reuse => "reuse",
            ProcessPolicy::PerCall => "per-call",
        }
    }
}

impl StreamMode {
    pub fn label(self) -> &'static str {
        match self {
            StreamMode::Separate => "separate",
            StreamMode::Merged => "merged",
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Writes reach the host only through the shared folder, so both must be enabled.
    pub fn write_enabled(&self) -> bool {
        self.shared_dir.is_some() && self.allow_write
    }

    pub fn logging_enabled(&self) -> bool {
        self.logs && !self.no_logs
    }
}
