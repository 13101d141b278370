use clap::Parser;
use pyodide_sandbox::config::SandboxConfig;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(about = "Pyodide sandbox", author, version)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) sandbox: SandboxConfig,

    /// Python source to run (takes precedence over FILE and stdin)
    #[arg(long = "code", short = 'c', value_name = "SOURCE")]
    pub(crate) code: Option<String>,

    /// Python file to run; reads stdin when omitted or "-"
    #[arg(value_name = "FILE")]
    pub(crate) file: Option<PathBuf>,

    /// Timeout for this run only (seconds), overriding --timeout-secs
    #[arg(long = "run-timeout-secs", value_name = "SECS")]
    pub(crate) run_timeout_secs: Option<u64>,

    /// Shared-folder path to copy into the sandbox (repeatable)
    #[arg(long = "sync-in", value_name = "PATH")]
    pub(crate) sync_in: Vec<PathBuf>,

    /// Sandbox path to copy back to the shared folder (repeatable)
    #[arg(long = "sync-out", value_name = "PATH")]
    pub(crate) sync_out: Vec<PathBuf>,

    /// Do not echo runtime events to stderr
    #[arg(long = "quiet", short = 'q', default_value_t = false)]
    pub(crate) quiet: bool,
}
