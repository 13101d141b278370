use crate::config::SandboxConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static LOG_CONTENT: AtomicBool = AtomicBool::new(false);

pub(crate) fn tracing_log_path() -> PathBuf {
    env::var("SANDBOX_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("pyodide_sandbox_trace.jsonl"))
}

/// Install the JSON trace subscriber once per process when logs are enabled.
pub fn init_tracing(config: &SandboxConfig) {
    LOG_CONTENT.store(
        config.log_content && config.logging_enabled(),
        Ordering::Relaxed,
    );
    if !config.logging_enabled() {
        return;
    }

    let _ = TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path();
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(_) => return,
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Submitted code and runtime output only reach the trace log when opted in.
pub(crate) fn content_logging_enabled() -> bool {
    LOG_CONTENT.load(Ordering::Relaxed)
}
