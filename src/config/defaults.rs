use super::{ClockStart, ProcessPolicy, StreamMode};

pub(super) const DEFAULT_RUNNER_SCRIPT: &str = "runner.ts";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 120;
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Cap on the number of preinstalled packages forwarded to micropip.
pub(super) const MAX_PACKAGES: usize = 64;
pub(super) const MAX_PACKAGE_NAME_BYTES: usize = 214;

pub(super) fn default_clock_start() -> ClockStart {
    ClockStart::UserCode
}

pub(super) fn default_process_policy() -> ProcessPolicy {
    ProcessPolicy::PerCall
}

pub(super) fn default_stream_mode() -> StreamMode {
    StreamMode::Separate
}
