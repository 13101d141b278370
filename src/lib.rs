pub mod config;
mod lock;
pub mod protocol;
pub mod sandbox;
mod telemetry;

pub(crate) use lock::lock_or_recover;
pub use config::SandboxConfig;
pub use protocol::{Event, ExecutionResult};
pub use sandbox::{ExecuteRequest, Execution, Sandbox, SandboxError, SessionItem};
pub use telemetry::init_tracing;
