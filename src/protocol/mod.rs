//! Line protocol spoken with the sandbox runner.
//!
//! The host writes one JSON object per line to the runner's stdin and reads
//! newline-delimited text back. Output lines are tagged with a short prefix
//! so several logical channels share one byte stream:
//!
//! - `@@RESULT@@ {...}`: serialized execution result
//! - `@@DONE@@`: end of one request
//! - `[py] ...`: user `print` output
//! - `[runner] ...`: runner lifecycle logs
//! - `[log] ...`: Python `logging` records
//! - anything else: raw interpreter output
//!
//! A bare line that happens to start with one of these prefixes is
//! indistinguishable from a tagged one; the runner is trusted not to emit one.

mod codec;
mod messages;


pub use codec::{
    classify, encode, encode_shutdown, is_user_code_sentinel, Classified, Origin, DONE_PREFIX,
    LOG_PREFIX, PRINT_PREFIX, RESULT_PREFIX, RUNNER_PREFIX, USER_CODE_SENTINEL,
};
pub use messages::{DecodeError, Event, ExecutionResult, Request, RequestError};
