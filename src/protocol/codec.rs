use super::messages::{Event, Request};
use serde::Serialize;

pub const RESULT_PREFIX: &str = "@@RESULT@@";
pub const DONE_PREFIX: &str = "@@DONE@@";
pub const RUNNER_PREFIX: &str = "[runner]";
pub const LOG_PREFIX: &str = "[log]";
pub const PRINT_PREFIX: &str = "[py]";

/// Runner log text announcing that user code (not package setup) is now executing.
pub const USER_CODE_SENTINEL: &str = "Running user code...";

/// Which child pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Stdout,
    Stderr,
    /// stdout and stderr share one pipe
    Merged,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Stdout => "stdout",
            Origin::Stderr => "stderr",
            Origin::Merged => "merged",
        }
    }
}

/// Outcome of classifying one output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Event(Event),
    /// Trimmed `@@RESULT@@` payload, held until the done marker arrives
    Result(String),
    Done,
}

#[derive(Clone, Copy)]
enum Tag {
    Result,
    Done,
    Runner,
    Log,
    Print,
}

// Longest prefix first so a more specific tag always wins.
const TAGS: [(&str, Tag); 5] = [
    (RESULT_PREFIX, Tag::Result),
    (RUNNER_PREFIX, Tag::Runner),
    (DONE_PREFIX, Tag::Done),
    (LOG_PREFIX, Tag::Log),
    (PRINT_PREFIX, Tag::Print),
];

/// Serialize a request as one compact JSON line terminated by `\n`.
///
/// JSON string escaping keeps newlines in `code` from splitting the line.
pub fn encode(request: &Request) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

#[derive(Serialize)]
struct ShutdownCommand {
    shutdown: bool,
}

/// Control line that makes the runner leave its read loop and exit.
pub fn encode_shutdown() -> String {
    let mut line = serde_json::to_string(&ShutdownCommand { shutdown: true })
        .unwrap_or_else(|_| String::from(r#"{"shutdown":true}"#));
    line.push('\n');
    line
}

/// Classify one output line by its prefix.
pub fn classify(line: &str, origin: Origin) -> Classified {
    let line = line.trim_end_matches(['\r', '\n']);
    for (prefix, tag) in TAGS {
        let Some(rest) = line.strip_prefix(prefix) else {
            continue;
        };
        let text = rest.trim().to_string();
        return match tag {
            Tag::Result => Classified::Result(text),
            Tag::Done => Classified::Done,
            Tag::Runner => Classified::Event(Event::LogChild(text)),
            Tag::Log => Classified::Event(Event::LogHost(text)),
            Tag::Print => Classified::Event(Event::LogChildStdoutTagged(text)),
        };
    }

    let text = line.trim().to_string();
    Classified::Event(match origin {
        Origin::Stdout => Event::LogChildStdout(text),
        Origin::Stderr => Event::LogChild(text),
        Origin::Merged => Event::RawStdout(text),
    })
}

/// True when a `[runner]` message marks the start of user code.
///
/// The runner decorates the message with an emoji, so leading symbols are ignored.
pub fn is_user_code_sentinel(text: &str) -> bool {
    text.trim()
        .trim_start_matches(|ch: char| !ch.is_alphanumeric())
        .trim_start()
        == USER_CODE_SENTINEL
}
