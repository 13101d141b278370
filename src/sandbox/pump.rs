use crate::protocol::Origin;
use crossbeam_channel::Sender;
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::thread;
use std::time::Duration;
use tracing::{trace, warn};

/// Upper bound on one blocking wait for child output, so deadline checks keep running
/// even when the child is silent.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Message sent from a pump to the session: a line, or the end of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpMessage {
    Line { origin: Origin, text: String },
    Closed { origin: Origin },
}

pub(super) fn should_retry_read_error(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted
}

/// Forward every line of `reader` into `tx`, then send exactly one `Closed`.
///
/// The thread is detached: it ends on EOF, on a read error, or once the receiving
/// side has been dropped.
pub fn spawn_pump<R>(
    reader: R,
    origin: Origin,
    tx: Sender<PumpMessage>,
) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("sandbox-pump-{}", origin.as_str()))
        .spawn(move || pump_lines(reader, origin, &tx))
}

fn pump_lines<R: Read>(reader: R, origin: Origin, tx: &Sender<PumpMessage>) {
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::with_capacity(256);
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                strip_line_ending(&mut buffer);
                // Lossy decode keeps one bad byte sequence from ending the stream.
                let text = String::from_utf8_lossy(&buffer).into_owned();
                if tx.send(PumpMessage::Line { origin, text }).is_err() {
                    trace!(origin = origin.as_str(), "pump receiver gone");
                    return;
                }
            }
            Err(err) if should_retry_read_error(&err) => continue,
            Err(err) => {
                warn!(origin = origin.as_str(), error = %err, "sandbox stream read failed");
                break;
            }
        }
    }
    trace!(origin = origin.as_str(), "sandbox stream closed");
    let _ = tx.send(PumpMessage::Closed { origin });
}

fn strip_line_ending(buffer: &mut Vec<u8>) {
    if buffer.last() == Some(&b'\n') {
        buffer.pop();
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
    }
}
