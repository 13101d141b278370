use super::clock::TimeoutClock;
use super::error::SandboxError;
use super::pump::{PumpMessage, POLL_INTERVAL};
use super::supervisor::{Lease, Supervisor};
use crate::config::ClockStart;
use crate::protocol::{
    classify, is_user_code_sentinel, Classified, Event, ExecutionResult, Origin, RUNNER_PREFIX,
};
use crate::telemetry::content_logging_enabled;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Timing knobs for one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub timeout: Duration,
    pub clock_start: ClockStart,
    /// Cap on the wait for the user-code sentinel while the clock is unarmed.
    pub startup_timeout: Duration,
}

/// One item yielded by an [`Execution`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionItem {
    Event(Event),
    /// Always the last item.
    Result(ExecutionResult),
}

impl SessionItem {
    pub fn into_result(self) -> Option<ExecutionResult> {
        match self {
            SessionItem::Result(result) => Some(result),
            SessionItem::Event(_) => None,
        }
    }
}

enum State<'a> {
    /// Not yet started: the encoded request line, or why it could not be built.
    Starting(Result<String, SandboxError>),
    Draining(Lease<'a>),
    Finished,
}

/// A running request: events as they arrive, then exactly one result.
///
/// Dropping an unfinished execution kills its runtime.
pub struct Execution<'a> {
    supervisor: &'a Supervisor,
    options: SessionOptions,
    state: State<'a>,
    clock: TimeoutClock,
    startup_deadline: Option<Instant>,
    payload: Option<String>,
    last_print: Option<String>,
    child_id: Option<u32>,
    started_at: Option<Instant>,
}

impl<'a> Execution<'a> {
    pub(crate) fn new(
        supervisor: &'a Supervisor,
        prepared: Result<String, SandboxError>,
        options: SessionOptions,
    ) -> Self {
        Self {
            supervisor,
            options,
            state: State::Starting(prepared),
            clock: TimeoutClock::new(options.timeout),
            startup_deadline: None,
            payload: None,
            last_print: None,
            child_id: None,
            started_at: None,
        }
    }

    /// Pid of the runtime serving this execution, once one was acquired.
    pub fn child_id(&self) -> Option<u32> {
        self.child_id
    }

    fn start(&mut self, prepared: Result<String, SandboxError>) -> Option<SessionItem> {
        let line = match prepared {
            Ok(line) => line,
            Err(err) => return Some(self.fail(err)),
        };
        let mut lease = match self.supervisor.acquire() {
            Ok(lease) => lease,
            Err(err) => return Some(self.fail(err)),
        };
        let now = Instant::now();
        self.started_at = Some(now);
        let child = lease.child();
        let pid = child.id();
        self.child_id = Some(pid);
        info!(
            pid,
            reused = lease.reused(),
            timeout_ms = self.options.timeout.as_millis() as u64,
            clock_start = self.options.clock_start.label(),
            "sandbox execution started"
        );

        if let Err(err) = lease.child().write_line(&line) {
            self.state = State::Draining(lease);
            return Some(self.fail(SandboxError::pipe("writing the request", err)));
        }

        match self.options.clock_start {
            ClockStart::Session => {
                self.clock.arm(now);
            }
            ClockStart::UserCode => {
                self.startup_deadline = Some(now + self.options.startup_timeout);
            }
        }
        self.state = State::Draining(lease);
        None
    }

    fn drain(&mut self) -> SessionItem {
        loop {
            let now = Instant::now();
            if self.clock.expired(now) {
                return self.fail(SandboxError::Timeout);
            }
            if !self.clock.is_armed() && self.startup_deadline.is_some_and(|d| now >= d) {
                return self.fail(SandboxError::StartupTimeout);
            }
            let wait = self
                .clock
                .remaining(now)
                .or_else(|| {
                    self.startup_deadline
                        .map(|deadline| deadline.saturating_duration_since(now))
                })
                .map_or(POLL_INTERVAL, |left| left.min(POLL_INTERVAL));

            let (message, closed) = match &mut self.state {
                State::Draining(lease) => {
                    let child = lease.child();
                    let message = child.poll(wait);
                    (message, child.streams_closed())
                }
                _ => {
                    return self.fail(SandboxError::Protocol(
                        "execution is not attached to a runtime".to_string(),
                    ))
                }
            };

            match message {
                Some(PumpMessage::Line { origin, text }) => {
                    if let Some(item) = self.handle_line(&text, origin) {
                        return item;
                    }
                }
                Some(PumpMessage::Closed { origin }) => {
                    debug!(origin = origin.as_str(), "sandbox stream reached end");
                }
                None => {}
            }
            if closed {
                return self.finish_closed();
            }
        }
    }

    fn handle_line(&mut self, line: &str, origin: Origin) -> Option<SessionItem> {
        match classify(line, origin) {
            Classified::Result(payload) => {
                trace!(bytes = payload.len(), "result payload received");
                self.payload = Some(payload);
                None
            }
            Classified::Done => Some(self.finish_done()),
            Classified::Event(event) => {
                if let Event::LogChildStdoutTagged(text) = &event {
                    self.last_print = Some(text.clone());
                }
                if !self.clock.is_armed()
                    && line.starts_with(RUNNER_PREFIX)
                    && is_user_code_sentinel(event.text())
                {
                    self.clock.arm(Instant::now());
                    debug!(
                        limit_ms = self.clock.limit().as_millis() as u64,
                        "user code started; timeout clock armed"
                    );
                }
                if content_logging_enabled() {
                    trace!(kind = event.label(), text = event.text(), "sandbox event");
                } else {
                    trace!(kind = event.label(), "sandbox event");
                }
                Some(SessionItem::Event(event))
            }
        }
    }

    fn finish_done(&mut self) -> SessionItem {
        match self.payload.take() {
            Some(payload) => {
                match ExecutionResult::from_payload(&payload, self.last_print.as_deref()) {
                    Ok(result) => self.complete(result),
                    Err(err) => self.fail(err.into()),
                }
            }
            None => self.complete(SandboxError::no_result().into()),
        }
    }

    /// Every stream ended before the done marker; the runtime is gone.
    fn finish_closed(&mut self) -> SessionItem {
        match self.payload.take() {
            Some(payload) => {
                match ExecutionResult::from_payload(&payload, self.last_print.as_deref()) {
                    Ok(result) => {
                        debug!("sandbox runtime exited after RESULT without DONE");
                        self.release(false);
                        self.finished(result)
                    }
                    Err(err) => self.fail(err.into()),
                }
            }
            None => self.fail(SandboxError::closed_without_result()),
        }
    }

    fn complete(&mut self, result: ExecutionResult) -> SessionItem {
        self.release(true);
        self.finished(result)
    }

    fn fail(&mut self, err: SandboxError) -> SessionItem {
        warn!(kind = err.kind(), error = %err, "sandbox execution failed");
        self.release(false);
        self.finished(err.into())
    }

    fn release(&mut self, clean: bool) {
        if let State::Draining(lease) = std::mem::replace(&mut self.state, State::Finished) {
            if clean {
                lease.complete();
            } else {
                lease.discard();
            }
        }
    }

    fn finished(&mut self, result: ExecutionResult) -> SessionItem {
        self.state = State::Finished;
        let elapsed_ms = self
            .started_at
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or_default();
        info!(
            pid = self.child_id,
            elapsed_ms,
            is_error = result.is_error(),
            "sandbox execution finished"
        );
        SessionItem::Result(result)
    }
}

impl Iterator for Execution<'_> {
    type Item = SessionItem;

    fn next(&mut self) -> Option<SessionItem> {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Finished => None,
            State::Starting(prepared) => match self.start(prepared) {
                Some(item) => Some(item),
                None => Some(self.drain()),
            },
            draining @ State::Draining(_) => {
                self.state = draining;
                Some(self.drain())
            }
        }
    }
}

impl Drop for Execution<'_> {
    fn drop(&mut self) {
        if let State::Draining(lease) = std::mem::replace(&mut self.state, State::Finished) {
            debug!(pid = self.child_id, "execution dropped before completion");
            lease.discard();
        }
    }
}
