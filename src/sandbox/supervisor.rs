//! Ownership of the sandbox runtime process.
//!
//! A [`Supervisor`] holds at most one live child. Sessions borrow it through a
//! [`Lease`], which keeps the slot locked so two sessions never talk to the same
//! runtime at once. How the child is released depends on the [`ProcessPolicy`].

use super::error::SandboxError;
use super::pump::{spawn_pump, PumpMessage};
use super::signal::{send_signal, should_send_sigkill, Signal};
use crate::config::{ProcessPolicy, SandboxConfig, StreamMode};
use crate::lock_or_recover;
use crate::protocol::{encode_shutdown, Origin};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const EXIT_POLL: Duration = Duration::from_millis(10);

/// Program, arguments and environment used to start the runtime.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    program: String,
    args: Vec<OsString>,
    env: Vec<(String, Option<OsString>)>,
    stream_mode: StreamMode,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stream_mode: StreamMode::Separate,
        }
    }

    /// `<deno> run <permissions> <runner>` with the runner's env contract.
    pub fn from_config(config: &SandboxConfig) -> Self {
        let mut spec = Self::new(config.deno_path.clone()).arg("run");
        for flag in permission_flags(config) {
            spec = spec.arg(flag);
        }
        spec = spec
            .arg(config.runner_script.as_os_str())
            .env("VERBOSE", if config.verbose { "true" } else { "false" });
        spec = match &config.shared_dir {
            Some(dir) => spec.env("SHARED_DIR", dir.as_os_str()),
            None => spec.env_remove("SHARED_DIR"),
        };
        spec.stream_mode(config.stream_mode)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), Some(value.into())));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env.push((key.into(), None));
        self
    }

    pub fn stream_mode(mut self, mode: StreamMode) -> Self {
        self.stream_mode = mode;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Last value set for `key`: `Some(None)` means explicitly removed.
    pub fn env_value(&self, key: &str) -> Option<Option<&OsStr>> {
        self.env
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_deref())
    }

    pub fn mode(&self) -> StreamMode {
        self.stream_mode
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::piped());
        for (key, value) in &self.env {
            match value {
                Some(value) => command.env(key, value),
                None => command.env_remove(key),
            };
        }
        command
    }

    /// Start the child and its stream pumps.
    pub fn launch(&self) -> Result<ChildHandle, SandboxError> {
        let launch_err = |err: io::Error| SandboxError::launch(&self.program, err);
        let mut command = self.command();
        let (tx, rx) = crossbeam_channel::unbounded();

        let (mut child, readers): (Child, Vec<(Box<dyn Read + Send>, Origin)>) =
            match self.stream_mode {
                StreamMode::Separate => {
                    command.stdout(Stdio::piped()).stderr(Stdio::piped());
                    let mut child = command.spawn().map_err(launch_err)?;
                    match take_separate_streams(&mut child) {
                        Ok(readers) => (child, readers),
                        Err(err) => {
                            reap(&mut child);
                            return Err(launch_err(err));
                        }
                    }
                }
                StreamMode::Merged => {
                    let (reader, writer) = merged_pipe().map_err(launch_err)?;
                    let writer_err = writer.try_clone().map_err(launch_err)?;
                    command
                        .stdout(Stdio::from(writer))
                        .stderr(Stdio::from(writer_err));
                    let child = command.spawn().map_err(launch_err)?;
                    // Our copies of the write end must go or the reader never sees EOF.
                    drop(command);
                    let reader: Box<dyn Read + Send> = Box::new(reader);
                    (child, vec![(reader, Origin::Merged)])
                }
            };

        let open_streams = readers.len();
        for (reader, origin) in readers {
            if let Err(err) = spawn_pump(reader, origin, tx.clone()) {
                reap(&mut child);
                return Err(launch_err(err));
            }
        }
        drop(tx);

        let stdin = child.stdin.take();
        info!(
            pid = child.id(),
            program = %self.program,
            stream_mode = self.stream_mode.label(),
            "sandbox runtime started"
        );
        Ok(ChildHandle {
            child,
            stdin,
            output: rx,
            open_streams,
        })
    }
}

/// Permission flags passed to `deno run`, derived from config only.
pub fn permission_flags(config: &SandboxConfig) -> Vec<&'static str> {
    let mut flags = vec!["--allow-read"];
    if config.write_enabled() {
        flags.push("--allow-write");
    }
    if !config.packages.is_empty() {
        flags.push("--allow-net");
    }
    flags
}

fn take_separate_streams(child: &mut Child) -> io::Result<Vec<(Box<dyn Read + Send>, Origin)>> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(ErrorKind::BrokenPipe, "stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(ErrorKind::BrokenPipe, "stderr was not captured"))?;
    let stdout: Box<dyn Read + Send> = Box::new(stdout);
    let stderr: Box<dyn Read + Send> = Box::new(stderr);
    Ok(vec![(stdout, Origin::Stdout), (stderr, Origin::Stderr)])
}

/// One OS pipe shared by the child's stdout and stderr.
#[cfg(unix)]
fn merged_pipe() -> io::Result<(File, File)> {
    use std::os::unix::io::FromRawFd;

    let mut fds = [0 as libc::c_int; 2];
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let rc = unsafe {
        let rc = libc::pipe(fds.as_mut_ptr());
        if rc == 0 {
            libc::fcntl(fds[0], libc::F_SETFD, libc::FD_CLOEXEC);
            libc::fcntl(fds[1], libc::F_SETFD, libc::FD_CLOEXEC);
        }
        rc
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let reader = unsafe { File::from_raw_fd(fds[0]) };
    let writer = unsafe { File::from_raw_fd(fds[1]) };
    Ok((reader, writer))
}

#[cfg(not(unix))]
fn merged_pipe() -> io::Result<(File, File)> {
    Err(io::Error::new(
        ErrorKind::Unsupported,
        "merged stream mode requires a unix platform",
    ))
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// A running runtime: its stdin, and the merged queue of lines from its pumps.
pub struct ChildHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    output: Receiver<PumpMessage>,
    open_streams: usize,
}

impl ChildHandle {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one already-terminated line and flush it.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(ErrorKind::BrokenPipe, "sandbox stdin is closed"))?;
        stdin.write_all(line.as_bytes())?;
        stdin.flush()
    }

    /// Wait up to `timeout` for the next pump message.
    pub fn poll(&mut self, timeout: Duration) -> Option<PumpMessage> {
        match self.output.recv_timeout(timeout) {
            Ok(message) => {
                self.note(&message);
                Some(message)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.open_streams = 0;
                None
            }
        }
    }

    /// True once every stream has reported end-of-stream.
    pub fn streams_closed(&self) -> bool {
        self.open_streams == 0
    }

    /// Drop lines left over from an earlier session on a reused runtime.
    pub fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        loop {
            match self.output.try_recv() {
                Ok(message) => {
                    self.note(&message);
                    if matches!(message, PumpMessage::Line { .. }) {
                        dropped += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.open_streams = 0;
                    break;
                }
            }
        }
        dropped
    }

    fn note(&mut self, message: &PumpMessage) {
        if let PumpMessage::Closed { .. } = message {
            self.open_streams = self.open_streams.saturating_sub(1);
        }
    }

    /// Forceful stop: SIGKILL and reap.
    pub fn kill(&mut self) {
        self.stdin.take();
        if !self.is_alive() {
            return;
        }
        let pid = self.id();
        if let Err(err) = self.child.kill() {
            debug!(pid, error = %err, "kill on sandbox runtime failed");
        }
        self.reap(pid);
    }

    fn reap(&mut self, pid: u32) {
        match self.child.wait() {
            Ok(status) => debug!(pid, %status, "sandbox runtime killed"),
            Err(err) => warn!(pid, error = %err, "failed to reap sandbox runtime"),
        }
    }

    /// Polite stop: shutdown request, SIGTERM, then SIGKILL after a grace period.
    pub fn terminate(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin
                .write_all(encode_shutdown().as_bytes())
                .and_then(|()| stdin.flush());
        }
        if !self.is_alive() {
            return;
        }
        let pid = self.id();
        send_signal(pid, Signal::Term);
        let requested_at = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid, %status, "sandbox runtime terminated");
                    return;
                }
                Ok(None) => {
                    if should_send_sigkill(false, Some(requested_at), Instant::now()) {
                        debug!(pid, "sandbox runtime ignored SIGTERM; killing");
                        send_signal(pid, Signal::Kill);
                        self.reap(pid);
                        return;
                    }
                    thread::sleep(EXIT_POLL);
                }
                Err(err) => {
                    warn!(pid, error = %err, "failed to poll sandbox runtime");
                    self.kill();
                    return;
                }
            }
        }
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Owns the runtime slot and launches children into it on demand.
pub struct Supervisor {
    spec: LaunchSpec,
    policy: ProcessPolicy,
    slot: Mutex<Option<ChildHandle>>,
    /// Thread currently holding a lease, so a second lease on it fails fast.
    owner: Mutex<Option<ThreadId>>,
    launches: AtomicU64,
}

impl Supervisor {
    pub fn new(spec: LaunchSpec, policy: ProcessPolicy) -> Self {
        Self {
            spec,
            policy,
            slot: Mutex::new(None),
            owner: Mutex::new(None),
            launches: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(LaunchSpec::from_config(config), config.process_policy)
    }

    /// Number of runtimes started so far.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    fn held_by_current_thread(&self) -> bool {
        *lock_or_recover(&self.owner, "sandbox supervisor owner") == Some(thread::current().id())
    }

    /// Take exclusive use of a live runtime, starting one when the slot is
    /// empty or its child has died. Blocks while another thread holds a
    /// lease; fails with [`SandboxError::Busy`] when this thread already does.
    pub fn acquire(&self) -> Result<Lease<'_>, SandboxError> {
        if self.held_by_current_thread() {
            return Err(SandboxError::Busy);
        }
        let mut guard = lock_or_recover(&self.slot, "sandbox supervisor slot");
        let owner = OwnerMark::claim(&self.owner);
        let reusable = match guard.take() {
            Some(mut handle) => {
                if handle.is_alive() {
                    let dropped = handle.discard_pending();
                    if dropped > 0 {
                        debug!(dropped, "discarded stale runtime output");
                    }
                    Some(handle)
                } else {
                    debug!(pid = handle.id(), "held sandbox runtime exited; relaunching");
                    handle.kill();
                    None
                }
            }
            None => None,
        };
        let (handle, reused) = match reusable {
            Some(handle) => (handle, true),
            None => {
                let handle = self.spec.launch()?;
                self.launches.fetch_add(1, Ordering::SeqCst);
                (handle, false)
            }
        };
        Ok(Lease {
            guard,
            _owner: owner,
            handle,
            policy: self.policy,
            reused,
        })
    }

    /// Pid of the runtime currently held for reuse, if it is still running.
    /// `None` while a session holds the runtime.
    pub fn held_child_id(&self) -> Option<u32> {
        let mut guard = match self.slot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        guard
            .as_mut()
            .and_then(|handle| handle.is_alive().then(|| handle.id()))
    }

    /// Terminate any held runtime. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if self.held_by_current_thread() {
            warn!("sandbox shutdown requested while this thread holds a session; skipped");
            return;
        }
        let held = lock_or_recover(&self.slot, "sandbox supervisor slot").take();
        if let Some(mut handle) = held {
            debug!(pid = handle.id(), "shutting down held sandbox runtime");
            handle.terminate();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive use of one runtime for the length of a session.
///
/// Dropping a lease without calling [`Lease::complete`] kills the runtime.
pub struct Lease<'a> {
    guard: MutexGuard<'a, Option<ChildHandle>>,
    _owner: OwnerMark<'a>,
    handle: ChildHandle,
    policy: ProcessPolicy,
    reused: bool,
}

impl Lease<'_> {
    pub fn child(&mut self) -> &mut ChildHandle {
        &mut self.handle
    }

    pub fn reused(&self) -> bool {
        self.reused
    }

    /// Release after a clean session: keep the runtime for the next one under
    /// [`ProcessPolicy::Reuse`], otherwise stop it politely.
    pub fn complete(self) {
        let Lease {
            mut guard,
            mut handle,
            policy,
            ..
        } = self;
        match policy {
            ProcessPolicy::Reuse if handle.is_alive() => {
                *guard = Some(handle);
            }
            _ => handle.terminate(),
        }
    }

    /// Release after a failed session: the runtime is killed and never reused.
    pub fn discard(self) {
        let Lease { mut handle, .. } = self;
        handle.kill();
    }
}

/// Records the thread holding a lease; cleared when the lease goes away.
struct OwnerMark<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
    thread: ThreadId,
}

impl<'a> OwnerMark<'a> {
    fn claim(owner: &'a Mutex<Option<ThreadId>>) -> Self {
        let thread = thread::current().id();
        *lock_or_recover(owner, "sandbox supervisor owner") = Some(thread);
        Self { owner, thread }
    }
}

impl Drop for OwnerMark<'_> {
    fn drop(&mut self) {
        let mut owner = lock_or_recover(self.owner, "sandbox supervisor owner");
        if *owner == Some(self.thread) {
            *owner = None;
        }
    }
}
