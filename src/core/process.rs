//! Supervision of a single extractor child process: spawn, stream its
//! output as line events, deliver the exit status, kill on cancellation or
//! drop.

use std::ffi::OsStr;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::parse::simplify;

/// Creates a tokio Command that hides the console window on Windows and
/// kills the child if the handle is dropped.
pub fn command<S: AsRef<OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.kill_on_drop(true);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    cmd
}

/// Creates a std Command that hides the console window on Windows.
pub fn std_command<S: AsRef<OsStr>>(program: S) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(0x08000000);
    }
    cmd
}

/// Why the child could not be run. Terminal and non-retryable.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ProcessError {
    #[error("The process failed to start.")]
    FailedToStart,
    #[error("The process crashed while attempting to run.")]
    Crashed,
    #[error("The process has timed out.")]
    Timedout,
    #[error("The process has encountered a write error.")]
    WriteError,
    #[error("The process has encountered a read error.")]
    ReadError,
    #[error("The process has encountered an unknown error.")]
    Unknown,
}

impl ProcessError {
    pub(crate) fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Self::FailedToStart,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timedout,
            io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => Self::WriteError,
            io::ErrorKind::UnexpectedEof => Self::ReadError,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitKind {
    Normal,
    Crashed,
}

/// Lifecycle of one child, in order: `Started`, zero or more line events,
/// then exactly one of `Exited` / `SpawnError`.
///
/// Lines are split on newlines with internal whitespace collapsed; the
/// extractor's output is ASCII-ish text, binary transparency is not needed.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessEvent {
    Started,
    Stdout(String),
    Stderr(String),
    Exited { code: i32, kind: ExitKind },
    SpawnError(ProcessError),
}

/// Owns at most one running child at a time and reports it through an event
/// channel. Starting while a child runs is a no-op; killing or dropping the
/// runner terminates the child.
pub struct ProcessRunner {
    program: PathBuf,
    events: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

impl ProcessRunner {
    pub fn new(events: mpsc::UnboundedSender<ProcessEvent>) -> Self {
        Self::with_program(config::YTDL_BIN.as_str(), events)
    }

    pub fn with_program(
        program: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Self {
        Self {
            program: program.into(),
            events,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launches the program with the given argument vector. No shell is
    /// involved. No-op while a previous child is still running.
    pub fn start(&mut self, args: Vec<String>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel = CancellationToken::new();
        let program = self.program.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            run_child(program, args, events, cancel, running).await;
        });
    }

    /// Kills the child, best-effort and without waiting; no further events
    /// are delivered for this run.
    pub fn kill(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_child(
    program: PathBuf,
    args: Vec<String>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
) {
    tracing::debug!(program = %program.display(), args = %args.join(" "), "spawning");
    let mut child = match command(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            tracing::debug!(error = %err, "spawn failed");
            if !cancel.is_cancelled() {
                let _ = events.send(ProcessEvent::SpawnError(ProcessError::from_io(&err)));
            }
            running.store(false, Ordering::SeqCst);
            return;
        }
    };
    let _ = events.send(ProcessEvent::Started);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = tokio::spawn(read_lines(
        stdout,
        events.clone(),
        cancel.clone(),
        ProcessEvent::Stdout,
    ));
    let err_task = tokio::spawn(read_lines(
        stderr,
        events.clone(),
        cancel.clone(),
        ProcessEvent::Stderr,
    ));

    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            out_task.abort();
            err_task.abort();
            running.store(false, Ordering::SeqCst);
            return;
        }
    };
    // drain remaining buffered lines before reporting the exit
    let _ = out_task.await;
    let _ = err_task.await;
    running.store(false, Ordering::SeqCst);
    if cancel.is_cancelled() {
        return;
    }
    match status {
        Ok(status) => {
            let (code, kind) = match status.code() {
                Some(code) => (code, ExitKind::Normal),
                None => (-1, ExitKind::Crashed),
            };
            let _ = events.send(ProcessEvent::Exited { code, kind });
        }
        Err(err) => {
            let _ = events.send(ProcessEvent::SpawnError(ProcessError::from_io(&err)));
        }
    }
}

async fn read_lines<R>(
    reader: Option<R>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
    make_event: fn(String) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let _ = events.send(make_event(simplify(&line)));
                }
                _ => break,
            },
        }
    }
}
