//! Drives one extractor download to completion, synthesizing monotonic
//! byte-transfer counters from the tool's textual progress output.
//!
//! A composite download (video+audio merge) runs in sections, one per
//! atomic track: each `Destination:` line starts a new section, and the
//! bytes of finished sections accumulate into the reported total.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::parse::{parse_bytes, parse_percent};
use crate::core::process::{ExitKind, ProcessEvent, ProcessRunner};
use crate::models::format::FormatId;
use crate::models::stream::StreamInfo;

// See option --merge-output-format FORMAT
const MERGE_FORMATS: [&str; 5] = ["mkv", "mp4", "ogg", "webm", "flv"];

const MERGE_WARNING: &str =
    "Requested formats are incompatible for merge and will be merged into mkv.";

const DOWNLOAD_HEADER: &str = "[download]";
const NEXT_SECTION: &str = "Destination:";

#[derive(Clone, Debug, PartialEq)]
pub enum DownloadEvent {
    /// `received` never decreases across one run; `total` falls back to the
    /// current section's size until a final total is known.
    Progress { received: i64, total: i64 },
    /// Late metadata change, e.g. a forced container reformat.
    MetadataChanged,
    Finished,
    Error(String),
}

#[derive(Debug, Default)]
struct DownloadState {
    url: String,
    output_path: String,
    referring_page: String,
    selected_format_id: FormatId,
    bytes_received: i64,
    bytes_received_current_section: i64,
    bytes_total: i64,
    bytes_total_current_section: i64,
    file_base_name: String,
    file_extension: String,
    stderr_tail: String,
}

enum StderrSignal {
    Error(String),
    MetadataChanged,
}

impl DownloadState {
    fn total_or_section(&self) -> i64 {
        if self.bytes_total > 0 {
            self.bytes_total
        } else {
            self.bytes_total_current_section
        }
    }

    /// Applies one stdout line; returns the progress pair to report, if any.
    fn apply_stdout_line(&mut self, line: &str) -> Option<(i64, i64)> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let first = tokens.first()?;
        if !first.eq_ignore_ascii_case(DOWNLOAD_HEADER) {
            return None;
        }
        if tokens.len() > 2 && tokens[1] == NEXT_SECTION {
            self.bytes_received += self.bytes_received_current_section;
            self.bytes_received_current_section = 0;
            self.bytes_total_current_section = 0;
            return Some((self.bytes_received, self.total_or_section()));
        }
        if tokens.len() > 3 && tokens[1].contains('%') && tokens[2] == "of" {
            let percent = parse_percent(tokens[1]);
            if percent < 0.0 {
                tracing::debug!(token = tokens[1], "unparseable percent");
                return None;
            }
            let section_total = parse_bytes(tokens[3]);
            if section_total < 0 {
                tracing::debug!(token = tokens[3], "unparseable size");
                return None;
            }
            self.bytes_total_current_section = section_total;
            self.bytes_received_current_section =
                ((percent * section_total as f64) / 100.0).ceil() as i64;
        }
        Some((
            self.bytes_received + self.bytes_received_current_section,
            self.total_or_section(),
        ))
    }

    /// Classifies one stderr line: tool errors are surfaced verbatim, the
    /// merge-incompatibility warning reformats the container to mkv, other
    /// warnings are dropped.
    fn apply_stderr_line(&mut self, line: &str) -> Option<StderrSignal> {
        if line.is_empty() {
            return None;
        }
        if starts_with_error(line) {
            self.stderr_tail = line.to_string();
            return Some(StderrSignal::Error(line.to_string()));
        }
        if starts_with_warning(line) {
            if contains_ignore_ascii_case(line, MERGE_WARNING) {
                self.file_extension = "mkv".to_string();
                return Some(StderrSignal::MetadataChanged);
            }
            return None;
        }
        self.stderr_tail = line.to_string();
        None
    }
}

fn starts_ignore_ascii_case(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len() && line.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn contains_ignore_ascii_case(line: &str, needle: &str) -> bool {
    line.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

fn starts_with_error(line: &str) -> bool {
    starts_ignore_ascii_case(line, "ERROR:")
        || starts_ignore_ascii_case(line, "\u{1b}[0;31mERROR:\u{1b}[0m")
        || starts_ignore_ascii_case(line, "\\033[0;31mERROR:\\033[0m")
}

fn starts_with_warning(line: &str) -> bool {
    starts_ignore_ascii_case(line, "WARNING:")
        || starts_ignore_ascii_case(line, "\u{1b}[0;33mWARNING:\u{1b}[0m")
        || starts_ignore_ascii_case(line, "\\033[0;33mWARNING:\\033[0m")
}

fn is_merge_format(suffix: &str) -> bool {
    MERGE_FORMATS
        .iter()
        .any(|format| suffix.eq_ignore_ascii_case(format))
}

/// Drives one download subprocess at a time and reports through an event
/// channel. Configure it from a [`StreamInfo`] snapshot plus the output
/// path, then `start()`.
pub struct Downloader {
    program: PathBuf,
    events: mpsc::UnboundedSender<DownloadEvent>,
    state: Arc<Mutex<DownloadState>>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

impl Downloader {
    pub fn new(events: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        Self::with_program(config::YTDL_BIN.as_str(), events)
    }

    pub fn with_program(
        program: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Self {
        Self {
            program: program.into(),
            events,
            state: Arc::new(Mutex::new(DownloadState::default())),
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn clear(&mut self) {
        let mut state = self.state.lock().unwrap();
        *state = DownloadState::default();
    }

    /// True when no format is selected; `start()` would be a no-op.
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().selected_format_id.is_empty()
    }

    /// Seeds counters and file naming from a metadata snapshot. The
    /// estimated size serves as the section total until the tool reports a
    /// real one.
    pub fn initialize_with_stream_info(&mut self, info: &StreamInfo) {
        let mut state = self.state.lock().unwrap();
        state.selected_format_id = info.format_id();
        state.bytes_received = 0;
        state.bytes_received_current_section = 0;
        state.bytes_total = 0;
        state.bytes_total_current_section = info.guestimate_full_size();
        state.file_base_name = info.file_base_name();
        state.file_extension = info.suffix();
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    pub fn set_url(&mut self, url: &str) {
        self.state.lock().unwrap().url = url.to_string();
    }

    pub fn local_full_output_path(&self) -> String {
        self.state.lock().unwrap().output_path.clone()
    }

    pub fn set_local_full_output_path(&mut self, output_path: &str) {
        self.state.lock().unwrap().output_path = output_path.to_string();
    }

    pub fn referring_page(&self) -> String {
        self.state.lock().unwrap().referring_page.clone()
    }

    pub fn set_referring_page(&mut self, referring_page: &str) {
        self.state.lock().unwrap().referring_page = referring_page.to_string();
    }

    /// The first token must be the video track: for video 299 with audio
    /// 251, pass `"299+251"`, not `"251+299"`.
    pub fn selected_format_id(&self) -> FormatId {
        self.state.lock().unwrap().selected_format_id.clone()
    }

    pub fn set_selected_format_id(&mut self, format_id: FormatId) {
        self.state.lock().unwrap().selected_format_id = format_id;
    }

    pub fn file_size_in_bytes(&self) -> i64 {
        self.state.lock().unwrap().total_or_section()
    }

    pub fn set_file_size_in_bytes(&mut self, file_size: i64) {
        self.state.lock().unwrap().bytes_total = file_size;
    }

    pub fn file_name(&self) -> String {
        let state = self.state.lock().unwrap();
        if state.file_extension.is_empty() {
            state.file_base_name.clone()
        } else {
            format!("{}.{}", state.file_base_name, state.file_extension)
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launches the download child. No-op without a selected format or
    /// while a child is already running.
    pub fn start(&mut self) {
        let args = {
            let state = self.state.lock().unwrap();
            if state.selected_format_id.is_empty() {
                return;
            }
            build_arguments(&state)
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel = CancellationToken::new();
        let program = self.program.clone();
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            drive(program, args, events, state, cancel).await;
            running.store(false, Ordering::SeqCst);
        });
    }

    /// Kills the child. User-initiated, so the run ends with `Finished`,
    /// not an error.
    pub fn abort(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.cancel.cancel();
        } else {
            let _ = self.events.send(DownloadEvent::Finished);
        }
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn build_arguments(state: &DownloadState) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.push("--output".to_string());
    args.push(state.output_path.clone());
    args.push("--no-playlist".to_string());
    args.push("--no-color".to_string());
    args.push("--no-check-certificate".to_string());
    args.push("--no-overwrites".to_string());
    args.push("--no-continue".to_string());
    // no .part file: write directly into the output file
    args.push("--no-part".to_string());
    // keep the server's file modification time out of it
    args.push("--no-mtime".to_string());
    args.push("--no-cache-dir".to_string());
    // ASCII filenames only
    args.push("--restrict-filenames".to_string());
    args.push("--ignore-config".to_string());
    args.push("--format".to_string());
    args.push(state.selected_format_id.to_string());
    args.push(state.url.clone());
    let user_agent = config::user_agent();
    if !user_agent.is_empty() {
        // --user-agent requires a non-empty argument
        args.push("--user-agent".to_string());
        args.push(user_agent);
    }
    if !state.referring_page.is_empty() {
        args.push("--referer".to_string());
        args.push(state.referring_page.clone());
    }
    if is_merge_format(&state.file_extension) {
        args.push("--merge-output-format".to_string());
        args.push(state.file_extension.clone());
    }
    args
}

async fn drive(
    program: PathBuf,
    args: Vec<String>,
    events: mpsc::UnboundedSender<DownloadEvent>,
    state: Arc<Mutex<DownloadState>>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut runner = ProcessRunner::with_program(&program, tx);
    runner.start(args);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                runner.kill();
                let _ = events.send(DownloadEvent::Finished);
                return;
            }
            event = rx.recv() => match event {
                Some(ProcessEvent::Started) => tracing::debug!("download child started"),
                Some(ProcessEvent::Stdout(line)) => {
                    let progress = state.lock().unwrap().apply_stdout_line(&line);
                    if let Some((received, total)) = progress {
                        let _ = events.send(DownloadEvent::Progress { received, total });
                    }
                }
                Some(ProcessEvent::Stderr(line)) => {
                    let signal = state.lock().unwrap().apply_stderr_line(&line);
                    match signal {
                        Some(StderrSignal::Error(message)) => {
                            let _ = events.send(DownloadEvent::Error(message));
                        }
                        Some(StderrSignal::MetadataChanged) => {
                            let _ = events.send(DownloadEvent::MetadataChanged);
                        }
                        None => {}
                    }
                }
                Some(ProcessEvent::Exited { code: 0, kind: ExitKind::Normal }) => {
                    let total = state.lock().unwrap().total_or_section();
                    let _ = events.send(DownloadEvent::Progress {
                        received: total,
                        total,
                    });
                    let _ = events.send(DownloadEvent::Finished);
                    return;
                }
                Some(ProcessEvent::Exited { kind: ExitKind::Normal, .. }) => {
                    let tail = state.lock().unwrap().stderr_tail.clone();
                    let _ = events.send(DownloadEvent::Error(tail));
                    return;
                }
                Some(ProcessEvent::Exited { kind: ExitKind::Crashed, .. }) => {
                    let _ = events.send(DownloadEvent::Error("The process crashed.".to_string()));
                    return;
                }
                Some(ProcessEvent::SpawnError(err)) => {
                    let _ = events.send(DownloadEvent::Error(err.to_string()));
                    return;
                }
                None => return,
            }
        }
    }
}
