//! Collects stream metadata for a URL by running two extractor probes in
//! parallel:
//!
//! * the dump probe (`--dump-json`) yields one detailed JSON object per
//!   stream, with unavailable playlist items reported on stderr;
//! * the flat probe (`--flat-playlist`) yields the cheap, authoritative
//!   playlist ordering.
//!
//! Once both have finished, their results are reconciled in flat-list order.
//! A failed dump of a single item is retried exactly once after purging the
//! tool cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::maintenance::CacheCleaner;
use crate::core::process::{ExitKind, ProcessEvent, ProcessRunner};
use crate::models::format::{FormatId, StreamFormat};
use crate::models::stream::{PlaylistEntry, StreamError, StreamInfo};

#[derive(Clone, Debug, PartialEq)]
pub enum CollectorEvent {
    Collected(Vec<StreamInfo>),
    Error(String),
}

/// Runs the metadata probes for one URL at a time and reports through an
/// event channel. `stop()` kills both children and suppresses any pending
/// success emission.
pub struct MetadataCollector {
    program: PathBuf,
    events: mpsc::UnboundedSender<CollectorEvent>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    cleaner: Arc<CacheCleaner>,
}

impl MetadataCollector {
    pub fn new(events: mpsc::UnboundedSender<CollectorEvent>) -> Self {
        Self::with_program(config::YTDL_BIN.as_str(), events)
    }

    pub fn with_program(
        program: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<CollectorEvent>,
    ) -> Self {
        let program = program.into();
        let cleaner = Arc::new(CacheCleaner::with_program(&program));
        Self {
            program,
            events,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            cleaner,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts both probes for `url`. No-op while a previous run is active.
    pub fn run_async(&mut self, url: &str) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel = CancellationToken::new();
        let program = self.program.clone();
        let url = url.to_string();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let running = Arc::clone(&self.running);
        let cleaner = Arc::clone(&self.cleaner);
        tokio::spawn(async move {
            collect(program, url, events, cancel, cleaner).await;
            running.store(false, Ordering::SeqCst);
        });
    }

    /// Kills both children and discards buffered state; no success event
    /// will follow.
    pub fn stop(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for MetadataCollector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn dump_arguments(url: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "--dump-json",
        "--yes-playlist",
        "--no-color",
        "--no-check-certificate",
        "--ignore-config",
        // skip errors, like unavailable videos in a playlist
        "--ignore-errors",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(url.to_string());
    let user_agent = config::user_agent();
    if !user_agent.is_empty() {
        // --user-agent requires a non-empty argument
        args.push("--user-agent".to_string());
        args.push(user_agent);
    }
    args
}

fn flat_arguments(url: &str) -> Vec<String> {
    let mut args = dump_arguments(url);
    args.insert(1, "--flat-playlist".to_string());
    args
}

struct ProbeOutput {
    stdout: Vec<String>,
    stderr: Vec<String>,
    result: ProbeResult,
}

enum ProbeResult {
    Exited { code: i32, kind: ExitKind },
    SpawnError(String),
    Cancelled,
}

async fn run_probe(program: &Path, args: Vec<String>, cancel: &CancellationToken) -> ProbeOutput {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut runner = ProcessRunner::with_program(program, tx);
    runner.start(args);
    let mut output = ProbeOutput {
        stdout: Vec::new(),
        stderr: Vec::new(),
        result: ProbeResult::Cancelled,
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                runner.kill();
                output.result = ProbeResult::Cancelled;
                return output;
            }
            event = rx.recv() => match event {
                Some(ProcessEvent::Started) => {}
                Some(ProcessEvent::Stdout(line)) => output.stdout.push(line),
                Some(ProcessEvent::Stderr(line)) => output.stderr.push(line),
                Some(ProcessEvent::Exited { code, kind }) => {
                    output.result = ProbeResult::Exited { code, kind };
                    return output;
                }
                Some(ProcessEvent::SpawnError(err)) => {
                    output.result = ProbeResult::SpawnError(err.to_string());
                    return output;
                }
                None => {
                    output.result = ProbeResult::Cancelled;
                    return output;
                }
            }
        }
    }
}

async fn collect(
    program: PathBuf,
    url: String,
    events: mpsc::UnboundedSender<CollectorEvent>,
    cancel: CancellationToken,
    cleaner: Arc<CacheCleaner>,
) {
    let emit_error = |message: String| {
        let _ = events.send(CollectorEvent::Error(message));
    };
    loop {
        let (dump, flat) = tokio::join!(
            run_probe(&program, dump_arguments(&url), &cancel),
            run_probe(&program, flat_arguments(&url), &cancel),
        );
        if cancel.is_cancelled() {
            emit_error("Cancelled.".to_string());
            return;
        }

        let dump_code = match dump.result {
            ProbeResult::Cancelled => {
                emit_error("Cancelled.".to_string());
                return;
            }
            ProbeResult::SpawnError(message) => {
                emit_error(message);
                return;
            }
            ProbeResult::Exited {
                kind: ExitKind::Crashed,
                ..
            } => {
                emit_error("The process crashed.".to_string());
                return;
            }
            ProbeResult::Exited { code, .. } => code,
        };

        /*
         * With --ignore-errors, unavailable videos in a playlist are
         * reported on stderr while available streams come through stdout,
         * so both are parsed into the map.
         */
        let dump_map = parse_dump_map(&dump.stdout, &dump.stderr);

        if dump_code != 0 {
            /*
             * A non-zero exit with parsed entries usually means some items
             * of a playlist are unavailable server-side. Retry only when the
             * data is not a playlist: long playlists take real time to dump
             * and are not worth dumping twice.
             */
            let is_playlist = dump_map.len() > 1;
            if !cleaner.is_cleaned() && !is_playlist {
                cleaner.run().await;
                continue;
            }
        }

        if dump_map.is_empty() {
            emit_error("Couldn't parse JSON file.".to_string());
            return;
        }

        match flat.result {
            ProbeResult::Cancelled => {
                emit_error("Cancelled.".to_string());
                return;
            }
            ProbeResult::SpawnError(message) => {
                emit_error(message);
                return;
            }
            ProbeResult::Exited {
                kind: ExitKind::Crashed,
                ..
            } => {
                emit_error("The process crashed.".to_string());
                return;
            }
            ProbeResult::Exited { code, .. } if code != 0 => {
                emit_error("Couldn't parse playlist (ill-formed JSON file).".to_string());
                return;
            }
            ProbeResult::Exited { .. } => {}
        }

        let flat_list = parse_flat_list(&flat.stdout);
        if flat_list.is_empty() {
            emit_error("Couldn't parse playlist (no data received).".to_string());
            return;
        }

        if cancel.is_cancelled() {
            emit_error("Cancelled.".to_string());
            return;
        }
        // Some items may carry errors or be unavailable; that is fine.
        let _ = events.send(CollectorEvent::Collected(reconcile(&dump_map, &flat_list)));
        return;
    }
}

fn parse_dump_map(stdout: &[String], stderr: &[String]) -> HashMap<String, StreamInfo> {
    let mut map = HashMap::new();
    for line in stdout {
        if !line.is_empty() {
            let info = parse_dump_line(line);
            map.insert(info.id.clone(), info);
        }
    }
    for line in stderr {
        if !line.is_empty() {
            let info = parse_error_line(line);
            map.insert(info.id.clone(), info);
        }
    }
    map
}

fn parse_dump_line(line: &str) -> StreamInfo {
    let mut info = StreamInfo::default();
    let json: Value = match serde_json::from_str(line) {
        Ok(json) => json,
        Err(_) => {
            info.set_error(StreamError::JsonFormat);
            return info;
        }
    };
    info.id = str_field(&json, "id");
    info.filename = str_field(&json, "_filename");
    info.webpage_url = str_field(&json, "webpage_url");
    info.fulltitle = str_field(&json, "fulltitle");
    info.default_title = str_field(&json, "title");
    info.default_suffix = str_field(&json, "ext");
    info.description = str_field(&json, "description");
    info.thumbnail = str_field(&json, "thumbnail");
    info.extractor = str_field(&json, "extractor");
    info.extractor_key = str_field(&json, "extractor_key");
    info.default_format_id = FormatId::new(&str_field(&json, "format_id"));
    if let Some(formats) = json.get("formats").and_then(Value::as_array) {
        for format in formats {
            info.formats.push(parse_format(format));
        }
    }
    info.playlist = str_field(&json, "playlist");
    info.playlist_index = str_field(&json, "playlist_index");
    info
}

fn parse_format(json: &Value) -> StreamFormat {
    StreamFormat {
        format_id: FormatId::new(&str_field(json, "format_id")),
        ext: str_field(json, "ext"),
        format_note: str_field(json, "format_note"),
        filesize: i64_field(json, "filesize"),
        acodec: str_field(json, "acodec"),
        abr: i64_field(json, "abr") as i32,
        asr: i64_field(json, "asr") as i32,
        vcodec: str_field(json, "vcodec"),
        width: i64_field(json, "width") as i32,
        height: i64_field(json, "height") as i32,
        fps: i64_field(json, "fps") as i32,
        tbr: i64_field(json, "tbr") as i32,
    }
}

fn str_field(json: &Value, key: &str) -> String {
    json.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn i64_field(json: &Value, key: &str) -> i64 {
    json.get(key).and_then(Value::as_i64).unwrap_or_default()
}

/// `"ERROR: 0123456789a: YouTube said: unavailable"` names the failed item
/// between the first and second colon.
fn parse_error_line(line: &str) -> StreamInfo {
    tracing::debug!(line, "dump stderr");
    let mut info = StreamInfo::default();
    info.id = line
        .split(':')
        .filter(|part| !part.is_empty())
        .nth(1)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    info.set_error(StreamError::Unavailable);
    info
}

fn parse_flat_list(stdout: &[String]) -> Vec<PlaylistEntry> {
    let mut list = Vec::new();
    for line in stdout {
        if line.is_empty() {
            continue;
        }
        let entry = parse_flat_line(line);
        if !entry.id.is_empty() {
            list.push(entry);
        }
    }
    list
}

fn parse_flat_line(line: &str) -> PlaylistEntry {
    let mut entry = PlaylistEntry::default();
    if let Ok(json) = serde_json::from_str::<Value>(line) {
        entry.entry_type = str_field(&json, "_type");
        entry.id = str_field(&json, "id");
        entry.ie_key = str_field(&json, "ie_key");
        entry.title = str_field(&json, "title");
        entry.url = str_field(&json, "url");
    }
    entry
}

/// Walks the flat list in order and emits one `StreamInfo` per entry: the
/// dump entry when available, a stub marked unavailable otherwise. Missing
/// titles and page URLs are backfilled from the flat entry, and the 1-based
/// playlist position is assigned here.
fn reconcile(
    dump_map: &HashMap<String, StreamInfo>,
    flat_list: &[PlaylistEntry],
) -> Vec<StreamInfo> {
    let mut streams = Vec::with_capacity(flat_list.len());
    for (index, flat_item) in flat_list.iter().enumerate() {
        let mut info = match dump_map.get(&flat_item.id) {
            Some(info) if !flat_item.id.is_empty() => info.clone(),
            _ => {
                let mut stub = StreamInfo::default();
                stub.set_error(StreamError::Unavailable);
                stub
            }
        };
        if info.default_title.is_empty() {
            info.default_title = flat_item.title.clone();
        }
        if info.webpage_url.is_empty() {
            info.webpage_url = flat_item.url.clone();
        }
        info.playlist_index = (index + 1).to_string();
        streams.push(info);
    }
    streams
}
