//! End-to-end runs against a scripted fake extractor.
//!
//! Each test writes a small shell script standing in for the external tool
//! and points the collector or downloader at it, so the whole process layer
//! (spawn, line events, exit classification) is exercised for real.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

use mediagrab::core::maintenance;
use mediagrab::{
    CollectorEvent, DownloadEvent, Downloader, FormatId, MetadataCollector, StreamError,
    StreamInfo,
};

const MIB: i64 = 1024 * 1024;

const DUMP_JSON: &str = r#"{"id":"abc","title":"Hi","ext":"mp4","format_id":"22","formats":[{"format_id":"22","ext":"mp4","vcodec":"avc1","acodec":"mp4a","filesize":1000,"width":1280,"height":720}]}"#;
const FLAT_JSON: &str = r#"{"id":"abc","title":"Hi","url":"u"}"#;

fn fake_tool(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-extractor");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn first_collector_event(tool: &Path, url: &str) -> CollectorEvent {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut collector = MetadataCollector::with_program(tool, tx);
    collector.run_async(url);
    assert!(collector.is_running());
    timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("collector timed out")
        .expect("collector channel closed")
}

#[tokio::test]
async fn collects_a_single_video() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(
        dir.path(),
        &format!(
            r#"case "$*" in
*--flat-playlist*) printf '%s\n' '{FLAT_JSON}' ;;
*) printf '%s\n' '{DUMP_JSON}' ;;
esac"#
        ),
    );
    let event = first_collector_event(&tool, "https://example.com/v").await;
    let CollectorEvent::Collected(streams) = event else {
        panic!("expected a collection, got {event:?}");
    };
    assert_eq!(streams.len(), 1);
    let info = &streams[0];
    assert!(info.is_available());
    assert_eq!(info.playlist_index, "1");
    assert_eq!(info.format_id(), FormatId::new("22"));
    assert_eq!(info.guestimate_full_size(), 1000);
    assert_eq!(info.full_file_name(), "Hi.mp4");
}

#[tokio::test]
async fn playlist_with_unavailable_item_still_collects() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(
        dir.path(),
        r#"case "$*" in
*--flat-playlist*)
    printf '%s\n' '{"id":"a","title":"A","url":"ua"}'
    printf '%s\n' '{"id":"b","title":"B","url":"ub"}'
    printf '%s\n' '{"id":"c","title":"C","url":"uc"}'
    ;;
*)
    printf '%s\n' '{"id":"a","title":"A","ext":"mp4"}'
    printf '%s\n' '{"id":"c","title":"C","ext":"mp4"}'
    printf '%s\n' 'ERROR: b: unavailable' >&2
    exit 1
    ;;
esac"#,
    );
    let event = first_collector_event(&tool, "https://example.com/list").await;
    let CollectorEvent::Collected(streams) = event else {
        panic!("expected a collection, got {event:?}");
    };
    assert_eq!(streams.len(), 3);
    assert!(streams[0].is_available());
    assert_eq!(streams[1].error(), StreamError::Unavailable);
    assert_eq!(streams[1].default_title, "B");
    assert!(streams[2].is_available());
    let indices: Vec<&str> = streams.iter().map(|s| s.playlist_index.as_str()).collect();
    assert_eq!(indices, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn failed_single_dump_retries_once_after_cache_purge() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("purged");
    let tool = fake_tool(
        dir.path(),
        &format!(
            r#"MARKER='{marker}'
case "$*" in
*--rm-cache-dir*) : > "$MARKER"; exit 0 ;;
*--flat-playlist*)
    if [ -f "$MARKER" ]; then printf '%s\n' '{FLAT_JSON}'; exit 0; else exit 2; fi ;;
*)
    if [ -f "$MARKER" ]; then printf '%s\n' '{DUMP_JSON}'; exit 0; else exit 2; fi ;;
esac"#,
            marker = marker.display()
        ),
    );
    let event = first_collector_event(&tool, "https://example.com/v").await;
    let CollectorEvent::Collected(streams) = event else {
        panic!("expected a collection after the purge retry, got {event:?}");
    };
    assert!(marker.exists(), "the cache purge never ran");
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].full_file_name(), "Hi.mp4");
}

#[tokio::test]
async fn persistent_failure_stops_after_one_retry() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("calls");
    let tool = fake_tool(
        dir.path(),
        &format!(
            r#"LOG='{log}'
case "$*" in
*--rm-cache-dir*) exit 0 ;;
*--flat-playlist*) exit 2 ;;
*) echo dump >> "$LOG"; exit 2 ;;
esac"#,
            log = log.display()
        ),
    );
    let event = first_collector_event(&tool, "https://example.com/v").await;
    assert_eq!(
        event,
        CollectorEvent::Error("Couldn't parse JSON file.".to_string())
    );
    let calls = fs::read_to_string(&log).unwrap_or_default();
    assert_eq!(calls.lines().count(), 2, "expected exactly one retry");
}

#[tokio::test]
async fn stopping_the_collector_reports_cancelled() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(dir.path(), "sleep 30");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut collector = MetadataCollector::with_program(&tool, tx);
    collector.run_async("https://example.com/v");
    tokio::time::sleep(Duration::from_millis(200)).await;
    collector.stop();
    let event = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("collector timed out")
        .expect("collector channel closed");
    assert_eq!(event, CollectorEvent::Error("Cancelled.".to_string()));
}

#[tokio::test]
async fn multi_section_download_reports_monotonic_progress() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(
        dir.path(),
        r#"printf '[download] Destination: /tmp/out.f137.mp4\n'
printf '[download]  10.0%% of 100.00MiB at 5.00MiB/s ETA 00:18\n'
printf '[download]  50.0%% of 100.00MiB at 5.00MiB/s ETA 00:10\n'
printf '[download] Destination: /tmp/out.f251.m4a\n'
printf '[download]  25.0%% of 50.00MiB at 5.00MiB/s ETA 00:07\n'"#,
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut downloader = Downloader::with_program(&tool, tx);
    downloader.set_selected_format_id(FormatId::new("137+251"));
    downloader.set_url("https://example.com/v");
    downloader.set_local_full_output_path("/tmp/out.mp4");
    downloader.set_file_size_in_bytes(150 * MIB);
    downloader.start();
    assert!(downloader.is_running());

    let mut received_values = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("download timed out")
            .expect("download channel closed");
        match event {
            DownloadEvent::Progress { received, total } => {
                assert_eq!(total, 150 * MIB);
                received_values.push(received);
            }
            DownloadEvent::Finished => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(received_values.windows(2).all(|w| w[0] <= w[1]));
    // banked first section plus a quarter of the second
    assert!(received_values.contains(&(50 * MIB + (50 * MIB) / 4)));
    assert_eq!(*received_values.last().unwrap(), 150 * MIB);
}

#[tokio::test]
async fn merge_warning_changes_the_container() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(
        dir.path(),
        r#"printf 'WARNING: Requested formats are incompatible for merge and will be merged into mkv.\n' >&2"#,
    );
    let mut info = StreamInfo::default();
    info.default_title = "clip".to_string();
    info.default_suffix = "webm".to_string();
    info.default_format_id = FormatId::new("244+251");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut downloader = Downloader::with_program(&tool, tx);
    downloader.initialize_with_stream_info(&info);
    downloader.set_url("https://example.com/v");
    downloader.set_local_full_output_path("/tmp/clip.webm");
    assert_eq!(downloader.file_name(), "clip.webm");
    downloader.start();

    let mut saw_metadata_change = false;
    loop {
        let event = timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("download timed out")
            .expect("download channel closed");
        match event {
            DownloadEvent::MetadataChanged => saw_metadata_change = true,
            DownloadEvent::Finished => break,
            DownloadEvent::Progress { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(saw_metadata_change);
    assert_eq!(downloader.file_name(), "clip.mkv");
}

#[tokio::test]
async fn killed_child_reports_a_crash_and_no_finish() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(dir.path(), "kill -9 $$");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut downloader = Downloader::with_program(&tool, tx);
    downloader.set_selected_format_id(FormatId::new("22"));
    downloader.set_url("https://example.com/v");
    downloader.set_local_full_output_path("/tmp/out.mp4");
    downloader.start();

    let event = timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("download timed out")
        .expect("download channel closed");
    assert_eq!(
        event,
        DownloadEvent::Error("The process crashed.".to_string())
    );
    // nothing follows the terminal error
    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
}

#[tokio::test]
async fn tool_failure_surfaces_the_stderr_tail() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(
        dir.path(),
        r#"printf 'ERROR: no video formats found\n' >&2
exit 1"#,
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut downloader = Downloader::with_program(&tool, tx);
    downloader.set_selected_format_id(FormatId::new("22"));
    downloader.set_url("https://example.com/v");
    downloader.set_local_full_output_path("/tmp/out.mp4");
    downloader.start();

    let mut errors = Vec::new();
    loop {
        match timeout(Duration::from_secs(30), rx.recv()).await {
            Ok(Some(DownloadEvent::Error(message))) => {
                errors.push(message);
                if errors.len() == 2 {
                    break;
                }
            }
            Ok(Some(other)) => panic!("unexpected event {other:?}"),
            _ => break,
        }
    }
    // once streamed from stderr, once as the exit report
    assert!(!errors.is_empty());
    assert!(errors
        .iter()
        .all(|e| e == "ERROR: no video formats found"));
}

#[tokio::test]
async fn abort_kills_the_child_and_finishes() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(dir.path(), "sleep 30");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut downloader = Downloader::with_program(&tool, tx);
    downloader.set_selected_format_id(FormatId::new("22"));
    downloader.set_url("https://example.com/v");
    downloader.set_local_full_output_path("/tmp/out.mp4");
    downloader.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    downloader.abort();

    let event = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("abort timed out")
        .expect("download channel closed");
    assert_eq!(event, DownloadEvent::Finished);
}

#[tokio::test]
async fn second_start_while_running_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(dir.path(), "sleep 30");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut downloader = Downloader::with_program(&tool, tx);
    downloader.set_selected_format_id(FormatId::new("22"));
    downloader.set_url("https://example.com/v");
    downloader.set_local_full_output_path("/tmp/out.mp4");
    downloader.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    downloader.start();
    downloader.abort();
    let event = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("abort timed out")
        .expect("download channel closed");
    // one run, one terminal event
    assert_eq!(event, DownloadEvent::Finished);
    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
}

#[test]
fn version_probe_reads_the_tool() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(dir.path(), "printf '2021.12.17\\n'");
    assert_eq!(maintenance::version_of(&tool), "2021.12.17");
}

#[tokio::test]
async fn extractor_listing_preserves_empty_lines() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(
        dir.path(),
        r#"case "$*" in
*--list-extractors*) printf 'absnews\nabsnews:videos\nzephyr\n' ;;
*--extractor-descriptions*) printf 'ABS News\n\nZephyr video platform\n' ;;
esac"#,
    );
    let (extractors, descriptions) = maintenance::list_extractors_with(&tool)
        .await
        .expect("listing failed");
    assert_eq!(extractors, vec!["absnews", "absnews:videos", "zephyr", ""]);
    assert_eq!(descriptions, vec!["ABS News", "", "Zephyr video platform", ""]);
}

#[tokio::test]
async fn extractor_listing_failure_carries_stderr() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(
        dir.path(),
        r#"printf 'something went wrong\n' >&2
exit 1"#,
    );
    let result = maintenance::list_extractors_with(&tool).await;
    assert_eq!(result.unwrap_err(), "something went wrong");
}
