use std::env;
use std::path::Path;
use std::process::Stdio;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tokio::time::{timeout, Duration};

use super::{EventSink, PositionSource, SourceKind, SubscriptionHandle};
use crate::config::LiveConfig;
use crate::error::{SourceErrorKind, TrackerError, TrackerResult};
use crate::types::{Coordinate, PositionSample};

/// Continuous location watch through Termux:API.
///
/// Runs `termux-location -p <provider> -r updates`, i.e. the requested
/// provider, fresh fixes only, one JSON object per update. Each update must
/// arrive within `timeout_ms` or the watch fails with `Timeout`.
pub struct LiveSource {
    config: LiveConfig,
}

impl LiveSource {
    pub fn new(config: LiveConfig) -> Self {
        Self { config }
    }
}

impl PositionSource for LiveSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn is_available(&self) -> bool {
        command_on_path(&self.config.command)
    }

    fn subscribe(&mut self, sink: EventSink) -> TrackerResult<SubscriptionHandle> {
        let mut child = Command::new(&self.config.command)
            .args(["-p", self.config.provider.as_str(), "-r", "updates"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TrackerError::SourceUnavailable(format!(
                    "failed to launch {}: {}",
                    self.config.command, e
                ))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TrackerError::SourceUnavailable(format!("{} has no stdout", self.config.command))
        })?;

        let per_update = Duration::from_millis(self.config.timeout_ms);
        let generation = sink.generation();
        let task = tokio::spawn(async move {
            // Keep the child alive for as long as the watch runs; aborting
            // the task drops it, which kills the process.
            let _child = child;
            watch_loop(sink, stdout, per_update).await;
        });
        Ok(SubscriptionHandle::spawned(generation, task))
    }
}

async fn watch_loop(sink: EventSink, stdout: ChildStdout, per_update: Duration) {
    let mut lines = BufReader::new(stdout).lines();
    let mut splitter = JsonObjectSplitter::default();
    let mut fix_count = 0u64;

    loop {
        let failure = match timeout(per_update, next_object(&mut lines, &mut splitter)).await {
            Err(_) => {
                log::warn!("[gps] no fix within {:?}", per_update);
                SourceErrorKind::Timeout
            }
            Ok(Ok(Some(text))) => match parse_location(&text, Utc::now().timestamp_millis()) {
                Ok(sample) => {
                    fix_count += 1;
                    log::debug!("[gps] {} fixes", fix_count);
                    if !sink.send_sample(sample).await {
                        return;
                    }
                    continue;
                }
                Err(kind) => kind,
            },
            Ok(Ok(None)) => {
                log::warn!("[gps] location stream ended after {} fixes", fix_count);
                SourceErrorKind::PositionUnavailable
            }
            Ok(Err(e)) => {
                log::error!("[gps] failed to read location stream: {}", e);
                SourceErrorKind::PositionUnavailable
            }
        };

        sink.send_error(failure).await;
        return;
    }
}

/// Read lines until one complete top-level JSON object has been seen
async fn next_object(
    lines: &mut Lines<BufReader<ChildStdout>>,
    splitter: &mut JsonObjectSplitter,
) -> std::io::Result<Option<String>> {
    while let Some(line) = lines.next_line().await? {
        if let Some(object) = splitter.push_line(&line) {
            return Ok(Some(object));
        }
    }
    Ok(None)
}

/// Reassembles pretty-printed JSON objects from a line stream
#[derive(Debug, Default)]
struct JsonObjectSplitter {
    buffer: String,
    depth: i32,
}

impl JsonObjectSplitter {
    fn push_line(&mut self, line: &str) -> Option<String> {
        if self.depth == 0 && line.trim().is_empty() {
            return None;
        }
        for ch in line.chars() {
            match ch {
                '{' => self.depth += 1,
                '}' => self.depth -= 1,
                _ => {}
            }
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');

        if self.depth <= 0 {
            self.depth = 0;
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
struct TermuxLocation {
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    speed: Option<f64>,
    /// Age of the fix when it was reported
    #[serde(rename = "elapsedMs")]
    elapsed_ms: Option<i64>,
}

/// Turn one Termux:API response into a sample or a source error
fn parse_location(text: &str, now_ms: i64) -> Result<PositionSample, SourceErrorKind> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        log::warn!("[gps] unparsable location output: {}", e);
        SourceErrorKind::PositionUnavailable
    })?;

    let api_error = ["API_ERROR", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str));
    if let Some(message) = api_error {
        log::error!("[gps] location API error: {}", message);
        return Err(if message.to_lowercase().contains("permission") {
            SourceErrorKind::PermissionDenied
        } else {
            SourceErrorKind::PositionUnavailable
        });
    }

    let fix: TermuxLocation = serde_json::from_value(value).map_err(|e| {
        log::warn!("[gps] unexpected location format: {}", e);
        SourceErrorKind::PositionUnavailable
    })?;

    let age_ms = fix.elapsed_ms.unwrap_or(0).max(0);
    let mut sample = PositionSample::new(Coordinate::new(fix.latitude, fix.longitude), now_ms - age_ms);
    sample.reported_speed_mps = fix.speed;
    sample.reported_accuracy_m = fix.accuracy;
    Ok(sample)
}

fn command_on_path(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}
