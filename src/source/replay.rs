use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use super::{EventSink, PositionSource, SourceKind, SubscriptionHandle};
use crate::error::{TrackerError, TrackerResult};
use crate::types::PositionSample;

#[derive(Deserialize)]
#[serde(untagged)]
enum TrackFile {
    Bare(Vec<PositionSample>),
    Wrapped { samples: Vec<PositionSample> },
}

/// Load a recorded track (`.json` or `.json.gz`)
pub fn load_track(path: &Path) -> TrackerResult<Vec<PositionSample>> {
    let file = File::open(path)
        .map_err(|e| TrackerError::Replay(format!("failed to open {}: {}", path.display(), e)))?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let track: TrackFile = serde_json::from_reader(reader)
        .map_err(|e| TrackerError::Replay(format!("failed to parse {}: {}", path.display(), e)))?;
    Ok(match track {
        TrackFile::Bare(samples) => samples,
        TrackFile::Wrapped { samples } => samples,
    })
}

/// Plays back a recorded track at `rate` times real time
pub struct ReplaySource {
    path: PathBuf,
    samples: Arc<Vec<PositionSample>>,
    cursor: Arc<AtomicUsize>,
    rate: f64,
}

impl ReplaySource {
    pub fn from_path(path: &Path, rate: f64) -> TrackerResult<Self> {
        let samples = load_track(path)?;
        log::info!("Loaded {} samples from {}", samples.len(), path.display());
        Ok(Self::from_samples(path.to_path_buf(), samples, rate))
    }

    pub fn from_samples(path: PathBuf, samples: Vec<PositionSample>, rate: f64) -> Self {
        Self {
            path,
            samples: Arc::new(samples),
            cursor: Arc::new(AtomicUsize::new(0)),
            rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples not yet emitted
    pub fn remaining(&self) -> usize {
        self.samples
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

impl PositionSource for ReplaySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Replay
    }

    fn is_available(&self) -> bool {
        self.remaining() > 0
    }

    fn subscribe(&mut self, sink: EventSink) -> TrackerResult<SubscriptionHandle> {
        if self.remaining() == 0 {
            return Err(TrackerError::SourceUnavailable(format!(
                "replay of {} is exhausted",
                self.path.display()
            )));
        }
        let generation = sink.generation();
        let task = tokio::spawn(replay_loop(
            sink,
            self.samples.clone(),
            self.cursor.clone(),
            self.rate,
        ));
        Ok(SubscriptionHandle::spawned(generation, task))
    }
}

/// Gap to wait before emitting `next`, scaled by the playback rate
fn pacing(previous: Option<&PositionSample>, next: &PositionSample, rate: f64) -> Option<Duration> {
    let previous = previous?;
    if rate <= 0.0 {
        return None;
    }
    let gap_ms = i128::from(next.timestamp_ms) - i128::from(previous.timestamp_ms);
    if gap_ms <= 0 {
        return None;
    }
    // Gaps too long to represent saturate; tokio treats Duration::MAX as "never"
    let secs = gap_ms as f64 / 1000.0 / rate;
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

async fn replay_loop(
    sink: EventSink,
    samples: Arc<Vec<PositionSample>>,
    cursor: Arc<AtomicUsize>,
    rate: f64,
) {
    loop {
        let index = cursor.load(Ordering::SeqCst);
        let Some(sample) = samples.get(index) else {
            log::info!("[replay] end of track after {} samples", samples.len());
            break;
        };

        let previous = index.checked_sub(1).and_then(|i| samples.get(i));
        if let Some(wait) = pacing(previous, sample, rate) {
            sleep(wait).await;
        }

        if !sink.send_sample(sample.clone()).await {
            break;
        }
        cursor.store(index + 1, Ordering::SeqCst);
    }
}
