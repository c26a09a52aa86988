//! Position sources and the event queue they feed.
//!
//! Every producer (live sensor, simulator, replay, timer) pushes
//! [`Envelope`]s into one bounded channel owned by the tracking session.
//! Each envelope carries the generation of the subscription that produced
//! it, so events queued before a stop/reset can be recognised and dropped.

pub mod live;
pub mod replay;
pub mod simulated;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::{SourceErrorKind, TrackerResult};
use crate::types::PositionSample;

pub use live::LiveSource;
pub use replay::ReplaySource;
pub use simulated::SimulatedSource;

/// What kind of producer is behind a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Live,
    Simulated,
    Replay,
}

/// Event delivered to the session's queue
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Sample(PositionSample),
    SourceError(SourceErrorKind),
    Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub generation: u64,
    pub event: TrackerEvent,
}

/// Sending half handed to a source on subscribe
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Envelope>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<Envelope>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a fix. Returns false once the session side is gone.
    pub async fn send_sample(&self, sample: PositionSample) -> bool {
        self.send(TrackerEvent::Sample(sample)).await
    }

    /// Deliver a terminal source error
    pub async fn send_error(&self, kind: SourceErrorKind) -> bool {
        self.send(TrackerEvent::SourceError(kind)).await
    }

    /// Ticks are droppable: a later tick carries the same information
    pub(crate) fn try_tick(&self) -> bool {
        match self.tx.try_send(self.envelope(TrackerEvent::Tick)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Event queue full, dropping timer tick");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, event: TrackerEvent) -> bool {
        self.tx.send(self.envelope(event)).await.is_ok()
    }

    fn envelope(&self, event: TrackerEvent) -> Envelope {
        Envelope {
            generation: self.generation,
            event,
        }
    }
}

/// Handle to an active subscription. Dropping it does not cancel anything;
/// call [`SubscriptionHandle::cancel`] or [`PositionSource::unsubscribe`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Subscription backed by a spawned producer task
    pub fn spawned(generation: u64, task: JoinHandle<()>) -> Self {
        Self {
            generation,
            task: Some(task),
        }
    }

    /// Subscription whose producer lives outside this crate
    pub fn detached(generation: u64) -> Self {
        Self {
            generation,
            task: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Anything that can emit position samples
pub trait PositionSource: Send {
    fn kind(&self) -> SourceKind;

    /// Whether this source can run on this machine right now
    fn is_available(&self) -> bool {
        true
    }

    /// Start producing samples into `sink`
    fn subscribe(&mut self, sink: EventSink) -> TrackerResult<SubscriptionHandle>;

    /// Stop producing. Events already queued are the caller's to discard.
    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        handle.cancel();
    }
}
