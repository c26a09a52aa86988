// Speed Tracker Library
// Turns a stream of position fixes into distance, speed and time metrics

pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod geo_math;
pub mod live_status;
pub mod metrics;
pub mod session;
pub mod source;
pub mod types;

// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use error::{SourceErrorKind, TrackerError, TrackerResult};
pub use metrics::{MetricsAccumulator, TrackingMetrics};
pub use session::{MetricsUpdate, SessionState, TrackerStatus, TrackingSession, UpdateCause};
pub use source::{EventSink, PositionSource, SourceKind, SubscriptionHandle};
pub use types::{Coordinate, PositionSample};
