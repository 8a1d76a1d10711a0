pub mod config;
pub mod controller;
pub mod distance;
pub mod finalizer;
pub mod location;
pub mod replay;
pub mod segment;
pub mod state;

pub use config::TrackerConfig;
pub use controller::{TrackingController, TrackingEvent};
pub use distance::{distance_between, path_length};
pub use finalizer::{compute_run_stats, RunFinalizer, RunStats};
pub use location::LocationFeed;
pub use replay::{parse_track, replay_track, ReplayOutcome, TrackEvent};
pub use segment::{AppendOutcome, Fix, Segment, SegmentRecorder, SegmentUpdate};
pub use state::{StoppedSession, TrackingSnapshot, TrackingState, TrackingStatus};
