//! ptrack Commands - Host-Facing Preset Tracker
//!
//! Wires the core types and the record store to the host: conversation
//! lifecycle, reply capture, click-to-inspect and the cleanup, migrate and
//! force-save commands. Also owns tracing initialization.

pub mod telemetry;
pub mod tracker;

pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
pub use tracker::{
    CleanupOutcome, ForceSaved, InspectView, PresetTracker, ReplyCapture, SkipReason,
};

// Re-export the types hosts need to implement collaborators.
pub use ptrack_core::{
    ChatMessage, ConversationSource, EnvironmentState, TrackerConfig, TrackerError,
    TrackerResult, Variant,
};
pub use ptrack_storage::{JsonFileSink, MetadataSink};
