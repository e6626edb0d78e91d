//! ptrack Core - Preset Tracking Types
//!
//! Pure data structures and pure functions shared by every other crate:
//! fingerprints, preset records, the conversation model, the environment
//! provider seam, preset collection, configuration and the error taxonomy.
//! Nothing in this crate performs I/O beyond reading a config file.

pub mod collector;
pub mod config;
pub mod conversation;
pub mod environment;
pub mod error;
pub mod fingerprint;
pub mod record;

pub use collector::collect;
pub use config::{DisplayLabels, TrackerConfig};
pub use conversation::{live_fingerprints, ChatMessage, GenerationSource, Variant, VariantSelection};
pub use environment::{ConversationSource, EnvironmentState};
pub use error::{ConfigError, TrackerError, TrackerResult};
pub use fingerprint::{fingerprint, Fingerprint, MODEL_SEPARATOR, UNKNOWN_MODEL};
pub use record::{PresetRecord, StoredRecord};
