//! # multicomp
//!
//! One model call, many observables. Every assistant response ends with a
//! compact `<obs>` block; this crate recovers it (however mangled), builds one
//! [`Observation`] per turn, and fans it out to independent observers that
//! each keep an incrementally updated, durably persisted model:
//!
//! | Observer     | Store                                   | Learns                         |
//! |--------------|-----------------------------------------|--------------------------------|
//! | `pattern`    | `patterns/cache.json`                   | recurring (intent, tool) pairs |
//! | `scar`       | `scars/observations.json` + log         | failure categories             |
//! | `competence` | `analytics/competence/signals.json`     | user signals per domain        |
//! | `gradient`   | `analytics/gradient-signals.jsonl`      | communication data points      |
//! | `memory`     | `analytics/memory-stats.json`           | context utilization            |
//!
//! The host runtime drives a [`Pipeline`]: `turn_start` returns the protocol
//! prompt, `turn_end` parses, emits, and hands back the redacted text.

pub mod cli;
pub mod config;
pub mod error;
pub mod observation;
pub mod observer;
pub mod observers;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod registry;
pub mod store;
pub mod testing;

pub use config::{PipelineConfig, StreakMode};
pub use error::{ConfigError, ObserverError, StoreError};
pub use observation::Observation;
pub use observer::Observer;
pub use parser::{parse_observation, strip_observation_block, TurnContext};
pub use pipeline::{ChatMessage, Pipeline, PipelineStatus, TurnOutcome};
pub use registry::{EmitReport, ObserverRegistry};
