// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregator;
pub mod config;
pub mod context;
pub mod error;
pub mod manual;
pub mod model;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod tags;
pub mod timeline;

// Source adapters and their transports
pub mod ingest;

// ---- Re-exports for stable public API ----
pub use crate::context::{Clock, ManualClock, PollContext, SystemClock};
pub use crate::error::{PulseError, Result};
pub use crate::ingest::transport::Sources;
pub use crate::model::{Blip, BlipSet, BlipSetId, NewBlip, ProviderId, TagSet};
pub use crate::provider::{NewProvider, Provider, ProviderKind};
pub use crate::scheduler::{CycleReport, PollOutcome, Scheduler};
pub use crate::store::{MemoryStore, Store};
