//! Stream registry collaborator
//!
//! The registry is the hosted store the dashboard edits: source
//! configuration, durable stream status, viewer counts, health samples.
//! The supervisor reads configuration from it, mirrors lifecycle state
//! into it, and subscribes to its change feed; it never treats it as the
//! truth for what is currently running.

pub mod changes;
pub mod client;
pub mod model;

#[cfg(test)]
pub(crate) mod testing;

pub use changes::{ChangeFeed, ChangeFeedHandle};
pub use client::{RestRegistry, StreamRegistry};
pub use model::{
    masked_origin, ChangeEvent, HealthSample, HealthStatus, IngestKind, OverlayConfig,
    RemovedSource, SourceDescriptor, StreamSettings, StreamStatus, StreamUpdate,
};
