//! StreamHub ingest supervisor
//!
//! Bridges configured RTSP camera feeds and external RTMP publishers into
//! HLS playback. The supervisor discovers pulled sources from the stream
//! registry, runs one transcoder subprocess per source, authorizes
//! inbound publishers, and mirrors lifecycle state back into the
//! registry.
//!
//! # Components
//!
//! - [`pull`] — process registry and transcoder supervision
//! - [`registry`] — stream registry client and change feed
//! - [`gate`] — publish authorization
//! - [`reconcile`] — lifecycle-to-registry status mirroring
//! - [`sync`] — source directory sync (startup load + change feed)
//! - [`health`] — periodic host/stream health sampling
//! - [`surface`] — HTTP hook and playback surface

pub mod config;
pub mod error;
pub mod gate;
pub mod health;
pub mod pull;
pub mod reconcile;
pub mod registry;
pub mod surface;
pub mod sync;

pub use config::{IngestConfig, PullOutputKind};
pub use error::{IngestError, Result};
pub use gate::{AccessDecision, AuthGate, PublishRequest, RejectReason};
pub use health::HealthSampler;
pub use pull::{ActivePulls, ProcessStore, PullHandle, PullSupervisor};
pub use reconcile::{PlayRequest, StatusReconciler};
pub use registry::{
    ChangeEvent, ChangeFeed, RestRegistry, SourceDescriptor, StreamRegistry, StreamStatus,
};
pub use surface::{create_router, run_surface, SurfaceState};
pub use sync::SourceSync;
