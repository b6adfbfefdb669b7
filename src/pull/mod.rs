//! Pull supervision
//!
//! The supervisor runs one transcoder subprocess per pulled source and
//! keeps two maps in sync with their lifecycles.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<PullSupervisor>
//!              ┌────────────────────────────────┐
//!              │ ProcessStore: token → handle   │
//!              │ ActivePulls:  name  → marker   │
//!              └──────────────┬─────────────────┘
//!                             │ start_pull / stop_pull
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!     [monitor task]     [monitor task]     [monitor task]
//!     ffmpeg cam-1       ffmpeg cam-2       ffmpeg cam-3
//!          │                  │                  │
//!          └── exit ──► unregister ──► restart or offline write
//! ```
//!
//! Every pull gets its own monitor task, so exits, stderr scanning, and
//! registry writes for one source never stall another. Within a single
//! token, correctness under racing events comes from insert-if-absent
//! registration and no-op double-unregistration, not mutual exclusion.

pub mod command;
pub mod handle;
pub mod store;
pub mod supervisor;

pub use command::PullCommand;
pub use handle::{ActivePull, PullHandle, PullOutput};
pub use store::{ActivePulls, ProcessStore};
pub use supervisor::PullSupervisor;
