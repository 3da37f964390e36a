//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Build protection → start() periodic tasks → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → periodic tasks exit → server drains → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Background sweeps are owned tasks with an explicit stop, never detached loops
//! - Request paths never evict; all idle cleanup happens in tasks.rs loops

pub mod shutdown;
pub mod signals;
pub mod tasks;

pub use shutdown::Shutdown;
pub use tasks::{spawn_periodic, BackgroundTasks};
