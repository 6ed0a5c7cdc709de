//! # Tillsync Client
//!
//! Device-side agent that keeps a point-of-sale terminal's replica in sync
//! with the Tillsync server.
//!
//! The agent owns one [`Store`] (the engine's [`tillsync_engine::Replica`]
//! plus its snapshot file) shared by every tenant signed in on the device.
//! Each tenant gets an [`Orchestrator`] that pushes the change log and pulls
//! remote changes on a timer, on reconnect and on demand. The
//! [`SyncRegistry`] starts and stops those loops, and [`http::router`]
//! exposes status, conflicts and local writes to the UI.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod registry;
pub mod remote;
pub mod store;

pub use config::{Config, ConfigError, SyncSettings, MAX_PUSH_BATCH};
pub use connectivity::{probe_loop, Connectivity};
pub use error::{Result, SyncError};
pub use http::{router, AgentState};
pub use orchestrator::{CycleReport, Orchestrator, SyncPhase, SyncStatusView};
pub use registry::SyncRegistry;
pub use remote::{HttpRemote, Remote};
pub use store::{SnapshotFile, Store};
