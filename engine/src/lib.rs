//! # Tillsync Engine
//!
//! The deterministic core of an offline-first sync client for point-of-sale
//! devices.
//!
//! A device keeps operating while disconnected: every local edit is written to
//! the local record and queued in a durable change log. When connectivity
//! returns the queued changes are pushed to the remote system of record, and
//! the changes other devices of the same tenant produced are pulled back.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the network, the filesystem or the
//!   wall clock. Callers pass `now` explicitly and feed it wire responses.
//! - **Deterministic**: the same inputs always produce the same state.
//! - **Opaque entities**: every business entity is a `(table, recordId,
//!   payload)` tuple; the engine only owns the sync fields.
//!
//! ## Core Concepts
//!
//! ### Change log
//!
//! [`ChangeLog`] holds at most one pending [`ChangeRecord`] per record.
//! Further edits coalesce into it, so a record's changes reach the server in
//! the order they were made and a record is never created twice.
//!
//! ### Sync state
//!
//! [`SyncStateStore`] tracks per-record [`SyncStatus`], per-table pull
//! cursors, open [`ConflictCase`]s and an audit trail of automatic
//! resolutions.
//!
//! ### Conflict policy
//!
//! [`ConflictResolver`] applies tombstone priority first, then last writer
//! wins on edit timestamps. Exact ties become a [`ConflictCase`] that must be
//! resolved through [`Replica::resolve`].
//!
//! ## Quick Start
//!
//! ```rust
//! use tillsync_engine::{
//!     FieldDef, FieldType, MemoryRepository, Replica, Schema, SyncStatus, TableSchema,
//! };
//! use serde_json::json;
//!
//! let schema = Schema::new(1).with_table(TableSchema::new(
//!     "menu_items",
//!     vec![FieldDef::required("name", FieldType::String)],
//! ));
//! let mut replica = Replica::new(schema, MemoryRepository::new());
//!
//! let payload = json!({"name": "Margherita"}).as_object().cloned().unwrap();
//! replica
//!     .create("tenant-1", "menu_items", "item-1", payload, 1_706_745_600_000)
//!     .unwrap();
//!
//! assert_eq!(
//!     replica.state().get_status("tenant-1", "menu_items", "item-1"),
//!     SyncStatus::Pending
//! );
//! assert_eq!(replica.summary("tenant-1").pending_count, 1);
//! ```
//!
//! ## Persistence
//!
//! [`Replica::export_state`] and [`Replica::import_state`] convert to and from
//! a [`ReplicaSnapshot`], which serializes to JSON with deterministic
//! ordering.

pub mod backoff;
pub mod catalog;
pub mod change;
pub mod change_log;
pub mod clock;
pub mod conflict;
pub mod error;
pub mod protocol;
pub mod pull;
pub mod push;
pub mod record;
pub mod replica;
pub mod repository;
pub mod schema;
pub mod snapshot;
pub mod state;
pub mod tombstone;

// Re-export main types at crate root
pub use backoff::{Backoff, BackoffPolicy};
pub use catalog::{default_catalog, schema_from_json, CATALOG_VERSION};
pub use change::{ChangeAction, ChangeRecord, PriorState};
pub use change_log::{ChangeLog, Disposition, Enqueued};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{
    ConflictCase, ConflictReason, ConflictResolver, RemoteState, Resolution, ResolutionRecord,
    ResolveOutcome, Verdict, Winner,
};
pub use error::Error;
pub use protocol::{
    PullChange, PullQuery, PullResponse, PushChange, PushOutcome, PushRequest, PushResponse,
    PushResult,
};
pub use pull::PullReport;
pub use push::{PushBatch, PushReport};
pub use record::{LocalRecord, RecordKey, RemoteVersion, SyncStatus};
pub use replica::Replica;
pub use repository::{EntityRepository, MemoryRepository};
pub use schema::{FieldDef, FieldType, Schema, TableSchema};
pub use snapshot::{ReplicaSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use state::{SyncStateStore, SyncSummary};
pub use tombstone::TombstoneManager;

/// Type aliases for clarity
pub type TenantId = String;
pub type TableName = String;
pub type RecordId = String;
pub type ChangeId = String;
pub type Timestamp = u64;
pub type Cursor = u64;
pub type SchemaVersion = u32;

/// Business fields of a record, treated as an opaque field map.
pub type Payload = serde_json::Map<String, serde_json::Value>;
