//! # scaffold-sync
//!
//! Reconciles a compiled blueprint against the chronicle (what the last run
//! wrote) and the disk (what is there now), then applies the difference.
//!
//! Call [`pipeline::plan`] for a read-only preview or [`pipeline::apply`] to
//! materialize and commit.

pub mod audit;
pub mod chronicle;
pub mod diff;
pub mod digest;
pub mod error;
pub mod history;
pub mod intent;
pub mod lock;
pub mod materializer;
pub mod oracle;
pub mod pipeline;
pub mod snapshot;

pub use chronicle::{Chronicle, LoadState, Manifest, ManifestEntry};
pub use error::SyncError;
pub use history::{HistoryRecord, HistorySink, JsonlHistory, NoHistory};
pub use materializer::{WriteAction, WriteResult};
pub use oracle::{Conflict, ConflictPolicy, ReconciliationPlan, Summary};
pub use pipeline::{apply, plan, ApplyOutcome, Planned, RunOptions};
