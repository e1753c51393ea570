//! Output side of the counter.
//!
//! - `session`: dated, per-location folders
//! - `csv_log`: crossing records and summary exports
//! - `snapshot_store`: JPEG snapshots
//! - `worker`: persistence thread; its handle is the crossing handler and
//!   snapshot sink handed to the pipeline
//! - `alert`: warnings for watched categories
//!
//! Nothing here runs on the pipeline worker except enqueueing.

pub mod alert;
pub mod csv_log;
pub mod session;
pub mod snapshot_store;
pub mod worker;

pub use alert::{AlertHandler, DEFAULT_ALERT_CATEGORIES};
pub use csv_log::{CrossingRecord, RecordLog, Summary, RECORD_HEADER, SUMMARY_HEADER};
pub use session::{Location, Session};
pub use worker::{Persistence, PersistenceConfig, PersistenceHandle, PersistenceStats};
