//! rollcall-store — Persistence for registered identities and scan logs.

pub mod scan_log;
pub mod store;

pub use scan_log::{NewScanLog, ScanLogEntry, ScanType};
pub use store::{Store, StoreError};
