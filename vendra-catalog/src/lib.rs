pub mod snapshot;
pub mod sync;

pub use snapshot::{BalanceSnapshot, CatalogSnapshot, SnapshotStore};
pub use sync::{SyncOutcome, SyncReport, SyncService};
