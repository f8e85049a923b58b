//! Account reconciliation core.
//!
//! Every submission flows through:
//! 1. `extract::extract()`: split the payload, clean and dedupe identifiers
//! 2. `reconcile::reconcile()`: partition against the reference snapshot
//! 3. `report::report()`: summary text, quota note and export tables
//!
//! Nothing here performs I/O; collaborators live in `ingest`, `reference`
//! and `export`.

pub mod extract;
pub mod normalize;
pub mod reconcile;
pub mod report;

pub use extract::extract;
pub use normalize::{normalize, normalize_strict};
pub use reconcile::{Reconciliation, reconcile};
pub use report::{ExportKind, ExportTable, Report, ReportSettings, report};
