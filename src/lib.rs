//! Account check: reconcile submitted account identifiers against a
//! reference sheet column.

pub mod channels;
pub mod checker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod export;
pub mod ingest;
pub mod recon;
pub mod reference;
