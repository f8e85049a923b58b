//! Human-readable summary and export decisions for a reconciliation.
//!
//! Thresholds:
//! - unmatched count is compared against `quota` (default 200) for the
//!   met / surplus / deficit note
//! - up to `inline_limit` (default 50) matched identifiers are listed inline;
//!   above that they go to an export table
//! - unmatched identifiers are always exported when there is at least one

use std::cmp::Ordering;
use std::fmt::Write as _;

use super::reconcile::Reconciliation;

pub const DEFAULT_QUOTA: usize = 200;
pub const DEFAULT_INLINE_LIMIT: usize = 50;

/// Column headers of every export table.
pub const EXPORT_HEADERS: [&str; 2] = ["No.", "Account"];

/// Tunable reporting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSettings {
    /// Target number of not-yet-received accounts.
    pub quota: usize,
    /// Largest matched list that is still inlined into the summary.
    pub inline_limit: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            inline_limit: DEFAULT_INLINE_LIMIT,
        }
    }
}

/// Where the unmatched count sits relative to the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    Met,
    Surplus(usize),
    Deficit(usize),
}

impl QuotaStatus {
    pub fn evaluate(unmatched: usize, quota: usize) -> Self {
        match unmatched.cmp(&quota) {
            Ordering::Equal => Self::Met,
            Ordering::Greater => Self::Surplus(unmatched - quota),
            Ordering::Less => Self::Deficit(quota - unmatched),
        }
    }
}

/// Which partition an export table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Matched,
    Unmatched,
}

impl ExportKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Matched => "received_accounts.xlsx",
            Self::Unmatched => "not_received_accounts.xlsx",
        }
    }

    pub fn sheet_name(&self) -> &'static str {
        match self {
            Self::Matched => "Received",
            Self::Unmatched => "Not received",
        }
    }
}

/// A two-column table (sequence number, identifier) to send as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    pub kind: ExportKind,
    /// Caption shown next to the file.
    pub label: String,
    pub file_name: String,
    /// `(sequence number starting at 1, identifier)`.
    pub rows: Vec<(usize, String)>,
}

impl ExportTable {
    fn new(kind: ExportKind, identifiers: &[String]) -> Self {
        let label = match kind {
            ExportKind::Matched => format!("📎 Already received accounts ({})", identifiers.len()),
            ExportKind::Unmatched => {
                format!("📎 Not yet received accounts ({})", identifiers.len())
            }
        };
        Self {
            kind,
            label,
            file_name: kind.file_name().to_string(),
            rows: identifiers
                .iter()
                .enumerate()
                .map(|(i, id)| (i + 1, id.clone()))
                .collect(),
        }
    }
}

/// Everything the user is told about one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Counts, quota note and (when small enough) the inline matched list.
    pub summary: String,
    /// Follow-up messages sent after the summary.
    pub notes: Vec<String>,
    pub quota: QuotaStatus,
    /// Matched export first, unmatched export second.
    pub exports: Vec<ExportTable>,
}

/// Build the report for a reconciliation.
pub fn report(result: &Reconciliation, settings: &ReportSettings) -> Report {
    let matched = result.matched.len();
    let unmatched = result.unmatched.len();
    let quota = QuotaStatus::evaluate(unmatched, settings.quota);

    let mut summary = String::new();
    let _ = writeln!(summary, "📋 Checked: {} accounts", result.total);
    let _ = writeln!(summary, "❌ Already received: {matched}");
    let _ = writeln!(summary, "✅ Not yet received: {unmatched}");
    summary.push_str(&quota_note(quota, settings.quota));

    let mut exports = Vec::new();
    let mut notes = Vec::new();

    if matched > settings.inline_limit {
        exports.push(ExportTable::new(ExportKind::Matched, &result.matched));
    } else if matched > 0 {
        let _ = write!(
            summary,
            "\n📄 Already received: {}",
            result.matched.join(", ")
        );
    }

    if unmatched == 0 {
        notes.push("ℹ️ No not-yet-received accounts to export.".to_string());
    } else {
        exports.push(ExportTable::new(ExportKind::Unmatched, &result.unmatched));
    }

    Report {
        summary,
        notes,
        quota,
        exports,
    }
}

fn quota_note(status: QuotaStatus, quota: usize) -> String {
    match status {
        QuotaStatus::Met => format!("✅ Quota of {quota} not-yet-received accounts met exactly."),
        QuotaStatus::Surplus(n) => {
            format!("⚠️ {n} over the quota of {quota} not-yet-received accounts.")
        }
        QuotaStatus::Deficit(n) => {
            format!("⚠️ {n} short of the quota of {quota} not-yet-received accounts.")
        }
    }
}
