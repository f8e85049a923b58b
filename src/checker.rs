//! One check, end to end: payload in, replies out.

use std::sync::Arc;
use std::time::Duration;

use crate::channels::OutgoingResponse;
use crate::error::IngestError;
use crate::export::render_xlsx;
use crate::ingest::{self, Payload};
use crate::recon::{ReportSettings, reconcile, report};
use crate::reference::{ReferenceLoader, load_reference_set};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

pub const NO_IDENTIFIERS_MESSAGE: &str = "❌ No valid accounts found to check.";

/// Runs submissions against a fresh reference snapshot.
///
/// Holds only immutable state; share it behind an `Arc` across tasks.
pub struct Checker {
    loader: Arc<dyn ReferenceLoader>,
    settings: ReportSettings,
    fetch_timeout: Duration,
}

impl Checker {
    pub fn new(loader: Arc<dyn ReferenceLoader>, settings: ReportSettings) -> Self {
        Self {
            loader,
            settings,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    /// Check one submission and build the replies, in send order:
    /// summary, notes, then export documents.
    ///
    /// Every failure becomes a user-facing reply; nothing is propagated.
    pub async fn check(&self, payload: Result<Payload, IngestError>) -> Vec<OutgoingResponse> {
        let identifiers = match payload.and_then(|p| ingest::identifiers(&p)) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::info!(error = %e, "Submission rejected");
                return vec![OutgoingResponse::text(ingest_error_message(&e))];
            }
        };

        let reference = load_reference_set(self.loader.as_ref(), self.fetch_timeout).await;
        let result = reconcile(&identifiers, &reference);
        let outcome = report(&result, &self.settings);

        tracing::info!(
            total = result.total,
            matched = result.matched.len(),
            unmatched = result.unmatched.len(),
            reference = reference.len(),
            quota = ?outcome.quota,
            "Check complete"
        );

        let mut responses = Vec::with_capacity(1 + outcome.notes.len() + outcome.exports.len());
        responses.push(OutgoingResponse::text(outcome.summary));
        responses.extend(outcome.notes.into_iter().map(OutgoingResponse::text));

        for table in &outcome.exports {
            match render_xlsx(table) {
                Ok(export) => responses.push(OutgoingResponse::document(
                    export.caption,
                    export.file_name,
                    export.bytes,
                )),
                Err(e) => {
                    tracing::error!(file = %table.file_name, error = %e, "Export failed");
                    responses.push(OutgoingResponse::text(format!(
                        "❌ Could not create {}: {e}",
                        table.file_name
                    )));
                }
            }
        }

        responses
    }
}

/// User-facing text for a rejected submission.
pub fn ingest_error_message(err: &IngestError) -> String {
    match err {
        IngestError::EmptyInput => NO_IDENTIFIERS_MESSAGE.to_string(),
        IngestError::UnsupportedFormat { file_name } => format!(
            "❌ Unsupported file {file_name}. Send text, .txt, .csv, .xlsx, .xls, .ods or .docx."
        ),
        IngestError::Decode { file_name, reason } => {
            format!("❌ Could not read {file_name}: {reason}")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::ReferenceError;
    use crate::ingest::FileUpload;
    use crate::reference::StaticLoader;

    struct CountingLoader {
        calls: AtomicUsize,
        cells: Vec<String>,
    }

    #[async_trait]
    impl ReferenceLoader for CountingLoader {
        fn name(&self) -> &str {
            "counting"
        }

        async fn load(&self) -> Result<Vec<String>, ReferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.cells.clone())
        }
    }

    fn checker(cells: &[&str]) -> Checker {
        Checker::new(
            Arc::new(StaticLoader::new(cells.iter().copied())),
            ReportSettings::default(),
        )
    }

    fn text(s: &str) -> Result<Payload, IngestError> {
        Ok(Payload::Text(s.to_string()))
    }

    #[tokio::test]
    async fn summary_then_unmatched_document() {
        let responses = checker(&["b"]).check(text("a\nb\nc")).await;

        assert_eq!(responses.len(), 2);
        assert!(responses[0].document.is_none());
        assert!(responses[0].content.contains("📋 Checked: 3 accounts"));
        assert!(responses[0].content.contains("❌ Already received: 1"));
        assert!(responses[0].content.contains("✅ Not yet received: 2"));
        assert!(responses[0].content.contains("📄 Already received: b"));

        let doc = responses[1].document.as_ref().unwrap();
        assert_eq!(doc.file_name, "not_received_accounts.xlsx");
        assert!(doc.bytes.starts_with(b"PK"));
        assert_eq!(responses[1].content, "📎 Not yet received accounts (2)");
    }

    #[tokio::test]
    async fn all_matched_sends_note_instead_of_document() {
        let responses = checker(&["a", "b"]).check(text("a, b")).await;

        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.document.is_none()));
        assert!(responses[1].content.contains("No not-yet-received"));
    }

    #[tokio::test]
    async fn empty_input_never_loads_reference() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
            cells: vec!["a".into()],
        });
        let checker = Checker::new(loader.clone(), ReportSettings::default());

        let responses = checker.check(text("  \n , ")).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].content, NO_IDENTIFIERS_MESSAGE);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reference_is_reloaded_per_check() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
            cells: vec![],
        });
        let checker = Checker::new(loader.clone(), ReportSettings::default());

        checker.check(text("a")).await;
        checker.check(text("b")).await;

        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsupported_file_is_rejected() {
        let payload = Ok(Payload::File(FileUpload {
            file_name: "photo.png".into(),
            mime_type: Some("image/png".into()),
            bytes: vec![0x89, b'P', b'N', b'G'],
        }));

        let responses = checker(&[]).check(payload).await;

        assert_eq!(responses.len(), 1);
        assert!(responses[0].content.contains("Unsupported file photo.png"));
    }

    #[tokio::test]
    async fn decode_failure_includes_cause() {
        let payload = Err(IngestError::Decode {
            file_name: "big.xlsx".into(),
            reason: "file too large".into(),
        });

        let responses = checker(&[]).check(payload).await;

        assert_eq!(responses[0].content, "❌ Could not read big.xlsx: file too large");
    }

    #[tokio::test]
    async fn large_matched_list_is_exported_first() {
        let reference: Vec<String> = (0..51).map(|i| format!("m{i}")).collect();
        let submission = reference.join("\n") + "\nextra";
        let checker = Checker::new(
            Arc::new(StaticLoader::new(reference)),
            ReportSettings::default(),
        );

        let responses = checker.check(text(&submission)).await;

        let files: Vec<&str> = responses
            .iter()
            .filter_map(|r| r.document.as_ref().map(|d| d.file_name.as_str()))
            .collect();
        assert_eq!(files, vec!["received_accounts.xlsx", "not_received_accounts.xlsx"]);
        assert!(!responses[0].content.contains("📄"));
    }
}
