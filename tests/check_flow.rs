//! End-to-end checks through the public API: payload in, replies out.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use calamine::{Data, Reader, Xlsx};

use account_check::channels::OutgoingResponse;
use account_check::checker::{Checker, NO_IDENTIFIERS_MESSAGE};
use account_check::error::{IngestError, ReferenceError};
use account_check::ingest::{FileUpload, Payload};
use account_check::recon::{ReportSettings, extract};
use account_check::reference::{ReferenceLoader, StaticLoader};

struct FailingLoader {
    calls: AtomicUsize,
}

#[async_trait]
impl ReferenceLoader for FailingLoader {
    fn name(&self) -> &str {
        "failing"
    }

    async fn load(&self) -> Result<Vec<String>, ReferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ReferenceError::Status {
            source_name: "failing".into(),
            status: 503,
            body: "unavailable".into(),
        })
    }
}

struct SlowLoader;

#[async_trait]
impl ReferenceLoader for SlowLoader {
    fn name(&self) -> &str {
        "slow"
    }

    async fn load(&self) -> Result<Vec<String>, ReferenceError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec!["a".into(), "b".into(), "c".into()])
    }
}

fn static_checker(reference: &[&str]) -> Checker {
    Checker::new(
        Arc::new(StaticLoader::new(reference.iter().copied())),
        ReportSettings::default(),
    )
}

fn text(s: &str) -> Result<Payload, IngestError> {
    Ok(Payload::Text(s.to_string()))
}

fn summary(responses: &[OutgoingResponse]) -> &str {
    &responses[0].content
}

/// Account column of an exported workbook, header excluded.
fn exported_accounts(response: &OutgoingResponse) -> Vec<String> {
    let doc = response.document.as_ref().expect("document response");
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(doc.bytes.clone())).unwrap();
    let range = workbook.worksheet_range_at(0).unwrap().unwrap();
    range
        .rows()
        .skip(1)
        .map(|row| match &row[1] {
            Data::String(s) => s.clone(),
            other => panic!("unexpected cell {other:?}"),
        })
        .collect()
}

#[test]
fn duplicate_case_variants_collapse() {
    assert_eq!(extract("abc, def, ABC , def"), vec!["abc", "def"]);
}

#[tokio::test]
async fn partition_against_reference() {
    let responses = static_checker(&["b"]).check(text("a\nb\nc")).await;

    let s = summary(&responses);
    assert!(s.contains("Checked: 3"));
    assert!(s.contains("Already received: 1"));
    assert!(s.contains("Not yet received: 2"));
    assert!(s.contains("197 short of the quota"));

    let unmatched = responses.last().unwrap();
    assert_eq!(exported_accounts(unmatched), vec!["a", "c"]);
}

#[tokio::test]
async fn reference_cells_are_normalized() {
    let responses = static_checker(&[" Alice ", "B-O-B"]).check(text("alice, bob, carol")).await;

    let s = summary(&responses);
    assert!(s.contains("📄 Already received: alice, bob"));
    assert_eq!(exported_accounts(responses.last().unwrap()), vec!["carol"]);
}

#[tokio::test]
async fn empty_input_skips_reference() {
    let loader = Arc::new(FailingLoader {
        calls: AtomicUsize::new(0),
    });
    let checker = Checker::new(loader.clone(), ReportSettings::default());

    let responses = checker.check(text("")).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].content, NO_IDENTIFIERS_MESSAGE);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_reference_marks_everything_unmatched() {
    let loader = Arc::new(FailingLoader {
        calls: AtomicUsize::new(0),
    });
    let checker = Checker::new(loader.clone(), ReportSettings::default());

    let responses = checker.check(text("a, b, c")).await;

    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    assert!(summary(&responses).contains("Already received: 0"));
    assert_eq!(exported_accounts(responses.last().unwrap()), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn slow_reference_times_out_to_unmatched() {
    let checker = Checker::new(Arc::new(SlowLoader), ReportSettings::default())
        .with_fetch_timeout(Duration::from_millis(50));

    let responses = checker.check(text("a, b, c")).await;

    assert!(summary(&responses).contains("Not yet received: 3"));
    assert_eq!(exported_accounts(responses.last().unwrap()), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn exact_quota_is_reported() {
    let checker = Checker::new(
        Arc::new(StaticLoader::new(Vec::<String>::new())),
        ReportSettings {
            quota: 3,
            inline_limit: 50,
        },
    );

    let responses = checker.check(text("a, b, c")).await;

    assert!(summary(&responses).contains("Quota of 3 not-yet-received accounts met exactly"));
}

#[tokio::test]
async fn spreadsheet_upload_is_checked() {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Accounts").unwrap();
    sheet.write_string(1, 0, "user_1").unwrap();
    sheet.write_string(2, 0, "User_2").unwrap();
    sheet.write_number(3, 0, 12345.0).unwrap();
    sheet.write_string(3, 1, "extra column").unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let payload = Ok(Payload::File(FileUpload {
        file_name: "accounts.xlsx".into(),
        mime_type: None,
        bytes,
    }));

    let responses = static_checker(&["user_2"]).check(payload).await;

    assert!(summary(&responses).contains("Checked: 3"));
    assert!(summary(&responses).contains("📄 Already received: User_2"));
    assert_eq!(exported_accounts(responses.last().unwrap()), vec!["user_1", "12345"]);
}

#[tokio::test]
async fn returned_export_is_checked_again() {
    let first = static_checker(&[]).check(text("zeta\nalpha")).await;
    let doc = first.last().unwrap().document.clone().expect("unmatched export");

    let payload = Ok(Payload::File(FileUpload {
        file_name: doc.file_name,
        mime_type: None,
        bytes: doc.bytes,
    }));
    let second = static_checker(&["alpha"]).check(payload).await;

    assert!(summary(&second).contains("Checked: 2 accounts"));
    assert!(summary(&second).contains("📄 Already received: alpha"));
    assert_eq!(exported_accounts(second.last().unwrap()), vec!["zeta"]);
}
