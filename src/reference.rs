//! Reference column loaders: the "already received" side of a check.
//!
//! Loaders return raw cell text; keys are normalized here, never assumed
//! pre-normalized by the source. A failing or slow source degrades to an
//! empty set, so every submitted account is reported as not received.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ReferenceError;
use crate::recon::normalize_strict;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
const DOCS_BASE: &str = "https://docs.google.com";

/// Source of the reference column.
#[async_trait]
pub trait ReferenceLoader: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetch every raw cell of the reference column.
    async fn load(&self) -> Result<Vec<String>, ReferenceError>;
}

/// Load a fresh reference snapshot, bounded by `timeout`.
///
/// Never fails: errors and timeouts are logged and yield an empty set.
pub async fn load_reference_set(loader: &dyn ReferenceLoader, timeout: Duration) -> HashSet<String> {
    let outcome = match tokio::time::timeout(timeout, loader.load()).await {
        Ok(result) => result,
        Err(_) => Err(ReferenceError::Timeout(timeout)),
    };

    match outcome {
        Ok(cells) => {
            let keys = normalize_cells(&cells);
            tracing::debug!(
                source = loader.name(),
                cells = cells.len(),
                keys = keys.len(),
                "Reference column loaded"
            );
            keys
        }
        Err(e) => {
            tracing::error!(
                source = loader.name(),
                error = %e,
                "Reference load failed; treating every account as not received"
            );
            HashSet::new()
        }
    }
}

/// Normalize raw cells into lookup keys, dropping blanks.
pub fn normalize_cells<S: AsRef<str>>(cells: &[S]) -> HashSet<String> {
    cells
        .iter()
        .map(|c| normalize_strict(c.as_ref()))
        .filter(|k| !k.is_empty())
        .collect()
}

// ── Google Sheets ───────────────────────────────────────────────────

/// Where a reference column lives.
#[derive(Debug, Clone)]
pub struct SheetLocation {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// Column letters, e.g. `A`.
    pub column: String,
}

impl SheetLocation {
    /// A1 range covering the whole column, e.g. `'Sheet1'!A:A`.
    pub fn a1_range(&self) -> String {
        format!(
            "'{}'!{col}:{col}",
            self.sheet_name.replace('\'', "''"),
            col = self.column
        )
    }
}

/// Credentials for the Sheets values API.
#[derive(Debug, Clone)]
pub enum SheetsAuth {
    ApiKey(SecretString),
    BearerToken(SecretString),
}

/// Reads the column through the Sheets v4 `values.get` endpoint.
pub struct SheetsApiLoader {
    location: SheetLocation,
    auth: SheetsAuth,
    client: reqwest::Client,
    base_url: String,
}

impl SheetsApiLoader {
    pub fn new(location: SheetLocation, auth: SheetsAuth) -> Self {
        Self {
            location,
            auth,
            client: reqwest::Client::new(),
            base_url: SHEETS_API_BASE.to_string(),
        }
    }

    /// Point the loader at another host (local test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn values_url(&self) -> Result<reqwest::Url, ReferenceError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| self.parse_error(e))?;
        url.path_segments_mut()
            .map_err(|_| self.parse_error("base URL cannot carry a path"))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                self.location.spreadsheet_id.as_str(),
                "values",
                self.location.a1_range().as_str(),
            ]);
        url.query_pairs_mut().append_pair("majorDimension", "COLUMNS");
        if let SheetsAuth::ApiKey(key) = &self.auth {
            url.query_pairs_mut().append_pair("key", key.expose_secret());
        }
        Ok(url)
    }

    fn parse_error(&self, reason: impl ToString) -> ReferenceError {
        ReferenceError::Parse {
            source_name: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ReferenceLoader for SheetsApiLoader {
    fn name(&self) -> &str {
        "sheets-api"
    }

    async fn load(&self) -> Result<Vec<String>, ReferenceError> {
        let mut request = self.client.get(self.values_url()?);
        if let SheetsAuth::BearerToken(token) = &self.auth {
            request = request.bearer_auth(token.expose_secret());
        }

        let body = fetch_body(self.name(), request).await?;
        parse_value_range(&body).map_err(|e| self.parse_error(e))
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Extract the first column of a `values.get` response (COLUMNS major).
fn parse_value_range(body: &str) -> Result<Vec<String>, serde_json::Error> {
    let range: ValueRange = serde_json::from_str(body)?;
    Ok(range
        .values
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

/// Reads the column from the sheet's CSV export; needs link sharing enabled.
pub struct PublishedCsvLoader {
    location: SheetLocation,
    client: reqwest::Client,
    base_url: String,
}

impl PublishedCsvLoader {
    pub fn new(location: SheetLocation) -> Self {
        Self {
            location,
            client: reqwest::Client::new(),
            base_url: DOCS_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn export_url(&self) -> Result<reqwest::Url, ReferenceError> {
        let parse_error = |reason: String| ReferenceError::Parse {
            source_name: self.name().to_string(),
            reason,
        };
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| parse_error(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| parse_error("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend([
                "spreadsheets",
                "d",
                self.location.spreadsheet_id.as_str(),
                "gviz",
                "tq",
            ]);
        url.query_pairs_mut()
            .append_pair("tqx", "out:csv")
            .append_pair("sheet", &self.location.sheet_name)
            .append_pair("tq", &format!("select {}", self.location.column));
        Ok(url)
    }
}

#[async_trait]
impl ReferenceLoader for PublishedCsvLoader {
    fn name(&self) -> &str {
        "published-csv"
    }

    async fn load(&self) -> Result<Vec<String>, ReferenceError> {
        let request = self.client.get(self.export_url()?);
        let body = fetch_body(self.name(), request).await?;
        parse_csv_column(&body).map_err(|e| ReferenceError::Parse {
            source_name: self.name().to_string(),
            reason: e.to_string(),
        })
    }
}

/// First field of every CSV record.
fn parse_csv_column(body: &str) -> Result<Vec<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut cells = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(first) = record.get(0) {
            cells.push(first.to_string());
        }
    }
    Ok(cells)
}

async fn fetch_body(
    source_name: &str,
    request: reqwest::RequestBuilder,
) -> Result<String, ReferenceError> {
    let resp = request.send().await.map_err(|e| ReferenceError::Request {
        source_name: source_name.to_string(),
        reason: e.to_string(),
    })?;

    let status = resp.status();
    let body = resp.text().await.map_err(|e| ReferenceError::Request {
        source_name: source_name.to_string(),
        reason: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(ReferenceError::Status {
            source_name: source_name.to_string(),
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }
    Ok(body)
}

// ── In-memory ───────────────────────────────────────────────────────

/// Fixed reference column, for local runs and tests.
pub struct StaticLoader {
    cells: Vec<String>,
}

impl StaticLoader {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ReferenceLoader for StaticLoader {
    fn name(&self) -> &str {
        "static"
    }

    async fn load(&self) -> Result<Vec<String>, ReferenceError> {
        Ok(self.cells.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> SheetLocation {
        SheetLocation {
            spreadsheet_id: "sheet123".into(),
            sheet_name: "Sheet1".into(),
            column: "A".into(),
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl ReferenceLoader for FailingLoader {
        fn name(&self) -> &str {
            "failing"
        }
        async fn load(&self) -> Result<Vec<String>, ReferenceError> {
            Err(ReferenceError::Request {
                source_name: "failing".into(),
                reason: "connection refused".into(),
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
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec!["never".into()])
        }
    }

    #[test]
    fn a1_range_quotes_sheet_name() {
        assert_eq!(location().a1_range(), "'Sheet1'!A:A");
        let odd = SheetLocation {
            sheet_name: "Bob's list".into(),
            ..location()
        };
        assert_eq!(odd.a1_range(), "'Bob''s list'!A:A");
    }

    #[test]
    fn values_url_encodes_range_and_key() {
        let loader = SheetsApiLoader::new(location(), SheetsAuth::ApiKey("k-1".to_string().into()));
        let url = loader.values_url().unwrap().to_string();
        assert!(url.starts_with("https://sheets.googleapis.com/v4/spreadsheets/sheet123/values/"));
        assert!(url.contains("/values/'Sheet1'!A:A?majorDimension=COLUMNS"));
        assert!(url.contains("key=k-1"));
    }

    #[test]
    fn values_url_escapes_spaces_in_sheet_name() {
        let spaced = SheetLocation {
            sheet_name: "Received list".into(),
            ..location()
        };
        let loader = SheetsApiLoader::new(spaced, SheetsAuth::ApiKey("k".to_string().into()));
        let url = loader.values_url().unwrap().to_string();
        assert!(url.contains("'Received%20list'!A:A"), "{url}");
    }

    #[test]
    fn values_url_omits_key_for_bearer_auth() {
        let loader = SheetsApiLoader::new(
            location(),
            SheetsAuth::BearerToken("tok".to_string().into()),
        );
        let url = loader.values_url().unwrap().to_string();
        assert!(!url.contains("key="));
    }

    #[test]
    fn export_url_selects_column() {
        let loader = PublishedCsvLoader::new(location());
        let url = loader.export_url().unwrap().to_string();
        assert!(url.starts_with("https://docs.google.com/spreadsheets/d/sheet123/gviz/tq?"));
        assert!(url.contains("tqx=out%3Acsv"));
        assert!(url.contains("sheet=Sheet1"));
        assert!(url.contains("tq=select+A"));
    }

    #[test]
    fn parse_value_range_first_column() {
        let body = r#"{"range":"Sheet1!A1:A4","majorDimension":"COLUMNS","values":[["acc1","ACC2","",42]]}"#;
        assert_eq!(parse_value_range(body).unwrap(), vec!["acc1", "ACC2", "", "42"]);
    }

    #[test]
    fn parse_value_range_empty_sheet() {
        let body = r#"{"range":"Sheet1!A1:A1000","majorDimension":"COLUMNS"}"#;
        assert!(parse_value_range(body).unwrap().is_empty());
    }

    #[test]
    fn parse_value_range_rejects_garbage() {
        assert!(parse_value_range("<html>").is_err());
    }

    #[test]
    fn parse_csv_column_takes_first_field() {
        let body = "\"acc1\"\n\"acc,2\",\"x\"\n\"\"\n";
        assert_eq!(parse_csv_column(body).unwrap(), vec!["acc1", "acc,2", ""]);
    }

    #[test]
    fn normalize_cells_drops_blanks() {
        let keys = normalize_cells(&["Acc-1", "  ", "acc1", "B_2"]);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("acc1"));
        assert!(keys.contains("b_2"));
    }

    #[tokio::test]
    async fn static_loader_yields_normalized_keys() {
        let loader = StaticLoader::new(["Alice", " bob "]);
        let keys = load_reference_set(&loader, Duration::from_secs(1)).await;
        assert!(keys.contains("alice"));
        assert!(keys.contains("bob"));
    }

    #[tokio::test]
    async fn failing_loader_degrades_to_empty_set() {
        let keys = load_reference_set(&FailingLoader, Duration::from_secs(1)).await;
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn slow_loader_times_out_to_empty_set() {
        let keys = load_reference_set(&SlowLoader, Duration::from_millis(50)).await;
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn unreachable_sheets_api_degrades_to_empty_set() {
        let loader = SheetsApiLoader::new(location(), SheetsAuth::ApiKey("k".to_string().into()))
            .with_base_url("http://127.0.0.1:9");
        let keys = load_reference_set(&loader, Duration::from_secs(5)).await;
        assert!(keys.is_empty());
    }
}
