//! Configuration types.
//!
//! Everything comes from environment variables (optionally via `.env`).
//! Values are parsed strictly: a malformed number or column fails startup
//! instead of silently falling back to a default.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::recon::ReportSettings;
use crate::reference::{
    PublishedCsvLoader, ReferenceLoader, SheetLocation, SheetsApiLoader, SheetsAuth,
};

/// Reference sheet configuration.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub location: SheetLocation,
    /// `None` reads the public CSV export instead of the Sheets API.
    pub auth: Option<SheetsAuth>,
    pub fetch_timeout: Duration,
}

impl ReferenceConfig {
    /// The loader matching the configured credentials.
    pub fn loader(&self) -> Arc<dyn ReferenceLoader> {
        match &self.auth {
            Some(auth) => Arc::new(SheetsApiLoader::new(self.location.clone(), auth.clone())),
            None => Arc::new(PublishedCsvLoader::new(self.location.clone())),
        }
    }
}

/// Telegram transport configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub allowed_users: Vec<String>,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub reference: ReferenceConfig,
    pub report: ReportSettings,
    /// `None` runs the CLI channel.
    pub telegram: Option<TelegramConfig>,
    /// Where the CLI channel writes exported workbooks.
    pub export_dir: PathBuf,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let spreadsheet_id = var("RECON_SPREADSHEET_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("RECON_SPREADSHEET_ID".into()))?;
        let sheet_name = var("RECON_SHEET_NAME").unwrap_or_else(|| "Sheet1".to_string());
        let column = match var("RECON_SHEET_COLUMN") {
            Some(col) => parse_column(&col)?,
            None => "A".to_string(),
        };

        let auth = match (var("RECON_SHEETS_API_KEY"), var("RECON_SHEETS_ACCESS_TOKEN")) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    key: "RECON_SHEETS_API_KEY".into(),
                    message: "set either an API key or an access token, not both".into(),
                });
            }
            (Some(key), None) => Some(SheetsAuth::ApiKey(SecretString::from(key))),
            (None, Some(token)) => Some(SheetsAuth::BearerToken(SecretString::from(token))),
            (None, None) => None,
        };

        let fetch_timeout =
            Duration::from_secs(parse_positive(var("RECON_FETCH_TIMEOUT_SECS"), "RECON_FETCH_TIMEOUT_SECS", 15)?);

        let defaults = ReportSettings::default();
        let report = ReportSettings {
            quota: parse_positive(var("RECON_QUOTA"), "RECON_QUOTA", defaults.quota as u64)? as usize,
            inline_limit: parse_number(var("RECON_INLINE_LIMIT"), "RECON_INLINE_LIMIT", defaults.inline_limit as u64)?
                as usize,
        };

        let telegram = var("TELEGRAM_BOT_TOKEN").map(|token| TelegramConfig {
            bot_token: SecretString::from(token),
            allowed_users: parse_list(&var("TELEGRAM_ALLOWED_USERS").unwrap_or_else(|| "*".to_string())),
        });

        let export_dir = var("RECON_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./exports"));

        Ok(Self {
            reference: ReferenceConfig {
                location: SheetLocation {
                    spreadsheet_id,
                    sheet_name,
                    column,
                },
                auth,
                fetch_timeout,
            },
            report,
            telegram,
            export_dir,
        })
    }
}

fn parse_number(value: Option<String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a non-negative integer, got {raw:?}"),
        }),
    }
}

fn parse_positive(value: Option<String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    let n = parse_number(value, key, default)?;
    if n == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(n)
}

/// Column letters `A`..`ZZZ`, upper-cased.
fn parse_column(raw: &str) -> Result<String, ConfigError> {
    let col = raw.to_ascii_uppercase();
    if (1..=3).contains(&col.len()) && col.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(col)
    } else {
        Err(ConfigError::InvalidValue {
            key: "RECON_SHEET_COLUMN".into(),
            message: format!("expected column letters like A or AB, got {raw:?}"),
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
