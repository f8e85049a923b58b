use std::sync::Arc;

use secrecy::ExposeSecret;

use account_check::channels::{Channel, CliChannel, TelegramChannel};
use account_check::checker::Checker;
use account_check::config::AppConfig;
use account_check::dispatcher::Dispatcher;
use account_check::error::{ConfigError, Error};

#[tokio::main]
async fn main() {
    // A missing .env is fine; real env vars take precedence anyway.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        if matches!(e, Error::Config(ConfigError::MissingEnvVar(_))) {
            eprintln!("  export RECON_SPREADSHEET_ID=<spreadsheet id>");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let config = AppConfig::from_env()?;

    let location = &config.reference.location;
    let loader = config.reference.loader();

    eprintln!("📋 Account check v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Reference: {} {} via {}",
        location.spreadsheet_id,
        location.a1_range(),
        loader.name()
    );
    eprintln!(
        "   Quota: {} not yet received, inline up to {} received",
        config.report.quota, config.report.inline_limit
    );

    tracing::warn!(
        timeout_secs = config.reference.fetch_timeout.as_secs(),
        "If the reference sheet cannot be read, every account is reported as not received"
    );

    let channel: Arc<dyn Channel> = match &config.telegram {
        Some(tg) => {
            eprintln!(
                "   Telegram: enabled (allowed: {})",
                if tg.allowed_users.iter().any(|u| u == "*") {
                    "everyone".to_string()
                } else {
                    tg.allowed_users.join(", ")
                }
            );
            Arc::new(TelegramChannel::new(
                tg.bot_token.expose_secret().to_string(),
                tg.allowed_users.clone(),
            ))
        }
        None => {
            eprintln!("   CLI: exports go to {}", config.export_dir.display());
            eprintln!("   Type accounts, or /file <path>. Ctrl+D to exit.\n");
            Arc::new(CliChannel::new(config.export_dir.clone()))
        }
    };

    channel.health_check().await?;

    let checker = Checker::new(loader, config.report).with_fetch_timeout(config.reference.fetch_timeout);

    Dispatcher::new(channel, Arc::new(checker)).run().await?;

    Ok(())
}
