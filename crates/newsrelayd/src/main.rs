// # newsrelayd - Feed Relay Daemon
//
// Thin integration layer: all polling, dedup and delivery policy lives in
// newsrelay-core. This binary only:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Wires the HTTP feed source, Discord transport and file stores
// 4. Restores persisted feeds and waits for a shutdown signal
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### State
// - `NEWSRELAY_STATE_DIR`: Directory holding `definitions.json` and
//   `sent_articles.json` (default: `/var/lib/newsrelay`)
//
// ### Feeds
// - `NEWSRELAY_FEED_URL_TEMPLATE`: Feed URL with an `{entity_id}` placeholder
// - `NEWSRELAY_FEEDS`: Comma-separated `entityId=webhookURL` pairs created at
//   startup, in addition to restored feeds
//
// ### Timing
// - `NEWSRELAY_POLL_INTERVAL_SECS`: Sleep after a successful poll
// - `NEWSRELAY_MAX_RETRY_DELAY_SECS`: Cap for the fetch backoff
// - `NEWSRELAY_DELIVERY_ATTEMPTS`: Attempts per article for HTTP failures
// - `NEWSRELAY_STOP_TIMEOUT_SECS`: How long a stop waits for a worker
//
// ### Runtime
// - `NEWSRELAY_MODE`: `live` (default) or `dry-run` (log payloads, never POST)
// - `NEWSRELAY_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export NEWSRELAY_STATE_DIR=/var/lib/newsrelay
// export NEWSRELAY_FEEDS=440=https://discord.com/api/webhooks/1/abc
// export NEWSRELAY_MODE=dry-run
//
// newsrelayd
// ```

use anyhow::{Context, Result};
use newsrelay_core::{
    FileDefinitionStore, FileSentStore, MonitorEvent, MonitorRegistry, RelayConfig,
};
use newsrelay_source_http::HttpFeedSource;
use newsrelay_webhook_discord::{DiscordWebhook, redact_webhook_url};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_STATE_DIR: &str = "/var/lib/newsrelay";
const DEFINITIONS_FILE: &str = "definitions.json";
const SENT_FILE: &str = "sent_articles.json";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum RelayExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<RelayExitCode> for ExitCode {
    fn from(code: RelayExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    state_dir: PathBuf,
    feed_url_template: Option<String>,
    poll_interval_secs: Option<u64>,
    max_retry_delay_secs: Option<u64>,
    delivery_attempts: Option<u32>,
    stop_timeout_secs: Option<u64>,
    feeds: Vec<(String, String)>,
    mode: String,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            state_dir: env::var("NEWSRELAY_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR)),
            feed_url_template: env::var("NEWSRELAY_FEED_URL_TEMPLATE").ok(),
            poll_interval_secs: parse_var("NEWSRELAY_POLL_INTERVAL_SECS")?,
            max_retry_delay_secs: parse_var("NEWSRELAY_MAX_RETRY_DELAY_SECS")?,
            delivery_attempts: parse_var("NEWSRELAY_DELIVERY_ATTEMPTS")?,
            stop_timeout_secs: parse_var("NEWSRELAY_STOP_TIMEOUT_SECS")?,
            feeds: parse_feeds(&env::var("NEWSRELAY_FEEDS").unwrap_or_default())?,
            mode: env::var("NEWSRELAY_MODE").unwrap_or_else(|_| "live".to_string()),
            log_level: env::var("NEWSRELAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Checks daemon-level ranges here; everything else is delegated to
    /// `RelayConfig::validate`.
    fn validate(&self) -> Result<()> {
        if self.state_dir.as_os_str().is_empty() {
            anyhow::bail!("NEWSRELAY_STATE_DIR cannot be empty");
        }

        if let Some(interval) = self.poll_interval_secs
            && !(10..=86_400).contains(&interval)
        {
            anyhow::bail!(
                "NEWSRELAY_POLL_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                interval
            );
        }

        if let Some(max_delay) = self.max_retry_delay_secs
            && !(60..=86_400).contains(&max_delay)
        {
            anyhow::bail!(
                "NEWSRELAY_MAX_RETRY_DELAY_SECS must be between 60 and 86400 seconds. Got: {}",
                max_delay
            );
        }

        if let Some(attempts) = self.delivery_attempts
            && (attempts == 0 || attempts > 10)
        {
            anyhow::bail!(
                "NEWSRELAY_DELIVERY_ATTEMPTS must be between 1 and 10. Got: {}",
                attempts
            );
        }

        if let Some(timeout) = self.stop_timeout_secs
            && timeout > 600
        {
            anyhow::bail!(
                "NEWSRELAY_STOP_TIMEOUT_SECS must be at most 600 seconds. Got: {}",
                timeout
            );
        }

        match self.mode.as_str() {
            "live" | "dry-run" => {}
            _ => anyhow::bail!(
                "NEWSRELAY_MODE '{}' is not valid. Valid modes: live, dry-run",
                self.mode
            ),
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NEWSRELAY_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.relay_config()
            .validate()
            .context("Invalid relay configuration")?;

        Ok(())
    }

    /// Build the core configuration, applying environment overrides
    fn relay_config(&self) -> RelayConfig {
        let mut config = RelayConfig::new();

        if let Some(template) = &self.feed_url_template {
            config.source.feed_url_template = template.clone();
        }
        if let Some(interval) = self.poll_interval_secs {
            config.poll.poll_interval_secs = interval;
        }
        if let Some(max_delay) = self.max_retry_delay_secs {
            config.poll.max_retry_delay_secs = max_delay;
        }
        if let Some(attempts) = self.delivery_attempts {
            config.delivery.max_attempts = attempts;
        }
        if let Some(timeout) = self.stop_timeout_secs {
            config.registry.stop_timeout_secs = timeout;
        }

        config
    }

    fn dry_run(&self) -> bool {
        self.mode == "dry-run"
    }
}

/// Parse an optional numeric environment variable
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", name, value, e)),
        Err(_) => Ok(None),
    }
}

/// Parse `NEWSRELAY_FEEDS`: comma-separated `entityId=webhookURL` pairs
fn parse_feeds(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (entity_id, webhook_url) = pair.split_once('=').ok_or_else(|| {
                anyhow::anyhow!(
                    "NEWSRELAY_FEEDS entries must look like entityId=webhookURL. Got: '{}'",
                    redact_webhook_url(pair)
                )
            })?;
            let entity_id = entity_id.trim();
            let webhook_url = webhook_url.trim();
            if entity_id.is_empty() || webhook_url.is_empty() {
                anyhow::bail!(
                    "NEWSRELAY_FEEDS entry has an empty entity id or webhook URL: '{}'",
                    redact_webhook_url(pair)
                );
            }
            Ok((entity_id.to_string(), webhook_url.to_string()))
        })
        .collect()
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return RelayExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return RelayExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RelayExitCode::ConfigError.into();
    }

    info!("Starting newsrelayd daemon");
    info!(
        "Configuration loaded: state dir {}, {} startup feed(s), mode {}",
        config.state_dir.display(),
        config.feeds.len(),
        config.mode
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RelayExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            RelayExitCode::RuntimeError
        } else {
            RelayExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(config: Config) -> Result<()> {
    let relay_config = config.relay_config();

    let definitions = FileDefinitionStore::new(config.state_dir.join(DEFINITIONS_FILE))
        .await
        .context("Failed to open feed definitions")?;
    let sent_store = FileSentStore::new(config.state_dir.join(SENT_FILE))
        .await
        .context("Failed to open sent-article ledger")?;

    let source = HttpFeedSource::new(relay_config.source.clone())?;
    let transport = if config.dry_run() {
        warn!("Dry-run mode: webhook payloads are logged, not posted");
        DiscordWebhook::new_dry_run()?
    } else {
        DiscordWebhook::new_live()?
    };

    let (registry, mut events) = MonitorRegistry::new(
        Arc::new(source),
        Arc::new(transport),
        Arc::new(sent_store),
        Arc::new(definitions),
        relay_config,
    )?;

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let report = registry.restore_feeds().await?;
    if report.skipped > 0 {
        warn!(
            "{} persisted feed(s) could not be restored, see above",
            report.skipped
        );
    }

    for (entity_id, webhook_url) in &config.feeds {
        match registry.create_feed(entity_id, webhook_url).await {
            Ok(outcome) => info!("Startup feed {}: {:?}", entity_id, outcome),
            Err(e) => error!("Failed to create startup feed {}: {}", entity_id, e),
        }
    }

    info!("Daemon initialized, monitoring {} feed(s)", registry.list_feeds().len());

    let shutdown_signal = wait_for_shutdown().await;

    match &shutdown_signal {
        Ok(signal) => info!("Received shutdown signal: {}", signal),
        Err(e) => error!("Shutdown signal error: {}", e),
    }

    info!("Shutting down daemon");
    let shutdown_result = registry.shutdown().await;

    // An abandoned worker may still hold a sender
    event_task.abort();

    shutdown_result?;
    shutdown_signal.map(|_| ())
}

fn log_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::PollSucceeded {
            entity_id,
            new_items,
        } if *new_items > 0 => {
            info!("Feed {}: {} new article(s)", entity_id, new_items);
        }
        other => debug!("Monitor event: {:?}", other),
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(feeds: &str) -> Config {
        Config {
            state_dir: PathBuf::from("/tmp/newsrelay"),
            feed_url_template: None,
            poll_interval_secs: None,
            max_retry_delay_secs: None,
            delivery_attempts: None,
            stop_timeout_secs: None,
            feeds: parse_feeds(feeds).unwrap(),
            mode: "live".to_string(),
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_parse_feeds() {
        let feeds = parse_feeds(" 440=https://hooks.example/a , 570=https://hooks.example/b?x=1,").unwrap();
        assert_eq!(
            feeds,
            vec![
                ("440".to_string(), "https://hooks.example/a".to_string()),
                ("570".to_string(), "https://hooks.example/b?x=1".to_string()),
            ]
        );

        assert!(parse_feeds("").unwrap().is_empty());
        assert!(parse_feeds("440").is_err());
        assert!(parse_feeds("=https://hooks.example/a").is_err());
    }

    #[test]
    fn test_validate_defaults() {
        let config = config_with("440=https://hooks.example/a");
        assert!(config.validate().is_ok());
        assert!(!config.dry_run());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = config_with("");
        config.delivery_attempts = Some(0);
        assert!(config.validate().is_err());

        let mut config = config_with("");
        config.mode = "maybe".to_string();
        assert!(config.validate().is_err());

        let mut config = config_with("");
        config.feed_url_template = Some("https://example.com/feed".to_string());
        assert!(config.validate().is_err(), "template needs a placeholder");
    }

    #[test]
    fn test_relay_config_overrides() {
        let mut config = config_with("");
        config.poll_interval_secs = Some(120);
        config.delivery_attempts = Some(5);
        config.mode = "dry-run".to_string();

        let relay = config.relay_config();
        assert_eq!(relay.poll.poll_interval_secs, 120);
        assert_eq!(relay.delivery.max_attempts, 5);
        assert_eq!(relay.poll.initial_retry_delay_secs, 60);
        assert!(config.dry_run());
    }
}
