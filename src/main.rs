use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use rss_relay::app::Relay;
use rss_relay::config::Config;
use rss_relay::publish::HttpPublisher;
use rss_relay::reader::RssReader;
use rss_relay::storage::{DedupStore, MemoryStore, SqliteStore};

const EVICTION_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser, Debug)]
#[command(
    name = "rss-relay",
    version,
    about = "Polls an RSS feed and relays new items to a message bus"
)]
struct Args {
    /// TOML config file; flags and environment variables override it
    #[arg(long, value_name = "FILE", env = "RSS_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Feed URL
    #[arg(long, env = "RSS_URL")]
    url: Option<String>,

    /// Feed code attached to published items
    #[arg(long, env = "RSS_CODE")]
    code: Option<String>,

    /// Dedup identity of the feed (defaults to the code)
    #[arg(long, env = "RSS_NAME")]
    name: Option<String>,

    /// Seconds between polls
    #[arg(long, value_name = "SECS", env = "POLL_INTERVAL_SECS")]
    interval: Option<u64>,

    /// Deadline for one fetch, in seconds
    #[arg(long, value_name = "SECS", env = "FETCH_TIMEOUT_SECS")]
    fetch_timeout: Option<u64>,

    /// Items buffered between poller and publisher
    #[arg(long, env = "OUTPUT_CAPACITY")]
    output_capacity: Option<usize>,

    /// SQLite database for dedup records
    #[arg(long, value_name = "FILE", env = "STORE_PATH")]
    store: Option<String>,

    /// Keep dedup records in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Ingest endpoint items are POSTed to
    #[arg(long, env = "PUBLISHER_URL")]
    publisher_url: Option<String>,

    /// Bearer token for the ingest endpoint
    #[arg(long, env = "PUBLISHER_TOKEN", hide_env_values = true)]
    publisher_token: Option<String>,

    /// Mark published items as test traffic (TEST=true, any case; other values mean false)
    #[arg(long, env = "TEST", value_parser = parse_testing)]
    testing: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.url {
            config.feed_url = Some(url);
        }
        if let Some(code) = self.code {
            config.feed_code = Some(code);
        }
        if let Some(name) = self.name {
            config.feed_name = Some(name);
        }
        if let Some(secs) = self.interval {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = self.fetch_timeout {
            config.fetch_timeout_secs = secs;
        }
        if let Some(capacity) = self.output_capacity {
            config.output_capacity = capacity;
        }
        if let Some(path) = self.store {
            config.store_path = path;
        }
        if let Some(url) = self.publisher_url {
            config.publisher_url = Some(url);
        }
        if let Some(token) = self.publisher_token {
            config.publisher_token = Some(token);
        }
        if self.testing {
            config.testing = true;
        }
    }
}

/// Only a case-insensitive `true` turns test mode on; `1`, `yes` and the like do not.
fn parse_testing(raw: &str) -> Result<bool, Infallible> {
    Ok(raw.trim().eq_ignore_ascii_case("true"))
}

fn setup_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "rss_relay=info,warn",
        (false, 1) => "rss_relay=debug,info",
        (false, _) => "rss_relay=trace,debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Deployments pass settings through a .env file in the working directory.
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();
    setup_logging(args.verbose, args.quiet);
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => Config::default(),
    };
    let ephemeral = args.ephemeral;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    tracing::debug!(?config, "Effective configuration");

    let feed = config.feed_registration()?;
    let options = config.reader_options();

    let sqlite = if ephemeral {
        tracing::warn!("Dedup records kept in memory only; a restart will re-bootstrap");
        None
    } else {
        let store = SqliteStore::open(&config.store_path)
            .await
            .with_context(|| format!("Failed to open dedup store '{}'", config.store_path))?;
        Some(store)
    };
    let store: Arc<dyn DedupStore> = match &sqlite {
        Some(store) => Arc::new(store.clone()),
        None => Arc::new(MemoryStore::new()),
    };

    let publisher_url = config.publisher_url.clone().unwrap_or_default();
    let mut publisher = HttpPublisher::new(reqwest::Client::new(), publisher_url);
    if let Some(token) = config.publisher_token.clone() {
        publisher = publisher.with_token(SecretString::from(token));
    }
    publisher
        .ping()
        .await
        .with_context(|| format!("Publisher unreachable at '{}'", publisher.endpoint()))?;

    let reader = Arc::new(RssReader::new(store, options)?);
    let shutdown = CancellationToken::new();

    let signals = {
        let reader = reader.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => tracing::info!("Shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
            if let Err(e) = reader.stop().await {
                tracing::debug!(error = %e, "Reader already stopped");
            }
        })
    };

    let eviction = sqlite.clone().map(|store| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => match store.evict_expired().await {
                        Ok(0) => {}
                        Ok(evicted) => tracing::info!(evicted, "Evicted expired dedup records"),
                        Err(e) => tracing::warn!(error = %e, "Failed to evict dedup records"),
                    },
                }
            }
        })
    });

    let relay = Relay::new(reader, publisher, config.feed_code(), config.testing);
    let result = relay.run(feed, shutdown.child_token()).await;

    shutdown.cancel();
    if let Err(e) = signals.await {
        tracing::warn!(error = %e, "Signal task failed");
    }
    if let Some(eviction) = eviction {
        if let Err(e) = eviction.await {
            tracing::warn!(error = %e, "Eviction task failed");
        }
    }
    if let Some(store) = sqlite {
        store.close().await;
    }

    let stats = result?;
    tracing::info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "Shut down cleanly"
    );
    Ok(())
}
