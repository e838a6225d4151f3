mod broker;
mod error;
mod http;
mod metadata;
mod player;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tune_proto::catalog::load_catalog;
use tune_proto::config::{Config, LogConfig};

use crate::broker::Broker;
use crate::http::AppState;
use crate::player::{Player, PlayerCommand};

#[derive(Parser, Debug)]
#[command(name = "tune", version, about = "Personal internet-radio controller")]
struct Cli {
    /// Config file (default: ~/.config/tune/config.toml)
    #[arg(long, env = "TUNE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, host:port
    #[arg(long, env = "TUNE_ADDR")]
    addr: Option<String>,

    /// Listen key appended to playlist URLs
    #[arg(long, env = "TUNE_LISTEN_KEY", hide_env_values = true)]
    listen_key: Option<String>,

    /// Directory with the web UI
    #[arg(long, env = "TUNE_PUBLIC_DIR")]
    public_dir: Option<PathBuf>,

    /// Channel catalog: local TOML path or http(s) URL
    #[arg(long, env = "TUNE_CATALOG")]
    catalog: Option<String>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(config: &LogConfig, log_file: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    let log_path = log_file
        .map(Path::to_path_buf)
        .or_else(|| config.to_file.then(|| config.file.clone()));

    let file_layer = match &log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.filter)),
        )
        .init();

    Ok(log_path)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Interrupt signal received"),
        () = terminate => info!("Terminate signal received"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)
        .with_context(|| format!("failed to load config {:?}", config_path))?;

    if let Some(log_path) = init_logging(&config.log, cli.log_file.as_deref())? {
        info!("Log file: {:?}", log_path);
    }
    info!("Config loaded from: {:?}", config_path);

    let catalog_source = cli
        .catalog
        .clone()
        .unwrap_or_else(|| config.catalog.source.clone());
    let catalog = Arc::new(load_catalog(&catalog_source).await?);

    let mut player_config = config.player.clone();
    if let Some(key) = cli.listen_key {
        player_config.listen_key = key;
    }
    if player_config.listen_key.is_empty() {
        warn!("No listen key configured; playlist URLs are used as-is");
    }
    let command = PlayerCommand::from_config(&player_config);
    info!("Player: {:?} {:?}", command.binary, command.args);

    let (player, feed) = Player::new(catalog.clone(), command);
    let player = Arc::new(player);
    let (broker, broker_task) = Broker::spawn(feed);

    let public_dir = cli
        .public_dir
        .unwrap_or_else(|| config.http.public_dir.clone());
    if !public_dir.is_dir() {
        warn!("Public directory {:?} does not exist; only the API is served", public_dir);
    }
    let addr = cli.addr.unwrap_or_else(|| config.http_address());

    let app = http::router(
        AppState {
            player: player.clone(),
            broker: broker.clone(),
            catalog,
        },
        &public_dir,
    );

    let closing = broker.clone();
    let served = http::serve(&addr, app, async move {
        shutdown_signal().await;
        let streams = closing.subscriber_count().await.unwrap_or(0);
        info!("Shutting down, closing {} event streams", streams);
        closing.close().await;
    })
    .await;

    if let Some(np) = player.now_playing().await {
        info!(
            "Stopping {}/{} '{}' (pid {:?})",
            np.station, np.channel_id, np.channel, np.pid
        );
    }
    player.shutdown().await;
    broker.close().await;
    if tokio::time::timeout(Duration::from_secs(3), broker_task)
        .await
        .is_err()
    {
        warn!("Broker did not stop in time");
    }

    served?;
    info!("Bye");
    Ok(())
}
