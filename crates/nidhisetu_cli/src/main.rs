use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use nidhisetu_control_plane::{build_router, AppState};
use nidhisetu_remote::{
    HttpSubmissionService, InMemorySubmissionService, RemoteConfig, SubmissionService,
};
use nidhisetu_storage::{SqlitePersistence, StorageConfig};
use nidhisetu_sync::{spawn_probe_loop, HttpConnectivityProbe, NetworkObserver};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "NIDHISETU offline evidence queue daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve {
        #[arg(long, default_value = "config/node.toml")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RuntimeConfig {
    http: HttpSection,
    storage: StorageSection,
    #[serde(default)]
    remote: Option<RemoteConfig>,
    #[serde(default)]
    network: NetworkSection,
    #[serde(default)]
    sync: SyncSection,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpSection {
    bind: String,
    auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StorageSection {
    sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct NetworkSection {
    #[serde(default)]
    initially_online: bool,
    probe_url: Option<String>,
    #[serde(default = "default_probe_interval_secs")]
    probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    probe_timeout_secs: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            initially_online: false,
            probe_url: None,
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

fn default_probe_interval_secs() -> u64 {
    15
}

fn default_probe_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
struct SyncSection {
    #[serde(default = "default_auto_sync")]
    auto_sync_on_reconnect: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            auto_sync_on_reconnect: default_auto_sync(),
        }
    }
}

fn default_auto_sync() -> bool {
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => serve(config).await,
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config_source = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file {}", config_path.display()))?;
    let config: RuntimeConfig = toml::from_str(&config_source)
        .with_context(|| format!("invalid config TOML at {}", config_path.display()))?;

    if !config.storage.sqlite_path.starts_with("sqlite:") {
        if let Some(parent) = std::path::Path::new(&config.storage.sqlite_path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let persistence = SqlitePersistence::connect(&StorageConfig {
        sqlite_path: config.storage.sqlite_path.clone(),
    })
    .await?;

    let require_bearer = requires_token(&config.http.bind);
    if require_bearer && config.http.auth_token.is_none() {
        return Err(anyhow!(
            "non-loopback bind {} requires http.auth_token",
            config.http.bind
        ));
    }

    if !require_bearer {
        info!("loopback bind detected: bearer auth optional");
    } else {
        warn!("non-loopback bind detected: bearer auth enforced");
    }

    let service: Arc<dyn SubmissionService> = match &config.remote {
        Some(remote) => {
            info!(base_url = %remote.base_url, "using HTTP submission service");
            Arc::new(
                HttpSubmissionService::new(remote)
                    .context("failed to build submission service client")?,
            )
        }
        None => {
            warn!("no [remote] section: submissions are accepted in-process only");
            Arc::new(InMemorySubmissionService::new())
        }
    };

    let network = NetworkObserver::new(config.network.initially_online);
    if let Some(probe_url) = &config.network.probe_url {
        let probe = HttpConnectivityProbe::new(
            probe_url.clone(),
            Duration::from_secs(config.network.probe_timeout_secs),
        )
        .context("failed to build connectivity probe")?;
        spawn_probe_loop(
            network.clone(),
            Arc::new(probe),
            Duration::from_secs(config.network.probe_interval_secs.max(1)),
        );
        info!(probe_url = %probe_url, "connectivity probe running");
    }

    let state = AppState::new(
        Arc::new(persistence),
        service,
        network,
        config.http.auth_token.clone(),
        require_bearer,
        config.sync.auto_sync_on_reconnect,
    );
    let app = build_router(state);

    let socket: SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid socket address {}", config.http.bind))?;

    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .with_context(|| format!("failed to bind {}", config.http.bind))?;

    info!(bind = %config.http.bind, "nidhisetud control-plane listening");
    axum::serve(listener, app).await.context("axum server failed")
}

fn requires_token(bind: &str) -> bool {
    match bind.parse::<SocketAddr>() {
        Ok(addr) => !addr.ip().is_loopback(),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_binds_do_not_require_token() {
        assert!(!requires_token("127.0.0.1:8787"));
        assert!(requires_token("0.0.0.0:8787"));
        assert!(requires_token("not-an-address"));
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [http]
            bind = "127.0.0.1:8787"

            [storage]
            sqlite_path = "data/drafts.db"
            "#,
        )
        .expect("parse");

        assert!(config.remote.is_none());
        assert!(!config.network.initially_online);
        assert_eq!(config.network.probe_interval_secs, 15);
        assert!(config.sync.auto_sync_on_reconnect);
    }

    #[test]
    fn shipped_config_parses() {
        let source = include_str!("../../../config/node.toml");
        let config: RuntimeConfig = toml::from_str(source).expect("parse shipped config");
        assert_eq!(
            config.remote.as_ref().map(|r| r.timeout_secs),
            Some(30)
        );
    }
}
