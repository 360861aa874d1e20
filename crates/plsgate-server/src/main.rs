//! plsgate server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use plsgate::db::oracle::{self, OracleConnector};
use plsgate::{GatewayConfig, GatewayService, VersionInfo};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "plsgate")]
#[command(about = "HTTP gateway for PL/SQL web procedures", version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PLSGATE_CONFIG", default_value = "/etc/plsgate/plsgate.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("PLSGATE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("plsgate={base_level},plsgate_server={base_level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("invalid configuration in {}", args.config.display()))?;
    if args.check_config {
        info!(path = %args.config.display(), "Configuration is valid");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads.max(1))
        .thread_name("plsgate-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let db = &config.database;
    info!(
        host = %db.host,
        port = db.port,
        sid = %db.sid,
        username = %db.username,
        "Connecting to database"
    );
    let connector = Arc::new(OracleConnector::new(
        &db.host,
        db.port,
        &db.sid,
        &db.username,
        db.password(),
    ));

    let mut version = VersionInfo::new();
    if let Some(client) = oracle::client_version() {
        version = version.with_oracle_client(client);
    }

    let service = Arc::new(
        GatewayService::start(&config, connector)
            .context("failed to start session pool")?
            .with_version(version),
    );
    plsgate::transport::serve(&config.server, service).await
}
