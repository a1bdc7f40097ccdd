//! Drydock CI server

use anyhow::Context;
use clap::Parser;
use drydock_api::services::GitHubStatusClient;
use drydock_api::{AppState, routes};
use drydock_config::{ExecutorKind, SystemConfig};
use drydock_scheduler::{GitService, Services, build_executor};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drydock-server")]
#[command(about = "Drydock CI server", long_about = None)]
#[command(version)]
struct Args {
    /// Server configuration file (KDL)
    #[arg(long, env = "DRYDOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, env = "DRYDOCK_PORT")]
    port: Option<u16>,

    /// Directory job results are written under
    #[arg(long, env = "DRYDOCK_RESULTS_ROOT")]
    results_root: Option<PathBuf>,

    /// Container backend: docker-cli or docker-api
    #[arg(long)]
    executor: Option<ExecutorKind>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let token = std::env::var("GITHUB_API_TOKEN").context("GITHUB_API_TOKEN not set")?;

    let mut config = match &args.config {
        Some(path) => SystemConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => SystemConfig::default(),
    };
    if let Some(port) = args.port {
        config.listen.set_port(port);
    }
    if let Some(root) = args.results_root {
        config.results_root = root;
    }
    if let Some(executor) = args.executor {
        config.executor = executor;
    }

    let executor = build_executor(config.executor).context("Failed to set up container executor")?;
    let services = Services::start(&config, executor, Arc::new(GitService::new()));
    let status = Arc::new(GitHubStatusClient::new(
        token,
        &config.public_url,
        config.status_context.clone(),
    ));

    let app = routes::router(AppState::new(services, status)).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", config.listen);
    let listener = TcpListener::bind(config.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
