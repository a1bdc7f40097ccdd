//! Drydock CLI tool.

use anyhow::Context;
use clap::{Parser, Subcommand};
use drydock_config::{CI_CONFIG_FILE, ExecutorKind, SystemConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(about = "Drydock CI CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Server configuration file (KDL)
    #[arg(long, env = "DRYDOCK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory job results are read from and written under
    #[arg(long, env = "DRYDOCK_RESULTS_ROOT", global = true)]
    results_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a CI file and show the builds it produces
    Validate {
        /// Path to the CI file
        #[arg(default_value = CI_CONFIG_FILE)]
        path: PathBuf,
    },
    /// Run one job in-process, without the server
    Run {
        /// Repository, e.g. acme/widgets
        repo: String,
        /// Clone URL
        url: String,
        /// Branch or ref to build
        #[arg(long, default_value = "master")]
        branch: String,
        /// Container backend: docker-cli or docker-api
        #[arg(long)]
        executor: Option<ExecutorKind>,
    },
    /// Print the persisted output of a job
    Show {
        /// Job key, e.g. acme/widgets/3
        job: String,
        /// Only this image's output
        #[arg(long)]
        image: Option<String>,
        /// Print the raw JSON record
        #[arg(long)]
        json: bool,
    },
    /// Print the next build number of a repository
    Next {
        /// Repository, e.g. acme/widgets
        repo: String,
    },
}

impl Cli {
    fn system_config(&self) -> anyhow::Result<SystemConfig> {
        let mut config = match &self.config {
            Some(path) => SystemConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => SystemConfig::default(),
        };
        if let Some(root) = &self.results_root {
            config.results_root = root.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,drydock::build_output=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = cli.system_config()?;

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Run {
            repo,
            url,
            branch,
            executor,
        } => {
            if let Some(executor) = executor {
                config.executor = executor;
            }
            commands::run::run_job(&config, &repo, &url, &branch).await?;
        }
        Commands::Show { job, image, json } => {
            commands::show(&config, &job, image.as_deref(), json).await?;
        }
        Commands::Next { repo } => {
            commands::next(&config, &repo).await?;
        }
    }

    Ok(())
}
