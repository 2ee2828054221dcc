use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::warn;

use bluegreen_cluster::Access;
use bluegreen_core::config::Backend;
use bluegreen_core::{BgConfig, Environment};
use bluegreen_switch::Switcher;

mod commands;

#[derive(Parser)]
#[command(
    name = "bgctl",
    about = "Blue/green releases on Kubernetes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./bluegreen.toml when present)
    #[arg(short, long, global = true, env = "BLUEGREEN_CONFIG")]
    config: Option<PathBuf>,

    /// Override [cluster].backend
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,

    /// Override [app].namespace
    #[arg(short, long, global = true, env = "BLUEGREEN_NAMESPACE")]
    namespace: Option<String>,

    /// Override [cluster].context
    #[arg(long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Kubectl,
    Local,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Kubectl => Backend::Kubectl,
            BackendArg::Local => Backend::Local,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an image tag to an environment and wait for the rollout
    Deploy {
        env: Environment,
        tag: String,
        /// Rollout timeout in seconds (default: [deploy].rollout_timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Point the main service at an environment
    Switch {
        env: Environment,
        /// Switch even if the environment has no ready replicas
        #[arg(long)]
        force: bool,
    },
    /// Run the health gate against an environment
    Test { env: Environment },
    /// Show the active environment and both deployments
    Status {
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Switch back to the inactive environment if it is healthy
    Rollback,
    /// Set an environment's replica count
    Scale { env: Environment, replicas: u32 },
    /// Deploy to the inactive environment, test, switch, and scale down the old one
    Release { tag: String },
    /// Apply namespace, services and autoscalers
    Bootstrap,
    /// Print rendered manifests as JSON
    Manifests {
        /// Render only this environment's deployment
        env: Option<Environment>,
        /// Image tag rendered into deployments
        #[arg(long, default_value = "latest")]
        tag: String,
    },
}

impl Commands {
    /// Permissions checked by preflight before the command runs.
    fn access(&self) -> Access {
        match self {
            Commands::Test { .. } | Commands::Status { .. } | Commands::Manifests { .. } => {
                Access::Read
            }
            Commands::Deploy { .. } | Commands::Scale { .. } => Access::Deployments,
            Commands::Switch { .. } | Commands::Rollback => Access::Selector,
            Commands::Release { .. } | Commands::Bootstrap => Access::Full,
        }
    }
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<BgConfig> {
        let mut config = BgConfig::load(self.config.as_deref()).context("loading configuration")?;
        if let Some(backend) = self.backend {
            config.cluster.backend = backend.into();
        }
        if let Some(namespace) = &self.namespace {
            config.app.namespace = namespace.clone();
        }
        if let Some(context) = &self.context {
            config.cluster.context = Some(context.clone());
        }
        if let Commands::Deploy {
            timeout: Some(secs),
            ..
        } = &self.command
        {
            config.deploy.rollout_timeout_secs = *secs;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `--format json` output stays parseable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "warn,bgctl=info,bluegreen_switch=info,bluegreen_cluster=info,bluegreen_health=info",
                )
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    // Manifests are rendered offline.
    if let Commands::Manifests { env, tag } = &cli.command {
        return commands::manifests::print(&config, *env, tag);
    }

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            let _ = cancel_tx.send(true);
        }
    });

    let cluster = bluegreen_cluster::connect(&config, Some(cancel_rx.clone()))?;
    let switcher = Switcher::new(cluster, config);

    tokio::select! {
        result = run(&switcher, cli.command) => result,
        Ok(_) = cancel_rx.wait_for(|cancelled| *cancelled) => {
            anyhow::bail!("interrupted")
        }
    }
}

async fn run(switcher: &Switcher, command: Commands) -> anyhow::Result<()> {
    switcher.preflight(command.access()).await?;

    match command {
        Commands::Deploy { env, tag, .. } => commands::ops::deploy(switcher, env, &tag).await,
        Commands::Switch { env, force } => commands::ops::switch(switcher, env, force).await,
        Commands::Test { env } => commands::ops::test(switcher, env).await,
        Commands::Status { format } => commands::status::status(switcher, format).await,
        Commands::Rollback => commands::ops::rollback(switcher).await,
        Commands::Scale { env, replicas } => commands::ops::scale(switcher, env, replicas).await,
        Commands::Release { tag } => commands::ops::release(switcher, &tag).await,
        Commands::Bootstrap => commands::ops::bootstrap(switcher).await,
        Commands::Manifests { env, tag } => {
            commands::manifests::print(switcher.config(), env, &tag)
        }
    }
}
