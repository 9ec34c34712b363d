// Skiff controller binary
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use skiff_engine::{Controller, ControllerConfig, KubeStore, Resolver};
use skiff_functions::{register_builtins, FuncRegistry};
use std::io::stderr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Blueprint-driven ActionSet controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watches ActionSets and runs them (default action).
    Run,
    /// Lists the registered functions.
    Functions,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// YAML configuration file
    #[arg(long, global = true, env = "SKIFF_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to watch
    #[arg(long, global = true, env = "SKIFF_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds between progress polls
    #[arg(long, global = true, env = "SKIFF_PROGRESS_INTERVAL")]
    progress_interval: Option<u64>,

    /// Deadline in seconds for a whole ActionSet run
    #[arg(long, global = true, env = "SKIFF_ACTIONSET_TIMEOUT")]
    action_set_timeout: Option<u64>,
}

impl RunArgs {
    /// File settings first, then flags and environment on top
    fn load_config(&self) -> Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::load(path)
                .wrap_err_with(|| format!("loading config from {}", path.display()))?,
            None => ControllerConfig::default(),
        };
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(secs) = self.progress_interval {
            config = config.with_progress_interval(secs);
        }
        if let Some(secs) = self.action_set_timeout {
            config = config.with_action_set_timeout(secs);
        }
        config.validate()?;
        Ok(config)
    }
}

fn registry_with_builtins() -> Result<FuncRegistry> {
    let functions = FuncRegistry::new();
    register_builtins(&functions).wrap_err("registering built-in functions")?;
    Ok(functions)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.load_config()?;
    let functions = Arc::new(registry_with_builtins()?);
    info!(functions = ?functions.names(), "Registered functions");

    let client = kube::Client::try_default()
        .await
        .wrap_err("connecting to the Kubernetes API")?;
    let store = Arc::new(KubeStore::new(client));
    let controller = Arc::new(Controller::new(store, Resolver::new(functions), config));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received, shutting down..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        signal.cancel();
    });

    controller.run(shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Respect RUST_LOG, fall back to verbose/info for our crates
    let level = if cli.verbose { "debug" } else { "info" };
    let default_directives = format!(
        "skiff={level},skiff_engine={level},skiff_functions={level},kube=warn,tower=warn,hyper=warn,rustls=warn",
        level = level
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    match cli.command {
        Some(Commands::Functions) => {
            let functions = registry_with_builtins()?;
            for name in functions.names() {
                let Some(func) = functions.get(&name) else {
                    continue;
                };
                let required = func.required_args();
                if required.is_empty() {
                    println!("{:<12} {}", name, func.description());
                } else {
                    println!("{:<12} {} (requires: {})", name, func.description(), required.join(", "));
                }
            }
            Ok(())
        }
        Some(Commands::Run) | None => run(cli.run).await,
    }
}
