use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use callscribe_core::config::{Config, LoggingConfig};

#[derive(Parser)]
#[command(
    name = "callscribe",
    about = "Live call transcription: Twilio media streams relayed to Deepgram",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value by dotted path
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let mut config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    // Deepgram is reached over wss; pick the TLS backend once per process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    match cli.command {
        Commands::Serve { port, bind } => {
            if let Some(bind) = bind {
                config.gateway.get_or_insert_with(Default::default).bind = Some(bind);
            }
            let port = port.unwrap_or_else(|| config.gateway_port());

            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("Config: {warning}");
            }
            if !errors.is_empty() {
                for error in &errors {
                    tracing::error!("Config: {error}");
                }
                anyhow::bail!("invalid configuration in {}", config_path.display());
            }

            tracing::info!(config = %config_path.display(), "Starting callscribe gateway on port {port}");
            let state = Arc::new(callscribe_gateway::GatewayState::new(config));
            callscribe_gateway::start_gateway(state, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s)", errors.len());
                }
                println!("Config OK ({})", config_path.display());
            }
        },
    }

    Ok(())
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let filter = build_filter(logging, verbose);
    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (json, stdout) {
        (true, true) => fmt::layer().json().with_writer(std::io::stdout).boxed(),
        (true, false) => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        (false, true) => fmt::layer().with_writer(std::io::stdout).boxed(),
        (false, false) => fmt::layer().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
}

/// `RUST_LOG` wins; otherwise the configured level (or debug with
/// `--verbose`, else info) plus any per-crate filters.
fn build_filter(logging: Option<&LoggingConfig>, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    directive_filter(logging, verbose)
}

fn directive_filter(logging: Option<&LoggingConfig>, verbose: bool) -> EnvFilter {
    let level = logging
        .and_then(|l| l.level.clone())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string());

    let mut directives = vec![level];
    if let Some(logging) = logging {
        directives.extend(logging.filters.iter().cloned());
    }
    EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new("info"))
}
