use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use vgsnap_core::{Config, VgsnapError};

mod commands;
mod signal;

/// All environments finished `Done`.
const EXIT_OK: u8 = 0;
/// At least one environment failed.
const EXIT_FAILED: u8 = 1;
/// Configuration could not be loaded or validated.
const EXIT_CONFIG: u8 = 2;
/// A thaw was escalated: a source database may still be frozen.
const EXIT_THAW_ESCALATED: u8 = 3;

#[derive(Parser)]
#[command(name = "vgsnap")]
#[command(about = "Application-consistent volume-group clone orchestration", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $VGSNAP_CONFIG, then the config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reclaim, freeze, clone, thaw and mount for one or more environments
    Run {
        /// Environment to run (repeatable; defaults to all)
        #[arg(short, long = "env")]
        envs: Vec<String>,
    },

    /// List an environment's clones
    List {
        /// Environment name
        #[arg(short, long)]
        env: String,
    },

    /// Show which clones the next run would evict
    Plan {
        /// Environment name
        #[arg(short, long)]
        env: String,
    },

    /// Load and validate the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            let config_error = matches!(
                e.downcast_ref::<VgsnapError>(),
                Some(VgsnapError::InvalidConfig { .. })
            );
            ExitCode::from(if config_error { EXIT_CONFIG } else { EXIT_FAILED })
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<u8> {
    let path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&path)?;

    if let Commands::CheckConfig = cli.command {
        commands::check_config(&config, &path);
        return Ok(EXIT_OK);
    }

    let telemetry =
        vgsnap_core::init_observability(&config.log_level, config.metrics_textfile.as_deref())?;
    tracing::debug!(config = %path.display(), "Configuration loaded");

    let code = match cli.command {
        Commands::Run { envs } => commands::run(&config, &envs).await?,
        Commands::List { env } => {
            commands::list(&config, &env).await?;
            EXIT_OK
        }
        Commands::Plan { env } => {
            commands::plan(&config, &env).await?;
            EXIT_OK
        }
        Commands::CheckConfig => EXIT_OK,
    };

    if let Err(e) = telemetry.flush() {
        tracing::warn!(error = %e, "Failed to write metrics textfile");
    }
    Ok(code)
}
