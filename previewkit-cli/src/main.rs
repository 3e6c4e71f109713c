mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

/// Config file location; takes precedence over `--config`
const CONFIG_ENV: &str = "PREVIEWKIT_CONFIG";

#[derive(Parser)]
#[command(name = "previewkit")]
#[command(about = "Classify, assemble and preview generated web projects")]
#[command(version = "0.3.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print how a project directory would be previewed
    Classify {
        /// Project directory
        dir: PathBuf,

        /// Print the classification as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the mount tree built from a project directory
    Tree {
        /// Project directory
        dir: PathBuf,
    },
    /// Assemble a static project into one self-contained document
    Assemble {
        /// Project directory
        dir: PathBuf,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a data: URL instead of the document
        #[arg(long)]
        data_url: bool,
    },
    /// Inject the element-selection script into an HTML file
    Instrument {
        /// HTML file
        file: PathBuf,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Orchestrator config file (TOML); supplies the element text limit
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Build and serve a project, holding the preview until Ctrl-C
    Build {
        /// Project directory
        dir: PathBuf,

        /// Mount the project here instead of a temporary directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Orchestrator config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Also write logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Classify { dir, json } => {
            let _guard = init_tracing(false, None)?;
            commands::execute_classify(&dir, json)
        }
        Commands::Tree { dir } => {
            let _guard = init_tracing(false, None)?;
            commands::execute_tree(&dir)
        }
        Commands::Assemble {
            dir,
            output,
            data_url,
        } => {
            let _guard = init_tracing(false, None)?;
            commands::execute_assemble(&dir, output.as_deref(), data_url)
        }
        Commands::Instrument {
            file,
            output,
            config,
        } => {
            let _guard = init_tracing(false, None)?;
            let config = resolve_config_path(config);
            commands::execute_instrument(&file, output.as_deref(), config.as_deref())
        }
        Commands::Build {
            dir,
            root,
            config,
            verbose,
            log_file,
        } => {
            let _guard = init_tracing(verbose, log_file.as_deref())?;
            let config = resolve_config_path(config);
            commands::execute_build(&dir, root, config.as_deref()).await
        }
    }
}

/// `PREVIEWKIT_CONFIG` wins over the command-line flag
fn resolve_config_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or(flag)
}

/// Initialize tracing to stderr and, when asked, to a log file
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "previewkit={},previewkit_sandbox={},previewkit_common={}",
            log_level, log_level, log_level
        ))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log file path has no file name: {}", path.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .try_init()?;

    Ok(guard)
}
