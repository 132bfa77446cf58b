//! Tessera CLI — train, cross-validate, and score tabular models from CSV files.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Tessera: model lifecycle and k-fold evaluation for tabular data
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (reads `.tessera/config.toml` from here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Input file and label column.
#[derive(clap::Args, Debug)]
struct DataArgs {
    /// CSV file (or TSV, by extension)
    data: PathBuf,

    /// Label column
    #[arg(short, long)]
    target: String,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModelKind {
    /// Proportional-odds ordinal regression (classifier)
    Ordinal,
    /// Least-squares linear regression (regressor)
    Linear,
}

/// Model choice, hyperparameters, and preprocessing.
#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// Model to fit
    #[arg(short, long, value_enum, default_value = "ordinal")]
    model: ModelKind,

    /// Gradient steps (ordinal only)
    #[arg(long, default_value_t = 100)]
    iterations: usize,

    /// L2 penalty on feature weights
    #[arg(long, default_value_t = 0.0)]
    l2: f64,

    /// Initial step size (ordinal only)
    #[arg(long, default_value_t = 0.1)]
    learning_rate: f64,

    /// Min-max scale numeric columns before fitting
    #[arg(long)]
    scale: bool,

    /// One-hot encode categorical columns before fitting
    #[arg(long)]
    encode: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Estimate predictive quality with k-fold cross-validation
    Validate {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Number of folds (defaults to `validation.folds`)
        #[arg(short = 'k', long)]
        folds: Option<usize>,

        /// Shuffle records with this seed before partitioning
        #[arg(long)]
        seed: Option<u64>,

        /// Folds evaluated concurrently (defaults to `validation.parallelism`)
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fit on a CSV file and save the model under a name
    Train {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Storage name for the fitted model and its transformers
        #[arg(short, long)]
        name: String,
    },
    /// Score a CSV file with a saved model and print `id,y,y_predicted`
    Predict {
        /// CSV file to score
        data: PathBuf,

        /// Label column, if the file has one
        #[arg(short, long)]
        target: Option<String>,

        /// Storage name of the model
        #[arg(short, long)]
        name: String,
    },
    /// Print coefficient p-values of a saved linear model
    Pvalues {
        /// Storage name of the model
        name: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a saved model and its transformers
    Delete {
        /// Storage name of the model
        name: String,
    },
    /// List stored artifacts by kind
    List,
    /// Inspect or initialize configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective settings as TOML
    Show,
    /// Write default settings to `.tessera/config.toml` in the workspace
    Init,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| cli.workspace.clone());
    let settings = tessera_core::load_settings(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Human-readable stderr, plus JSON file logging when enabled
    let filter = match cli.verbose {
        0 if cli.quiet => "error".to_string(),
        0 => settings.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let (json_layer, _guard) = if settings.logging.json_file {
        let log_dir = settings
            .logging
            .log_dir
            .clone()
            .unwrap_or_else(tessera_core::config::default_log_dir);
        std::fs::create_dir_all(&log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&log_dir, "tessera.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, settings, &workspace)
}
