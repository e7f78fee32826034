//! CLI entry point for authorid.
//!
//! Subcommands:
//!   train     -- Train a classifier on the most active authors and persist it
//!   predict   -- Rank the authors of a stored model for one message
//!   fmeasure  -- Score a stored model on its held-out rows
//!   kfold     -- Sliding k-fold evaluation with one stored model per fold
//!   list      -- List stored models

use anyhow::bail;
use authorid_core::{AuthorIdConfig, AuthorIdError, LoggingConfig, RunId};
use authorid_storage::{FsArtifactStore, JsonCorpus};
use authorid_training::config::resolve_config;
use authorid_training::{JsonlProgress, Orchestrator, ProgressFanOut, TracingProgress};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "authorid", about = "Chat message author attribution")]
struct Cli {
    /// YAML config file (falls back to AUTHORID_CONFIG, then defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON or JSON-lines message export.
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Directory holding stored models.
    #[arg(long, global = true)]
    artifacts: Option<PathBuf>,

    /// Shuffling seed.
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a classifier and store it under the current unix timestamp.
    Train {
        /// Number of most active authors to classify between.
        #[arg(short, long)]
        amount: Option<usize>,

        /// Share of the balanced corpus used for training.
        #[arg(short, long)]
        quotient: Option<f64>,
    },

    /// Print author probabilities for a message, most likely first.
    Predict {
        /// Stored model identifier.
        model_id: String,

        /// Message to attribute.
        message: String,
    },

    /// Per-author F1 of a stored model on its held-out rows.
    Fmeasure {
        /// Stored model identifier.
        model_id: String,
    },

    /// Evaluate stability with sliding k-fold cross-validation.
    Kfold {
        /// Number of most active authors to classify between.
        #[arg(short, long)]
        amount: Option<usize>,

        /// Share of the balanced corpus used for training in each fold.
        #[arg(short, long)]
        quotient: Option<f64>,
    },

    /// List stored models, oldest first.
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "authorid failed");
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// 1 for an empty corpus, 2 for every other failure.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<AuthorIdError>() {
        Some(AuthorIdError::EmptyCorpus) => 1,
        _ => 2,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_flag = cli.config.clone();
    let mut config = resolve_config(cli.config.clone())?;
    apply_overrides(&mut config, &cli);
    init_logging(&config.logging)?;
    match &config_flag {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("Using configuration from environment or defaults"),
    }
    config.validate()?;

    let orchestrator = build_orchestrator(&config);
    match cli.command {
        Command::Train { .. } => {
            let report = orchestrator.train()?;
            println!(
                "{}\taccuracy={:.4}\tloss={:.4}\tepochs={}\tper_author={}",
                report.run_id, report.accuracy, report.loss, report.epochs_run, report.least_count
            );
        }
        Command::Predict { model_id, message } => {
            let run_id = RunId::parse(model_id)?;
            let prediction = orchestrator.predict(&run_id, &message)?;
            for (author, probability) in &prediction.ranking {
                println!("{author}\t{probability:.4}");
            }
        }
        Command::Fmeasure { model_id } => {
            let run_id = RunId::parse(model_id)?;
            let result = orchestrator.fmeasure(&run_id)?;
            for (author, f1) in result.authors.iter().zip(&result.report.per_class_f1) {
                println!("{author}\t{f1:.4}");
            }
            println!("mean\t{:.4}", result.report.mean_f1);
        }
        Command::Kfold { .. } => {
            let report = orchestrator.kfold()?;
            for fold in &report.folds {
                println!("{}\taccuracy={:.4}", fold.run_id, fold.accuracy);
            }
            match report.variance {
                Some(v) => println!("mean={:.4}\tvariance={v:.6}", report.mean_accuracy),
                None => println!("mean={:.4}\tvariance=n/a", report.mean_accuracy),
            }
        }
        Command::List => {
            for summary in orchestrator.list()? {
                println!(
                    "{}\t{}\tamount={}\taccuracy={:.4}",
                    summary.run_id,
                    summary.created_at.to_rfc3339(),
                    summary.amount,
                    summary.accuracy
                );
            }
        }
    }
    Ok(())
}

/// Command-line flags take precedence over file values.
fn apply_overrides(config: &mut AuthorIdConfig, cli: &Cli) {
    if let Some(path) = &cli.corpus {
        config.corpus.path = path.display().to_string();
    }
    if let Some(dir) = &cli.artifacts {
        config.storage.artifacts_dir = dir.display().to_string();
    }
    if let Some(seed) = cli.seed {
        config.training.seed = seed;
    }
    if let Command::Train { amount, quotient } | Command::Kfold { amount, quotient } = &cli.command
    {
        if let Some(amount) = amount {
            config.training.amount = *amount;
        }
        if let Some(quotient) = quotient {
            config.training.quotient = *quotient;
        }
    }
}

fn build_orchestrator(config: &AuthorIdConfig) -> Orchestrator {
    let mut progress = ProgressFanOut::new().with(TracingProgress);
    if let Some(path) = &config.storage.progress_path {
        progress = progress.with(JsonlProgress::new(path));
    }
    Orchestrator::new(
        Arc::new(JsonCorpus::new(&config.corpus.path)),
        Arc::new(FsArtifactStore::new(&config.storage.artifacts_dir)),
        Arc::new(progress),
        config.training.clone(),
        config.model.clone(),
    )
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.level))
        .map_err(|e| anyhow::anyhow!("Invalid log level {:?}: {}", logging.level, e))?;
    let result = match logging.format.as_str() {
        "text" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        other => bail!("Unknown log format {other:?}, expected \"text\" or \"json\""),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
