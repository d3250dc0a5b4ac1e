use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use synth_modeler::fixtures::read_wav;
use synth_modeler::pipeline::EvaluationMetrics;
use synth_modeler::training::{Trainer, WavDirectoryDataset};
use synth_modeler::{init_logging, AppConfig, FeatureExtractor, InferencePipeline};

#[derive(Parser, Debug)]
#[command(
    name = "synth_modeler_cli",
    about = "Infer wavetable synth presets from recorded audio"
)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Infer a preset from a WAV file
    Infer {
        #[arg(long)]
        input: PathBuf,
        /// Directory the preset is written to
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        /// Checkpoint manifest; an untrained model is used when omitted
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Skip the reconstruction metrics
        #[arg(long)]
        no_eval: bool,
    },
    /// Train on a directory of WAV clips
    Train {
        #[arg(long)]
        data: PathBuf,
        /// Continue from this checkpoint manifest
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Override the configured epoch count
        #[arg(long)]
        epochs: Option<usize>,
        /// Override the configured checkpoint directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
    /// Print the feature sequence of a WAV file as JSON
    Features {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON
    DumpConfig,
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Infer {
            input,
            output_dir,
            checkpoint,
            no_eval,
        } => run_infer(config, &input, &output_dir, checkpoint.as_deref(), !no_eval),
        Commands::Train {
            data,
            resume,
            epochs,
            checkpoint_dir,
        } => run_train(config, &data, resume.as_deref(), epochs, checkpoint_dir),
        Commands::Features { input, output } => run_features(&config, &input, output),
        Commands::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::from(0))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::try_load_from_file(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

fn run_infer(
    config: AppConfig,
    input: &Path,
    output_dir: &Path,
    checkpoint: Option<&Path>,
    enable_eval: bool,
) -> Result<ExitCode> {
    let pipeline = match checkpoint {
        Some(manifest) => InferencePipeline::from_checkpoint(config, manifest)
            .with_context(|| format!("loading checkpoint {}", manifest.display()))?,
        None => InferencePipeline::with_initial_weights(config),
    };

    let (preset, metrics) = pipeline
        .infer_file(input, output_dir, enable_eval)
        .with_context(|| format!("inferring preset for {}", input.display()))?;

    let report = InferReportPayload {
        input: input.display().to_string(),
        preset: preset.display().to_string(),
        metrics,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(0))
}

fn run_train(
    mut config: AppConfig,
    data: &Path,
    resume: Option<&Path>,
    epochs: Option<usize>,
    checkpoint_dir: Option<PathBuf>,
) -> Result<ExitCode> {
    if let Some(epochs) = epochs {
        config.train.epochs = epochs;
    }
    if let Some(dir) = checkpoint_dir {
        config.train.checkpoint_dir = dir;
    }

    let dataset = WavDirectoryDataset::open(data, &config)
        .with_context(|| format!("opening dataset {}", data.display()))?;
    let summary = Trainer::new(config)?
        .train(&dataset, resume)
        .context("training")?;

    let epochs: Vec<EpochPayload> = summary
        .epochs
        .iter()
        .map(|report| EpochPayload {
            epoch: report.epoch,
            train_loss: report.train_loss,
            test_loss: report.test_loss,
            skipped_batches: report.skipped_batches,
            checkpoint: report.checkpoint.display().to_string(),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&epochs)?);
    Ok(ExitCode::from(0))
}

fn run_features(config: &AppConfig, input: &Path, output: Option<PathBuf>) -> Result<ExitCode> {
    let waveform = read_wav(input).with_context(|| format!("reading {}", input.display()))?;
    let features = FeatureExtractor::new(config)
        .extract(&waveform)
        .with_context(|| format!("extracting features from {}", input.display()))?;
    let json = serde_json::to_string_pretty(&features)?;

    if let Some(path) = output {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }
    Ok(ExitCode::from(0))
}

#[derive(Serialize)]
struct InferReportPayload {
    input: String,
    preset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<EvaluationMetrics>,
}

#[derive(Serialize)]
struct EpochPayload {
    epoch: usize,
    train_loss: Option<f32>,
    test_loss: Option<f32>,
    skipped_batches: usize,
    checkpoint: String,
}
