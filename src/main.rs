//! Galaxy shape estimation CLI
//!
//! Trains and evaluates the shape and calibration networks from config.toml.

#![recursion_limit = "256"]
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, NdArray, Wgpu};
use clap::{Parser, Subcommand};
use galshape::{Config, Result};
use std::path::PathBuf;

type CpuBackend = NdArray<f32>;
type GpuBackend = Wgpu<f32, i32>;

#[derive(Parser)]
#[command(name = "galshape")]
#[command(about = "Galaxy shape estimation with convolutional networks", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,
    /// Train the model selected by `train.task`
    Train {
        /// Override number of epochs
        #[arg(long)]
        epochs: Option<usize>,
        /// Start from this checkpoint
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Suppress per-epoch loss lines
        #[arg(long)]
        quiet: bool,
    },
    /// Run a trained checkpoint over a dataset
    Predict {
        /// Checkpoint to evaluate
        #[arg(long)]
        checkpoint: PathBuf,
        /// Dataset directory (defaults to data.path)
        #[arg(long)]
        data: Option<PathBuf>,
        /// Write the prediction report as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a loss history written during training
    History {
        /// training_loss.fits file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Init => commands::init(&cli.config),
        Commands::Train {
            epochs,
            resume,
            quiet,
        } => commands::train(config, epochs, resume, quiet),
        Commands::Predict {
            checkpoint,
            data,
            output,
        } => commands::predict(&config, checkpoint, data, output),
        Commands::History { file } => commands::history(&config, &file),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use burn::tensor::backend::{AutodiffBackend, Backend};
    use galshape::compute::{ComputeContext, DeviceSpec};
    use galshape::data::{CalibrationDataset, ShapeDataset};
    use galshape::model::load_model;
    use galshape::predict::{PredictionReport, Predictor};
    use galshape::training::calibration::{self, CalibrationTask};
    use galshape::training::shape::{self, ShapeTask};
    use galshape::training::LossHistory;
    use galshape::TaskKind;
    use serde::Serialize;
    use std::path::Path;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all(&config.data.path)?;
        std::fs::create_dir_all(&config.train.model_path)?;
        println!(
            "Created {} and {} directories",
            config.data.path, config.train.model_path
        );

        println!("\nNext steps:");
        println!("  1. Edit {} to choose the task and device", config_path);
        println!("  2. Put the simulated .npy arrays in {}", config.data.path);
        println!("  3. Run 'galshape train' to train the model");
        println!("  4. Run 'galshape predict --checkpoint <file>' to evaluate it");

        Ok(())
    }

    pub fn train(
        mut config: Config,
        epochs: Option<usize>,
        resume: Option<PathBuf>,
        quiet: bool,
    ) -> Result<()> {
        if let Some(epochs) = epochs {
            config.train.epoch_number = epochs;
        }
        if quiet {
            config.train.show_log = false;
        }
        config.train.validate()?;

        let resume = resume.as_deref();
        let spec = DeviceSpec::parse(&config.train.device)?;
        let ordinals = spec.ordinals(config.train.gpu_number)?;

        let history = match spec {
            DeviceSpec::Cpu => train_on::<Autodiff<CpuBackend>>(
                &config,
                ComputeContext::single(NdArrayDevice::Cpu),
                resume,
            )?,
            DeviceSpec::Gpu(_) => {
                let devices: Vec<WgpuDevice> =
                    ordinals.into_iter().map(WgpuDevice::DiscreteGpu).collect();
                train_on::<Autodiff<GpuBackend>>(&config, ComputeContext::new(devices)?, resume)?
            }
        };

        println!("\n{}", history);
        if let Some(best) = history.best_epoch(config.train.monitor()) {
            println!("Best epoch: {}", best + 1);
        }
        Ok(())
    }

    fn train_on<B: AutodiffBackend>(
        config: &Config,
        context: ComputeContext<B>,
        resume: Option<&Path>,
    ) -> Result<LossHistory> {
        log::info!(
            "Training {} model on {:?}",
            config.train.task,
            context.devices()
        );

        match config.train.task {
            TaskKind::Shape => {
                let dataset = ShapeDataset::from_directory(&config.data.path)?;
                log::info!("Loaded {} shape samples", dataset.len());
                let (_, history) = shape::train(config, dataset, context, resume)?;
                Ok(history)
            }
            TaskKind::Calibration => {
                let dataset = CalibrationDataset::from_directory(&config.data.path)?;
                log::info!(
                    "Loaded {} calibration cases of {} realisations",
                    dataset.num_cases(),
                    dataset.real_size()
                );
                let (_, history) = calibration::train(config, dataset, context, resume)?;
                Ok(history)
            }
        }
    }

    pub fn predict(
        config: &Config,
        checkpoint: PathBuf,
        data: Option<PathBuf>,
        output: Option<PathBuf>,
    ) -> Result<()> {
        let data = data.unwrap_or_else(|| PathBuf::from(&config.data.path));
        let spec = DeviceSpec::parse(&config.train.device)?;

        match spec {
            DeviceSpec::Cpu => predict_on::<CpuBackend>(
                config,
                ComputeContext::single(NdArrayDevice::Cpu),
                &checkpoint,
                &data,
                output.as_deref(),
            ),
            DeviceSpec::Gpu(ordinal) => predict_on::<GpuBackend>(
                config,
                ComputeContext::single(WgpuDevice::DiscreteGpu(ordinal)),
                &checkpoint,
                &data,
                output.as_deref(),
            ),
        }
    }

    fn predict_on<B: Backend>(
        config: &Config,
        context: ComputeContext<B>,
        checkpoint: &Path,
        data: &Path,
        output: Option<&Path>,
    ) -> Result<()> {
        let workers = config.train.workers;

        match config.train.task {
            TaskKind::Shape => {
                let dataset = ShapeDataset::from_directory(data)?;
                let task = ShapeTask::from_config(&config.train, &dataset)?;
                let model =
                    load_model(&shape::architecture(config), &context, Some(checkpoint), true)?;
                let predictor = Predictor::new(task, model, context.device().clone());
                let report = predictor.predict_dataset(dataset, workers)?;
                println!("Predicted {} galaxies", report.predictions.len());
                finish(&report, output)
            }
            TaskKind::Calibration => {
                let dataset = CalibrationDataset::from_directory(data)?;
                let task = CalibrationTask::from_config(&config.train, &dataset);
                let architecture = calibration::architecture(config, &dataset);
                let model = load_model(&architecture, &context, Some(checkpoint), true)?;
                let predictor = Predictor::new(task, model, context.device().clone());
                let report = predictor.predict_dataset(dataset, workers)?;
                println!("Predicted {} cases", report.predictions.len());
                finish(&report, output)
            }
        }
    }

    fn finish<P: Serialize>(report: &PredictionReport<P>, output: Option<&Path>) -> Result<()> {
        println!("Batches: {}  Loss: {:.6}", report.batches, report.loss);
        if let Some(path) = output {
            report.write_json(path)?;
            println!("Report written to {}", path.display());
        }
        Ok(())
    }

    pub fn history(config: &Config, file: &Path) -> Result<()> {
        let history = LossHistory::read_fits(file)?;
        if history.is_empty() {
            println!("No epochs recorded in {}", file.display());
            return Ok(());
        }

        print!("{}", history);
        if let Some(best) = history.best_epoch(config.train.monitor()) {
            println!("\nBest epoch ({:?}): {}", config.train.monitor(), best + 1);
        }
        Ok(())
    }
}
