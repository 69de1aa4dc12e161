//! wface GAN command line
//!
//! - `train`: train a DCGAN on a face corpus (resuming from the latest checkpoint)
//! - `sample`: render one sample grid from the latest checkpoint
//! - `init`: write a default configuration file

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::Path;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use wface_gan::{
    training::{run, write_grid},
    CheckpointGateway, GridLayout, LossVariant, RunConfig, DCGAN,
};

/// DCGAN face generator
#[derive(Parser)]
#[command(name = "wface_gan")]
#[command(version = "0.1.0")]
#[command(about = "Train classic or WGAN-GP DCGANs on face images")]
struct Cli {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    Classic,
    WganGp,
}

impl From<VariantArg> for LossVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Classic => LossVariant::Classic,
            VariantArg::WganGp => LossVariant::WassersteinGp,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train the DCGAN model
    Train {
        /// Number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Loss variant
        #[arg(long, value_enum)]
        variant: Option<VariantArg>,

        /// Image corpus directory
        #[arg(short, long)]
        data_dir: Option<String>,

        /// Corpus selector (1 = hollywood, 2 = lfw)
        #[arg(long)]
        data_type: Option<i64>,

        /// Run directory for samples and checkpoints
        #[arg(short, long)]
        model_name: Option<String>,

        /// Batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(long)]
        learning_rate: Option<f64>,

        /// Device: cpu or cuda
        #[arg(long)]
        device: Option<String>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Render a sample grid from the latest checkpoint
    Sample {
        /// Output PNG path
        #[arg(short, long, default_value = "samples.png")]
        output: String,
    },

    /// Initialize default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Train {
            epochs,
            variant,
            data_dir,
            data_type,
            model_name,
            batch_size,
            learning_rate,
            device,
            seed,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(variant) = variant {
                config.model.variant = variant.into();
            }
            if let Some(data_dir) = data_dir {
                config.data.data_dir = data_dir;
            }
            if let Some(data_type) = data_type {
                config.data.data_type = data_type;
            }
            if let Some(model_name) = model_name {
                config.output.model_name = model_name;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(lr) = learning_rate {
                config.training.learning_rate = lr;
            }
            if let Some(device) = device {
                config.training.device = device;
            }
            if seed.is_some() {
                config.training.seed = seed;
            }
            train_model(&config)?;
        }
        Commands::Sample { output } => {
            let config = load_config(&cli.config)?;
            sample_grid(&config, &output)?;
        }
        Commands::Init { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

/// Load the configuration file, or fall back to the defaults when it is missing
fn load_config(path: &str) -> Result<RunConfig> {
    if Path::new(path).exists() {
        info!("Loading configuration from {}", path);
        Ok(RunConfig::load(path)?)
    } else {
        info!("No configuration at {}, using defaults", path);
        Ok(RunConfig::default())
    }
}

/// Train the model
fn train_model(config: &RunConfig) -> Result<()> {
    config.validate()?;
    info!(
        "Training {} variant on {} (run directory {})",
        config.model.variant.name(),
        config.data.data_dir,
        config.output.model_name
    );

    let metrics = run(config).map_err(|e| {
        if e.is_divergence() {
            error!("Losses became non-finite; try a lower learning rate or a different variant");
        }
        e
    })?;
    if let (Some(d), Some(g)) = (metrics.latest_d_loss(), metrics.latest_g_loss()) {
        info!("Final losses: D={:.6}, G={:.6}", d, g);
    }
    info!("Metrics written to {}", config.metrics_path().display());
    Ok(())
}

/// Render one grid with the restored generator
fn sample_grid(config: &RunConfig, output: &str) -> Result<()> {
    config.validate()?;
    let device = config.device();
    if let Some(seed) = config.training.seed {
        tch::manual_seed(seed as i64);
    }

    let mut model = DCGAN::from_config(config, device);
    let gateway = CheckpointGateway::new(config.checkpoint_path());
    if gateway.restore(&mut model)?.is_none() {
        bail!("No checkpoint found in {}", gateway.dir().display());
    }

    let grid = GridLayout::new(config.output.grid_rows, config.output.grid_cols);
    write_grid(&model, config.training.sample_size, grid, Path::new(output))?;
    info!("Saved {}x{} sample grid to {}", grid.rows, grid.cols, output);
    Ok(())
}

/// Initialize configuration file
fn init_config(output: &str) -> Result<()> {
    let config = RunConfig::default();
    config.save(output)?;
    info!("Created default configuration at {}", output);
    Ok(())
}
