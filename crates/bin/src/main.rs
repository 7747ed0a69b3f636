use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, SeedableRng};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scene_core::{
    backend::CpuBackend,
    data::{ClassBlobs, DataLoader, InMemoryLoader, MnistDataset, Split},
    nn::{Classifier, ConvClassifier, ConvClassifierConfig, CrossEntropyLoss, DenseClassifier, Sgd, REFERENCE_FC_IN},
    train::{evaluate_epoch, train_epoch},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fully-connected classifier on single-channel images
    Dense {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value_t = 28)]
        height: usize,
        #[arg(long, default_value_t = 28)]
        width: usize,
        /// Directory holding the four MNIST IDX files; synthetic data otherwise
        #[arg(long, env = "SCENE_MNIST_DIR")]
        data_dir: Option<PathBuf>,
    },
    /// Convolutional classifier on 3-channel images
    Conv {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value_t = 32)]
        height: usize,
        #[arg(long, default_value_t = 32)]
        width: usize,
        /// Size the first dense layer from the input shape instead of the fixed width
        #[arg(long)]
        flexible_width: bool,
        #[arg(long, default_value_t = 0.2)]
        dropout: f32,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, default_value_t = 3)]
    epochs: usize,
    #[arg(long, default_value_t = 64)]
    batch: usize,
    #[arg(long, default_value_t = 0.01)]
    lr: f32,
    /// Pass 0 for plain SGD
    #[arg(long, default_value_t = 0.9)]
    momentum: f32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 10)]
    classes: usize,
    #[arg(long, default_value_t = 2048)]
    train_samples: usize,
    #[arg(long, default_value_t = 512)]
    test_samples: usize,
    /// Spread of synthetic samples around their class prototype
    #[arg(long, default_value_t = 0.3)]
    noise: f32,
}

impl RunArgs {
    fn momentum(&self) -> Option<f32> {
        (self.momentum > 0.0).then_some(self.momentum)
    }

    fn synthetic(
        &self,
        rng: &mut StdRng,
        sample_shape: &[usize],
    ) -> Result<(InMemoryLoader<CpuBackend>, InMemoryLoader<CpuBackend>)> {
        let blobs = ClassBlobs::new(rng, self.classes, sample_shape, self.noise)?;
        let train = blobs.loader(CpuBackend, rng, self.train_samples, self.batch)?;
        let test = blobs.loader(CpuBackend, rng, self.test_samples, self.batch)?;
        Ok((train, test))
    }
}

/// Alternates one training and one evaluation epoch and returns the best
/// test accuracy seen.
fn fit<M: Classifier<CpuBackend>>(
    model: &mut M,
    train: &mut InMemoryLoader<CpuBackend>,
    test: &InMemoryLoader<CpuBackend>,
    run: &RunArgs,
    rng: &mut StdRng,
) -> Result<f32> {
    let mut optimizer = Sgd::new(CpuBackend, model, run.lr, run.momentum())?;
    let loss_fn = CrossEntropyLoss::new(CpuBackend);
    info!(
        params = model.num_params(),
        train_samples = train.num_samples(),
        test_samples = test.num_samples(),
        epochs = run.epochs,
        "starting training"
    );

    let mut best_accuracy = 0.0f32;
    for epoch in 0..run.epochs {
        train.shuffle(rng);
        train_epoch(model, &*train, &mut optimizer, &loss_fn, epoch)
            .with_context(|| format!("training epoch {} failed", epoch + 1))?;
        let accuracy = evaluate_epoch(model, test, epoch)
            .with_context(|| format!("evaluation after epoch {} failed", epoch + 1))?;
        if accuracy > best_accuracy {
            best_accuracy = accuracy;
            info!("New best accuracy: {:.2}%", best_accuracy * 100.0);
        }
    }
    Ok(best_accuracy)
}

fn run_dense(run: &RunArgs, height: usize, width: usize, data_dir: Option<PathBuf>) -> Result<f32> {
    let mut rng = StdRng::seed_from_u64(run.seed);
    let (mut train, test, input_shape, classes) = match data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "loading MNIST");
            let train_set = MnistDataset::load(&dir, Split::Train)?;
            let test_set = MnistDataset::load(&dir, Split::Test)?;
            let input_shape = train_set.image_size;
            let train = train_set.into_loader(CpuBackend, run.batch)?;
            let test = test_set.into_loader(CpuBackend, run.batch)?;
            (train, test, input_shape, 10)
        }
        None => {
            let (train, test) = run.synthetic(&mut rng, &[height, width])?;
            (train, test, (height, width), run.classes)
        }
    };

    let mut model = DenseClassifier::new(CpuBackend, input_shape, classes, &mut rng)?;
    fit(&mut model, &mut train, &test, run, &mut rng)
}

fn run_conv(run: &RunArgs, height: usize, width: usize, flexible_width: bool, dropout: f32) -> Result<f32> {
    let mut rng = StdRng::seed_from_u64(run.seed);
    let config = ConvClassifierConfig {
        input_shape: (height, width),
        num_classes: run.classes,
        fc_in_features: (!flexible_width).then_some(REFERENCE_FC_IN),
        dropout,
    };
    let mut model = ConvClassifier::from_config(CpuBackend, config, &mut rng)?;
    let (mut train, test) = run.synthetic(&mut rng, &[3, height, width])?;
    fit(&mut model, &mut train, &test, run, &mut rng)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let best = match args.command {
        Commands::Dense {
            run,
            height,
            width,
            data_dir,
        } => run_dense(&run, height, width, data_dir)?,
        Commands::Conv {
            run,
            height,
            width,
            flexible_width,
            dropout,
        } => run_conv(&run, height, width, flexible_width, dropout)?,
    };
    info!("Best test accuracy: {:.2}%", best * 100.0);
    Ok(())
}
