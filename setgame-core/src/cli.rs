use crate::{
    card::Target,
    data::CardDataSet,
    device::{select_device, MyAutodiffBackend},
    evaluate::evaluate,
    export::{export, Metadata},
    model::{ModelConfig, ResNetType},
    train::{train, TrainingConfig},
};
use anyhow::Context;
use burn::{module::AutodiffModule, optim::AdamConfig};
use clap::{CommandFactory as _, Parser};
use clap_complete::{generate, Shell};
use std::{
    ffi::OsString,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};
use tracing::info;

pub const DEFAULT_INPUT: &str = "mixed";
pub const DEFAULT_OUTPUT: &str = "setgame-tflite";

/// Train a Set card classifier on a folder of labeled images and export it.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// `<input_folder> <output_folder>`; both must be given to replace the
    /// defaults `mixed` and `setgame-tflite`
    folders: Vec<PathBuf>,
    /// Number of training epochs
    #[arg(short, long, default_value = "100")]
    epochs: NonZeroUsize,
    /// Share of the images used for training, the rest is held out for evaluation
    #[arg(short, long, default_value = "0.95")]
    split: f32,
    #[arg(short, long, default_value = "32")]
    batch_size: NonZeroUsize,
    /// Number of workers for data loading
    #[arg(short = 'w', long, default_value = "1")]
    num_workers: usize,
    /// Learning rate for the optimizer, decreasing to 1/10 of the given value
    #[arg(short, long, default_value = "5.0e-3")]
    learning_rate: f64,
    /// Random seed for the split and the weights
    #[arg(long, default_value = "42")]
    seed: u64,
    /// Model type
    #[arg(short, long, default_value = ResNetType::default())]
    model: ResNetType,
    /// Classify whole cards or a single attribute
    #[arg(short, long, default_value = Target::default())]
    target: Target,
    /// Randomly flip, rotate and brighten training images
    #[arg(short, long)]
    augment: bool,
    /// Stop after this many epochs without improvement of the held-out loss
    #[arg(long)]
    early_stopping: Option<usize>,
    /// Log training progress instead of showing the terminal dashboard
    #[arg(long)]
    no_tui: bool,
    /// Directory for checkpoints and training logs (recreated if it exists)
    #[arg(long, default_value = "setgame_artifact")]
    artifact_dir: PathBuf,
    /// Print a completion script for the given shell and exit
    #[arg(long, value_name = "SHELL")]
    gen_completion: Option<Shell>,
}

/// Where images are read from and where the model is exported to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folders {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Default for Folders {
    fn default() -> Self {
        Self {
            input: DEFAULT_INPUT.into(),
            output: DEFAULT_OUTPUT.into(),
        }
    }
}

impl Folders {
    /// Exactly two arguments override both folders; any other count keeps
    /// the defaults.
    pub fn from_args<I, P>(args: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut args = args.into_iter().map(Into::into).collect::<Vec<_>>();
        match (args.pop(), args.pop(), args.is_empty()) {
            (Some(output), Some(input), true) => Self { input, output },
            _ => Self::default(),
        }
    }
}

/// Name used in completion scripts: the file name the binary was started as.
fn bin_name(argv0: Option<OsString>) -> String {
    argv0
        .as_deref()
        .and_then(|arg| Path::new(arg).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| Cli::command().get_name().to_string())
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub fn run() -> anyhow::Result<()> {
    let args = Cli::parse();
    if let Some(shell) = args.gen_completion {
        generate(
            shell,
            &mut Cli::command(),
            bin_name(std::env::args_os().next()),
            &mut std::io::stdout(),
        );
        return Ok(());
    }
    init_tracing();

    let device = select_device();

    let Folders { input, output } = Folders::from_args(args.folders);
    let dataset = CardDataSet::from_folder(&input, args.target)
        .with_context(|| format!("Failed to load images from {}", input.display()))?;
    let labels = dataset.labels().to_vec();
    let (train_set, test_set) = dataset.split(args.split, args.seed)?;

    let config = TrainingConfig::new(
        ModelConfig::new(args.model, labels.len()),
        AdamConfig::new(),
        args.target,
    )
    .with_num_epochs(args.epochs.get())
    .with_batch_size(args.batch_size.get())
    .with_num_workers(args.num_workers)
    .with_learning_rate(args.learning_rate)
    .with_seed(args.seed)
    .with_split(args.split)
    .with_augment(args.augment)
    .with_early_stopping(args.early_stopping)
    .with_tui(!args.no_tui);

    let model = train::<MyAutodiffBackend>(
        &args.artifact_dir,
        &config,
        train_set,
        test_set.clone(),
        device.clone(),
    )
    .context("Training failed")?
    .valid();

    let evaluation = evaluate(
        &model,
        test_set,
        config.batch_size,
        config.num_workers,
        device,
    );
    if let Some(evaluation) = &evaluation {
        println!("{evaluation}");
    }

    let metadata = Metadata::new(labels, config.model.clone(), config.target, evaluation);
    export(model, &metadata, &output)
        .with_context(|| format!("Failed to export the model to {}", output.display()))?;
    info!(output = %output.display(), "done");
    Ok(())
}
