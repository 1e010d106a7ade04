use burn::{
    data::dataloader::{DataLoaderBuilder, Dataset},
    lr_scheduler::linear::LinearLrSchedulerConfig,
    optim::AdamConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{
            store::{Aggregate, Direction, Split},
            AccuracyMetric, CpuMemory, CpuUse, LearningRateMetric, LossMetric,
        },
        renderer::{MetricState, MetricsRenderer, TrainingProgress},
        LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition,
    },
};
use std::{io::IsTerminal as _, path::Path};
use tracing::{debug, info, warn};

use crate::{
    card::Target,
    data::{CardDataSet, ImageBatcher},
    error::{Error, Result},
    model::{Model, ModelConfig},
};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    pub target: Target,
    #[config(default = 100)]
    pub num_epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 5.0e-3)]
    pub learning_rate: f64,
    /// Share of the dataset used for training, the rest is held out.
    #[config(default = 0.95)]
    pub split: f32,
    #[config(default = false)]
    pub augment: bool,
    /// Stop after this many epochs without a lower validation loss.
    pub early_stopping: Option<usize>,
    /// Show burn's terminal dashboard. Only honored when stdout is a terminal.
    #[config(default = true)]
    pub tui: bool,
}

/// Reports learner progress through `tracing` instead of the terminal dashboard.
struct LogRenderer;

impl MetricsRenderer for LogRenderer {
    fn update_train(&mut self, _state: MetricState) {}

    fn update_valid(&mut self, state: MetricState) {
        if let MetricState::Numeric(entry, _) = state {
            debug!(metric = %entry.name, value = %entry.formatted, "valid");
        }
    }

    fn render_train(&mut self, item: TrainingProgress) {
        debug!(
            epoch = item.epoch,
            epochs = item.epoch_total,
            iteration = item.iteration,
            "train"
        );
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        debug!(epoch = item.epoch, epochs = item.epoch_total, "valid");
    }
}

fn create_artifact_dir(artifact_dir: &Path) -> Result<()> {
    // Remove existing artifacts before to get an accurate learner summary
    std::fs::remove_dir_all(artifact_dir).ok();
    std::fs::create_dir_all(artifact_dir)?;
    Ok(())
}

/// Fits a fresh model on `train_set`, validating on `test_set` after each
/// epoch. Checkpoints and metric logs go to `artifact_dir`.
///
/// Fails before touching `artifact_dir` when the batch size is zero or there
/// is nothing to train on.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &Path,
    config: &TrainingConfig,
    train_set: CardDataSet,
    test_set: CardDataSet,
    device: B::Device,
) -> Result<Model<B>> {
    if config.batch_size == 0 {
        return Err(Error::InvalidBatchSize);
    }
    if train_set.is_empty() {
        return Err(Error::EmptyTrainingSet);
    }
    create_artifact_dir(artifact_dir)?;

    B::seed(config.seed);

    config.save(artifact_dir.join("train_config.json"))?;

    // The learner needs a validation split; reuse the training images when
    // everything went to training.
    let valid_set = if test_set.is_empty() {
        warn!("test partition is empty, validating on the training images");
        train_set.clone()
    } else {
        test_set
    };
    let train_set = train_set.with_augmentation(config.augment);
    let iterations = config.num_epochs * train_set.len().div_ceil(config.batch_size);
    info!(
        train = train_set.len(),
        valid = valid_set.len(),
        epochs = config.num_epochs,
        "training"
    );

    let batcher_train = ImageBatcher::<B>::new(device.clone());
    let batcher_valid = ImageBatcher::<B::InnerBackend>::new(device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_set);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(valid_set);

    let mut builder = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train(LearningRateMetric::new())
        .metric_train(CpuUse::new())
        .metric_train(CpuMemory::new());
    if !config.tui || !std::io::stdout().is_terminal() {
        builder = builder.renderer(LogRenderer);
    }
    if let Some(n_epochs) = config.early_stopping {
        builder = builder.early_stopping(MetricEarlyStoppingStrategy::new::<LossMetric<B>>(
            Aggregate::Mean,
            Direction::Lowest,
            Split::Valid,
            StoppingCondition::NoImprovementSince { n_epochs },
        ));
    }
    let learner = builder
        .with_file_checkpointer(CompactRecorder::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            config.model.init::<B>(&device),
            config.optimizer.init(),
            LinearLrSchedulerConfig::new(
                config.learning_rate,
                config.learning_rate / 10.,
                iterations.max(1),
            )
            .init(),
        );

    Ok(learner.fit(dataloader_train, dataloader_valid))
}
