use crate::{
    data::{CardDataSet, ImageBatcher},
    model::Model,
};
use burn::{data::dataloader::DataLoaderBuilder, prelude::*, tensor::ElementConversion};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Loss and accuracy over the held-out partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
    pub samples: usize,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loss: {:.4}, accuracy: {:.4}", self.loss, self.accuracy)
    }
}

/// Returns `None` when there is nothing to evaluate on.
pub fn evaluate<B: Backend>(
    model: &Model<B>,
    test_set: CardDataSet,
    batch_size: usize,
    num_workers: usize,
    device: B::Device,
) -> Option<Evaluation> {
    if test_set.samples().is_empty() {
        warn!("test partition is empty, skipping evaluation");
        return None;
    }
    let dataloader = DataLoaderBuilder::new(ImageBatcher::<B>::new(device))
        .batch_size(batch_size)
        .num_workers(num_workers)
        .build(test_set);

    let mut loss = 0.;
    let mut correct = 0;
    let mut samples = 0;
    for batch in dataloader.iter() {
        let n = batch.targets.dims()[0];
        let output = model.forward_classification(batch);
        loss += output.loss.into_scalar().elem::<f32>() * n as f32;
        correct += output
            .output
            .argmax(1)
            .reshape([n])
            .equal(output.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;
        samples += n;
    }
    Some(Evaluation {
        loss: loss / samples as f32,
        accuracy: correct as f32 / samples as f32,
        samples,
    })
}
