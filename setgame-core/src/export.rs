//! The exported artifact.
//!
//! An export directory holds three files:
//!   - `model.mpk`: the weights, recorded in half precision by [`CompactRecorder`]
//!   - `labels.txt`: one class label per line, line `i` names output `i`
//!   - `metadata.json`: how to feed the model and how well it did
//!
//! Inputs are `[batch, 3, 224, 224]` RGB images scaled to `[0, 1]`.

use crate::{
    card::Target,
    data::SIZE,
    error::{Error, Result},
    evaluate::Evaluation,
    model::{Model, ModelConfig},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    path::Path,
};
use tracing::info;

const MODEL_FILE: &str = "model";
const LABELS_FILE: &str = "labels.txt";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct Metadata {
    pub image_size: usize,
    /// Channel order of the input tensor.
    pub layout: String,
    /// Pixels are divided by this before entering the model.
    pub scale: f32,
    pub labels: Vec<String>,
    pub model: ModelConfig,
    pub target: Target,
    pub evaluation: Option<Evaluation>,
}

impl Metadata {
    pub fn new(
        labels: Vec<String>,
        model: ModelConfig,
        target: Target,
        evaluation: Option<Evaluation>,
    ) -> Self {
        Self {
            image_size: SIZE,
            layout: "NCHW/RGB".to_string(),
            scale: 255.,
            labels,
            model,
            target,
            evaluation,
        }
    }
}

/// Writes the model and its description into `dir`, creating it if needed.
/// Existing files with the same names are replaced.
pub fn export<B: Backend>(model: Model<B>, metadata: &Metadata, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    model.save_file(dir.join(MODEL_FILE), &CompactRecorder::new())?;
    let mut labels = metadata.labels.join("\n");
    labels.push('\n');
    fs::write(dir.join(LABELS_FILE), labels)?;
    serde_json::to_writer_pretty(File::create(dir.join(METADATA_FILE))?, metadata)?;
    info!(
        dir = %dir.display(),
        classes = metadata.labels.len(),
        "model exported"
    );
    Ok(())
}

/// Restores an exported model together with its metadata.
pub fn load<B: Backend>(dir: &Path, device: &B::Device) -> Result<(Model<B>, Metadata)> {
    let metadata: Metadata = serde_json::from_reader(File::open(dir.join(METADATA_FILE))?)?;
    let labels = fs::read_to_string(dir.join(LABELS_FILE))?
        .lines()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if labels != metadata.labels || labels.len() != metadata.model.num_classes() {
        return Err(Error::LabelsMismatch(dir.to_path_buf()));
    }
    let record = CompactRecorder::new().load(dir.join(MODEL_FILE), device)?;
    let model = metadata.model.init::<B>(device).load_record(record);
    Ok((model, metadata))
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use crate::model::ResNetType;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    type TestBackend = NdArray<f32>;

    fn metadata() -> Metadata {
        Metadata::new(
            vec!["diamond".into(), "oval".into(), "squiggle".into()],
            ModelConfig::new(ResNetType::Layer18, 3),
            Target::Shape,
            Some(Evaluation {
                loss: 0.5,
                accuracy: 0.75,
                samples: 4,
            }),
        )
    }

    #[test]
    fn export_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("setgame-tflite");
        let device = NdArrayDevice::Cpu;
        let metadata = metadata();
        let model = metadata.model.init::<TestBackend>(&device);
        export(model, &metadata, &out).unwrap();

        assert!(out.join("model.mpk").is_file());
        assert_eq!(
            fs::read_to_string(out.join(LABELS_FILE)).unwrap(),
            "diamond\noval\nsquiggle\n"
        );

        let (model, loaded) = load::<TestBackend>(&out, &device).unwrap();
        assert_eq!(loaded.labels, metadata.labels);
        assert_eq!(loaded.image_size, 224);
        assert_eq!(loaded.target, Target::Shape);
        assert_eq!(loaded.evaluation, metadata.evaluation);
        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(model.forward(images).dims(), [1, 3]);
    }

    #[test]
    fn load_rejects_edited_labels() {
        let dir = tempfile::tempdir().unwrap();
        let device = NdArrayDevice::Cpu;
        let metadata = metadata();
        export(
            metadata.model.init::<TestBackend>(&device),
            &metadata,
            dir.path(),
        )
        .unwrap();
        fs::write(dir.path().join(LABELS_FILE), "oval\ndiamond\nsquiggle\n").unwrap();
        assert!(matches!(
            load::<TestBackend>(dir.path(), &device),
            Err(Error::LabelsMismatch(_))
        ));
    }

    #[test]
    fn load_from_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load::<TestBackend>(&dir.path().join("nope"), &NdArrayDevice::Cpu),
            Err(Error::Io(_))
        ));
    }
}
