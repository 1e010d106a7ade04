use burn::record::RecorderError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The input folder is missing or not a directory.
    #[error("dataset folder {} is not accessible", .0.display())]
    FolderNotFound(PathBuf),

    #[error("no class directories found in {}", .0.display())]
    NoClasses(PathBuf),

    #[error("no images found below {}", .0.display())]
    NoImages(PathBuf),

    /// An attribute classifier needs every class folder to be a card label.
    #[error("folder `{0}` is not a card label like `1-red-solid-oval`")]
    NotACard(String),

    #[error("split fraction must be in (0, 1], got {0}")]
    InvalidSplit(f32),

    #[error("no images left for training, use a larger dataset or split fraction")]
    EmptyTrainingSet,

    #[error("batch size must be greater than 0")]
    InvalidBatchSize,

    #[error("failed to load image {}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("labels.txt in {} does not match the model metadata", .0.display())]
    LabelsMismatch(PathBuf),

    #[error("failed to record the model: {0:?}")]
    Recorder(RecorderError),

    #[error("invalid metadata")]
    Metadata(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<RecorderError> for Error {
    fn from(e: RecorderError) -> Self {
        Error::Recorder(e)
    }
}
