#![cfg(any(feature = "tch", feature = "ndarray"))]

pub mod card;
mod cli;
mod data;
mod device;
mod error;
mod evaluate;
mod export;
mod model;
mod train;

pub use card::{Card, Target};
pub use cli::{run, Folders, DEFAULT_INPUT, DEFAULT_OUTPUT};
pub use data::{CardDataSet, SIZE};
pub use device::{select_device, Device, MyAutodiffBackend, MyBackend};
pub use error::{Error, Result};
pub use evaluate::{evaluate, Evaluation};
pub use export::{export, load, Metadata};
pub use model::{Model, ModelConfig, ResNetType};
pub use train::{train, TrainingConfig};
