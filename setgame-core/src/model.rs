use crate::data::ImageBatch;
use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    Relu,
};
use burn::prelude::*;
use burn::tensor::{activation::softmax, backend::AutodiffBackend};
use burn::train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep};
use clap::builder::OsStr;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

/// A residual block. Without `conv3` it is the two-layer basic block,
/// with it the 1x1-3x3-1x1 bottleneck.
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Option<Conv2d<B>>,
    bn3: Option<BatchNorm<B, 2>>,
    relu: Relu,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Block<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.bn.forward(down.conv.forward(input.clone())),
            None => input.clone(),
        };
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));
        let x = match (&self.conv3, &self.bn3) {
            (Some(conv3), Some(bn3)) => bn3.forward(conv3.forward(self.relu.forward(x))),
            _ => x,
        };
        self.relu.forward(x + identity)
    }
}

fn conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(kernel / 2, kernel / 2))
        .with_bias(false)
        .init(device)
}

impl<B: Backend> Block<B> {
    fn basic(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv1: conv([in_channels, out_channels], 3, stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv([out_channels, out_channels], 3, 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            conv3: None,
            bn3: None,
            relu: Relu::new(),
            downsample: downsample(in_channels, out_channels, stride, device),
        }
    }

    fn bottleneck(in_channels: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = width * BOTTLENECK_EXPANSION;
        Self {
            conv1: conv([in_channels, width], 1, 1, device),
            bn1: BatchNormConfig::new(width).init(device),
            conv2: conv([width, width], 3, stride, device),
            bn2: BatchNormConfig::new(width).init(device),
            conv3: Some(conv([width, out_channels], 1, 1, device)),
            bn3: Some(BatchNormConfig::new(out_channels).init(device)),
            relu: Relu::new(),
            downsample: downsample(in_channels, out_channels, stride, device),
        }
    }
}

fn downsample<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Option<Downsample<B>> {
    (stride != 1 || in_channels != out_channels).then(|| Downsample {
        conv: conv([in_channels, out_channels], 1, stride, device),
        bn: BatchNormConfig::new(out_channels).init(device),
    })
}

const BOTTLENECK_EXPANSION: usize = 4;

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
    blocks: Vec<Block<B>>,
    avgpool: AdaptiveAvgPool2d,
    dropout: Dropout,
    fc: Linear<B>,
    loss: CrossEntropyLoss<B>,
}

impl<B: Backend> Model<B> {
    /// # Shapes
    ///   - Images [batch_size, 3, height, width]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.maxpool.forward(self.relu.forward(self.bn1.forward(x)));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.avgpool.forward(x); // [batch_size, channels, 1, 1]
        let x = x.flatten::<2>(1, 3);
        self.fc.forward(self.dropout.forward(x))
    }

    /// Class probabilities, [batch_size, num_classes].
    pub fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn forward_classification(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        let output = self.forward(batch.images);
        let loss = self.loss.forward(output.clone(), batch.targets.clone());
        ClassificationOutput::new(loss, output, batch.targets)
    }
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let classify = self.forward_classification(batch);
        TrainOutput::new(self, classify.loss.backward(), classify)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch)
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    resnet_type: ResNetType,
    num_classes: usize,
    #[config(default = 0.2)]
    dropout: f64,
    #[config(default = 0.1)]
    label_smoothing: f32,
}

impl ModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let (depths, bottleneck) = self.resnet_type.layout();
        let mut blocks = vec![];
        let mut in_channels = 64;
        for (stage, depth) in depths.into_iter().enumerate() {
            let width = 64 << stage;
            for i in 0..depth {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                let block = if bottleneck {
                    Block::bottleneck(in_channels, width, stride, device)
                } else {
                    Block::basic(in_channels, width, stride, device)
                };
                in_channels = if bottleneck {
                    width * BOTTLENECK_EXPANSION
                } else {
                    width
                };
                blocks.push(block);
            }
        }
        Model {
            conv1: conv([3, 64], 7, 2, device),
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc: LinearConfig::new(in_channels, self.num_classes).init(device),
            loss: CrossEntropyLossConfig::new()
                .with_smoothing(Some(self.label_smoothing))
                .init(device),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn resnet_type(&self) -> &ResNetType {
        &self.resnet_type
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ResNetType {
    #[default]
    Layer18 = 18,
    Layer34 = 34,
    Layer50 = 50,
}

impl ResNetType {
    /// Blocks per stage and whether the stages use bottleneck blocks.
    fn layout(&self) -> ([usize; 4], bool) {
        match self {
            ResNetType::Layer18 => ([2, 2, 2, 2], false),
            ResNetType::Layer34 => ([3, 4, 6, 3], false),
            ResNetType::Layer50 => ([3, 4, 6, 3], true),
        }
    }
}

impl From<ResNetType> for OsStr {
    fn from(value: ResNetType) -> Self {
        format!("layer{:?}", value as usize).into()
    }
}
