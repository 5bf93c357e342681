//! The tunable configuration space and the fixed-topology CNN it feeds.

use std::str::FromStr;

use anyhow::{anyhow, ensure, Error, Result};
use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    Dropout, DropoutConfig, Linear, LinearConfig,
};
use burn::tensor::{activation::relu, backend::Backend, Tensor};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use crate::data::ImageShape;

pub const N_LAYERS_CHOICES: [u32; 5] = [1, 2, 3, 4, 5];
pub const WEIGHT_INIT_CHOICES: [WeightInit; 6] = [
    WeightInit::Uniform,
    WeightInit::Normal,
    WeightInit::GlorotUniform,
    WeightInit::GlorotNormal,
    WeightInit::HeUniform,
    WeightInit::HeNormal,
];
pub const BATCH_SIZE_CHOICES: [usize; 5] = [16, 32, 64, 128, 256];
pub const OPTIMIZER_CHOICES: [OptimizerKind; 4] = [
    OptimizerKind::RmsProp,
    OptimizerKind::AdaGrad,
    OptimizerKind::AdaDelta,
    OptimizerKind::Adam,
];
pub const FILTER_COUNT_CHOICES: [usize; 4] = [8, 16, 32, 64];
pub const KERNEL_SIZE_CHOICES: [usize; 3] = [2, 3, 4];
pub const POOL_SIZE_CHOICES: [usize; 3] = [2, 3, 4];
pub const DROPOUT_CHOICES: [f64; 3] = [0.125, 0.25, 0.5];
pub const DENSE_WIDTH_CHOICES: [usize; 4] = [64, 128, 256, 512];

/// Weight-initialization schemes the space draws from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightInit {
    Uniform,
    Normal,
    GlorotUniform,
    GlorotNormal,
    HeUniform,
    HeNormal,
}

impl WeightInit {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Normal => "normal",
            Self::GlorotUniform => "glorot_uniform",
            Self::GlorotNormal => "glorot_normal",
            Self::HeUniform => "he_uniform",
            Self::HeNormal => "he_normal",
        }
    }
}

impl FromStr for WeightInit {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        WEIGHT_INIT_CHOICES
            .iter()
            .find(|candidate| candidate.name() == value)
            .copied()
            .ok_or_else(|| anyhow!("unrecognized weight initialization: {value:?}"))
    }
}

/// The closed set of optimizers a configuration may name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "rmsprop")]
    RmsProp,
    #[serde(rename = "adagrad")]
    AdaGrad,
    #[serde(rename = "adadelta")]
    AdaDelta,
    #[serde(rename = "adam")]
    Adam,
}

impl OptimizerKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RmsProp => "rmsprop",
            Self::AdaGrad => "adagrad",
            Self::AdaDelta => "adadelta",
            Self::Adam => "adam",
        }
    }

    /// The learning rate conventionally paired with each optimizer when it
    /// is selected by name alone.
    pub fn default_learning_rate(&self) -> f64 {
        match self {
            Self::RmsProp => 1e-3,
            Self::AdaGrad => 1e-2,
            Self::AdaDelta => 1.0,
            Self::Adam => 1e-3,
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        OPTIMIZER_CHOICES
            .iter()
            .find(|candidate| candidate.name() == value)
            .copied()
            .ok_or_else(|| anyhow!("unrecognized optimizer: {value:?}"))
    }
}

/// One sampled assignment of values to every tunable hyperparameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Sampled but not consumed: the builder below has a fixed two-conv
    /// depth. Kept so logged trials record the full draw.
    pub n_layers: u32,
    /// Sampled but not consumed: layers keep the library's default
    /// initialization. Kept for the same reason as `n_layers`.
    pub init: WeightInit,
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    pub n_filters_0: usize,
    pub kernel_size_0: usize,
    pub n_filters_1: usize,
    pub kernel_size_1: usize,
    pub pool_size: usize,
    pub dropout_0: f64,
    pub dense_0: usize,
    pub dropout_1: f64,
}

impl TrialConfig {
    /// Draw each hyperparameter independently and uniformly from its set.
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            n_layers: pick(rng, &N_LAYERS_CHOICES),
            init: pick(rng, &WEIGHT_INIT_CHOICES),
            batch_size: pick(rng, &BATCH_SIZE_CHOICES),
            optimizer: pick(rng, &OPTIMIZER_CHOICES),
            n_filters_0: pick(rng, &FILTER_COUNT_CHOICES),
            kernel_size_0: pick(rng, &KERNEL_SIZE_CHOICES),
            n_filters_1: pick(rng, &FILTER_COUNT_CHOICES),
            kernel_size_1: pick(rng, &KERNEL_SIZE_CHOICES),
            pool_size: pick(rng, &POOL_SIZE_CHOICES),
            dropout_0: pick(rng, &DROPOUT_CHOICES),
            dense_0: pick(rng, &DENSE_WIDTH_CHOICES),
            dropout_1: pick(rng, &DROPOUT_CHOICES),
        }
    }
}

fn pick<T: Copy, R: Rng + ?Sized>(rng: &mut R, choices: &[T]) -> T {
    *choices.choose(rng).expect("choice sets are non-empty")
}

/// conv(relu) -> conv(relu) -> max-pool -> dropout -> flatten -> dense(relu)
/// -> dropout -> dense logits. Valid padding throughout; the loss applies
/// the softmax.
#[derive(burn::module::Module, Debug)]
pub struct ConvNet<B: Backend> {
    conv_0: Conv2d<B>,
    conv_1: Conv2d<B>,
    pool: MaxPool2d,
    dropout_0: Dropout,
    hidden: Linear<B>,
    dropout_1: Dropout,
    output: Linear<B>,
}

impl<B: Backend> ConvNet<B> {
    pub fn build(
        config: &TrialConfig,
        shape: ImageShape,
        n_classes: usize,
        device: &B::Device,
    ) -> Result<Self> {
        ensure!(n_classes > 0, "a classifier needs at least one class");

        let height = conv_extent(
            conv_extent(shape.height, config.kernel_size_0)?,
            config.kernel_size_1,
        )?;
        let width = conv_extent(
            conv_extent(shape.width, config.kernel_size_0)?,
            config.kernel_size_1,
        )?;
        let pooled_height = height / config.pool_size;
        let pooled_width = width / config.pool_size;
        ensure!(
            pooled_height > 0 && pooled_width > 0,
            "pool size {} collapses the {}x{} feature map",
            config.pool_size,
            height,
            width
        );
        let flattened = config.n_filters_1 * pooled_height * pooled_width;

        Ok(Self {
            conv_0: Conv2dConfig::new(
                [shape.channels, config.n_filters_0],
                [config.kernel_size_0; 2],
            )
            .init(device),
            conv_1: Conv2dConfig::new(
                [config.n_filters_0, config.n_filters_1],
                [config.kernel_size_1; 2],
            )
            .init(device),
            pool: MaxPool2dConfig::new([config.pool_size; 2])
                .with_strides([config.pool_size; 2])
                .init(),
            dropout_0: DropoutConfig::new(config.dropout_0).init(),
            hidden: LinearConfig::new(flattened, config.dense_0).init(device),
            dropout_1: DropoutConfig::new(config.dropout_1).init(),
            output: LinearConfig::new(config.dense_0, n_classes).init(device),
        })
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv_0.forward(images));
        let x = relu(self.conv_1.forward(x));
        let x = self.pool.forward(x);
        let x = self.dropout_0.forward(x);
        let [batch, channels, height, width] = x.dims();
        let x: Tensor<B, 2> = x.reshape([batch, channels * height * width]);
        let x = relu(self.hidden.forward(x));
        let x = self.dropout_1.forward(x);
        self.output.forward(x)
    }
}

fn conv_extent(extent: usize, kernel: usize) -> Result<usize> {
    extent
        .checked_sub(kernel)
        .map(|shrunk| shrunk + 1)
        .ok_or_else(|| anyhow!("kernel size {} exceeds input extent {}", kernel, extent))
}
