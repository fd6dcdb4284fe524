use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Initializer, Linear, LinearConfig, Relu,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

// `Result` stays unimported, `#[derive(Config)]` expands to the std one.
use crate::{
    dataset::{ClassificationBatch, ImageShape},
    error::Error,
};

/// He uniform: `U(-sqrt(6 / fan_in), sqrt(6 / fan_in))`.
fn he_uniform() -> Initializer {
    Initializer::KaimingUniform {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: false,
    }
}

/// Glorot uniform: `U(-sqrt(6 / (fan_in + fan_out)), sqrt(6 / (fan_in + fan_out)))`.
fn glorot_uniform() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

/// Biases start at zero, only weights use the layer initializer.
fn zero_bias<B: Backend>(size: usize, device: &B::Device) -> Param<Tensor<B, 1>> {
    Param::from_tensor(Tensor::zeros([size], device))
}

/// A run of valid 2d convolutions followed by a max pooling and an optional dropout.
#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    /// Output channels of each convolution, in order.
    pub filters: Vec<usize>,
    #[config(default = 3)]
    pub kernel_size: usize,
    /// Pooling window, also used as stride.
    #[config(default = 2)]
    pub pool_size: usize,
    pub dropout: Option<f64>,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub input: ImageShape,
    pub blocks: Vec<ConvBlockConfig>,
    #[config(default = 128)]
    pub hidden_size: usize,
    #[config(default = 10)]
    pub num_classes: usize,
    pub hidden_dropout: Option<f64>,
    /// He uniform for the hidden dense layer, Glorot uniform otherwise.
    #[config(default = true)]
    pub kaiming_hidden: bool,
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    dropout: Option<Dropout>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        for conv in &self.convs {
            x = conv.forward(x);
            x = self.activation.forward(x);
        }

        let x = self.pool.forward(x);
        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    hidden: Linear<B>,
    hidden_dropout: Option<Dropout>,
    output: Linear<B>,
    activation: Relu,
}

fn check_dropout(prob: Option<f64>, what: &str) -> crate::Result<()> {
    match prob {
        Some(prob) if !(0.0..1.0).contains(&prob) => Err(Error::Architecture(format!(
            "{what} dropout must be in [0, 1), got {prob}"
        ))),
        _ => Ok(()),
    }
}

impl ModelConfig {
    /// Shape of the feature maps entering the dense head.
    pub fn feature_shape(&self) -> crate::Result<ImageShape> {
        let mut shape = self.input;

        for (index, block) in self.blocks.iter().enumerate() {
            if block.filters.is_empty() {
                return Err(Error::Architecture(format!(
                    "block {index} has no convolution"
                )));
            }
            check_dropout(block.dropout, &format!("block {index}"))?;

            let kernel = block.kernel_size;
            for &filters in &block.filters {
                if kernel == 0 || shape.height < kernel || shape.width < kernel {
                    return Err(Error::Architecture(format!(
                        "block {index}: {kernel}x{kernel} kernel does not fit {}x{} feature maps",
                        shape.height, shape.width
                    )));
                }
                shape = ImageShape::new(
                    filters,
                    shape.height - kernel + 1,
                    shape.width - kernel + 1,
                );
            }

            let pool = block.pool_size;
            if pool == 0 || shape.height < pool || shape.width < pool {
                return Err(Error::Architecture(format!(
                    "block {index}: {pool}x{pool} pooling does not fit {}x{} feature maps",
                    shape.height, shape.width
                )));
            }
            shape = ImageShape::new(shape.channels, shape.height / pool, shape.width / pool);
        }

        Ok(shape)
    }

    /// Number of features after flattening the last block.
    pub fn flattened_size(&self) -> crate::Result<usize> {
        Ok(self.feature_shape()?.num_pixels())
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Model<B>> {
        let flattened = self.flattened_size()?;
        if self.hidden_size == 0 || self.num_classes == 0 {
            return Err(Error::Architecture(
                "dense layers need at least one unit".to_string(),
            ));
        }
        check_dropout(self.hidden_dropout, "hidden")?;

        let mut channels = self.input.channels;
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let mut convs = Vec::with_capacity(block.filters.len());
            for &filters in &block.filters {
                let mut conv = Conv2dConfig::new(
                    [channels, filters],
                    [block.kernel_size, block.kernel_size],
                )
                .with_initializer(he_uniform())
                .init(device);
                conv.bias = Some(zero_bias(filters, device));
                convs.push(conv);
                channels = filters;
            }

            blocks.push(ConvBlock {
                convs,
                pool: MaxPool2dConfig::new([block.pool_size, block.pool_size])
                    .with_strides([block.pool_size, block.pool_size])
                    .init(),
                dropout: block.dropout.map(|prob| DropoutConfig::new(prob).init()),
                activation: Relu::new(),
            });
        }

        let hidden_init = if self.kaiming_hidden {
            he_uniform()
        } else {
            glorot_uniform()
        };

        let mut hidden = LinearConfig::new(flattened, self.hidden_size)
            .with_initializer(hidden_init)
            .init(device);
        hidden.bias = Some(zero_bias(self.hidden_size, device));

        let mut output = LinearConfig::new(self.hidden_size, self.num_classes)
            .with_initializer(glorot_uniform())
            .init(device);
        output.bias = Some(zero_bias(self.num_classes, device));

        Ok(Model {
            blocks,
            hidden,
            hidden_dropout: self
                .hidden_dropout
                .map(|prob| DropoutConfig::new(prob).init()),
            output,
            activation: Relu::new(),
        })
    }
}

impl<B: Backend> Model<B> {
    /// # Shapes
    ///   - Images [batch_size, channels, height, width]
    ///   - Output [batch_size, num_classes]
    ///
    /// The output holds logits, the softmax is part of the loss.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.hidden.forward(x);
        let x = self.activation.forward(x);
        let x = match &self.hidden_dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };

        self.output.forward(x)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<ClassificationBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: ClassificationBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ClassificationBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: ClassificationBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}
