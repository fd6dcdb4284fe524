//! The network topologies selectable by an integer choice.
//!
//! | dataset  | choice | blocks                                  | head              | optimizer       |
//! |----------|--------|-----------------------------------------|-------------------|-----------------|
//! | CIFAR-10 | 1      | `[32]`                                  | 100               | SGD, momentum   |
//! | CIFAR-10 | 2      | `[32, 32]`, `[64, 64]`                  | 128               | SGD, momentum   |
//! | CIFAR-10 | 3      | `[32, 32]`, `[64, 64]` + dropout 0.2    | 128 + dropout 0.2 | SGD, momentum   |
//! | MNIST    | 1      | `[32]`                                  | 100               | SGD, momentum   |
//! | MNIST    | 2      | `[32]`, `[64]`                          | 256 (Glorot)      | Adam            |

use burn::optim::{momentum::MomentumConfig, AdamConfig, SgdConfig};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{DatasetKind, NUM_CLASSES},
    error::{Error, Result},
    model::{ConvBlockConfig, ModelConfig},
};

const LEARNING_RATE: f64 = 1.0e-3;

#[derive(Clone, Serialize, Deserialize)]
pub enum OptimizerConfig {
    Sgd(SgdConfig),
    Adam(AdamConfig),
}

impl OptimizerConfig {
    /// SGD with a plain momentum of 0.9 (no dampening).
    pub fn sgd_momentum() -> Self {
        Self::Sgd(
            SgdConfig::new().with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(0.9)
                    .with_dampening(0.0),
            )),
        )
    }

    pub fn adam() -> Self {
        Self::Adam(AdamConfig::new().with_epsilon(1.0e-7))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sgd(_) => "sgd",
            Self::Adam(_) => "adam",
        }
    }
}

pub struct ModelPreset {
    pub dataset: DatasetKind,
    pub choice: u8,
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    pub learning_rate: f64,
}

impl ModelPreset {
    /// e.g. `mnist-cnn-1`
    pub fn name(&self) -> String {
        format!("{}-cnn-{}", self.dataset, self.choice)
    }
}

/// Returns the network and optimizer for `choice` on `dataset`.
pub fn select_model(dataset: DatasetKind, choice: u8) -> Result<ModelPreset> {
    let input = dataset.image_shape();

    let (model, optimizer) = match (dataset, choice) {
        (DatasetKind::Cifar10, 1) | (DatasetKind::Mnist, 1) => (
            ModelConfig::new(input, vec![ConvBlockConfig::new(vec![32])]).with_hidden_size(100),
            OptimizerConfig::sgd_momentum(),
        ),
        (DatasetKind::Cifar10, 2) => (
            ModelConfig::new(
                input,
                vec![
                    ConvBlockConfig::new(vec![32, 32]),
                    ConvBlockConfig::new(vec![64, 64]),
                ],
            )
            .with_hidden_size(128),
            OptimizerConfig::sgd_momentum(),
        ),
        (DatasetKind::Cifar10, 3) => (
            ModelConfig::new(
                input,
                vec![
                    ConvBlockConfig::new(vec![32, 32]),
                    ConvBlockConfig::new(vec![64, 64]).with_dropout(Some(0.2)),
                ],
            )
            .with_hidden_size(128)
            .with_hidden_dropout(Some(0.2)),
            OptimizerConfig::sgd_momentum(),
        ),
        (DatasetKind::Mnist, 2) => (
            ModelConfig::new(
                input,
                vec![
                    ConvBlockConfig::new(vec![32]),
                    ConvBlockConfig::new(vec![64]),
                ],
            )
            .with_hidden_size(256)
            .with_kaiming_hidden(false),
            OptimizerConfig::adam(),
        ),
        _ => return Err(Error::UnknownModel { dataset, choice }),
    };

    Ok(ModelPreset {
        dataset,
        choice,
        model: model.with_num_classes(NUM_CLASSES),
        optimizer,
        learning_rate: LEARNING_RATE,
    })
}
