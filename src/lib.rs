pub mod architecture;
pub mod dataset;
mod error;
pub mod evaluation;
pub mod history;
pub mod inference;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod plot;
pub mod settings;
pub mod training;

pub use architecture::{select_model, ModelPreset, OptimizerConfig};
pub use dataset::{DatasetKind, ImageDataset};
pub use error::{Error, Result};
pub use inference::{load_model, save_model};
pub use model::{Model, ModelConfig};
pub use pipeline::{run, RunSummary};
pub use settings::Settings;
pub use training::{train, TrainingConfig};
