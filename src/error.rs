use std::path::PathBuf;

use burn::{config::ConfigError, record::RecorderError};
use thiserror::Error;

use crate::dataset::DatasetKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown dataset `{0}`, expected `mnist` or `cifar10`")]
    UnknownDataset(String),

    #[error("no model {choice} for {dataset}")]
    UnknownModel { dataset: DatasetKind, choice: u8 },

    #[error("invalid value `{value}` for {name}: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("could not install logger: {0}")]
    Logger(String),

    #[error("could not read environment: {0}")]
    Env(#[from] dotenvy::Error),

    #[error("malformed dataset file {path:?}: {reason}")]
    DatasetFormat { path: PathBuf, reason: String },

    #[error("invalid dataset item: {0}")]
    InvalidItem(String),

    #[error("invalid architecture: {0}")]
    Architecture(String),

    #[error("invalid split: {0}")]
    Split(String),

    #[error("cannot evaluate: {0}")]
    Evaluation(String),

    #[error("invalid training config: {0:?}")]
    Config(ConfigError),

    #[error("model record error: {0:?}")]
    Record(RecorderError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error("nothing to plot: {0}")]
    EmptyPlot(String),

    #[error("path is not valid utf-8: {0:?}")]
    NonUtf8Path(PathBuf),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<RecorderError> for Error {
    fn from(err: RecorderError) -> Self {
        Self::Record(err)
    }
}

/// Burn's learner and loggers take directories as `&str`.
pub(crate) fn path_str(path: &std::path::Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))
}
