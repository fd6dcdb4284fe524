use std::path::PathBuf;
use std::str::FromStr;

use log::LevelFilter;

use crate::{
    dataset::DatasetKind,
    error::{Error, Result},
};

pub const DATASET: &str = "CONVNET_DATASET";
pub const MODEL: &str = "CONVNET_MODEL";
pub const EPOCHS: &str = "CONVNET_EPOCHS";
pub const BATCH_SIZE: &str = "CONVNET_BATCH_SIZE";
pub const NUM_WORKERS: &str = "CONVNET_NUM_WORKERS";
pub const SEED: &str = "CONVNET_SEED";
pub const RESULTS_DIR: &str = "CONVNET_RESULTS_DIR";
pub const DATA_DIR: &str = "CONVNET_DATA_DIR";
pub const SAVE_MODEL: &str = "CONVNET_SAVE_MODEL";
pub const LOG_LEVEL: &str = "CONVNET_LOG_LEVEL";

/// Everything a run can be told from the outside.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub dataset: DatasetKind,
    pub model_choice: u8,
    pub epochs: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub seed: u64,
    pub results_dir: PathBuf,
    /// Where the CIFAR-10 archive is downloaded and extracted.
    pub data_dir: PathBuf,
    pub save_model: bool,
    pub log_level: LevelFilter,
}

impl Settings {
    /// Reads the `CONVNET_*` variables, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err.into());
            }
        }

        Self::from_lookup(|name| dotenvy::var(name).ok())
    }

    /// Builds settings from `lookup`, falling back to the defaults of the chosen
    /// dataset for anything missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let dataset = match lookup(DATASET) {
            Some(value) => value.parse()?,
            None => DatasetKind::Cifar10,
        };

        let data_dir = match lookup(DATA_DIR) {
            Some(value) => PathBuf::from(value),
            None => dirs::home_dir()
                .unwrap_or_default()
                .join(".cache")
                .join("burn-dataset"),
        };

        let save_model = match lookup(SAVE_MODEL) {
            Some(value) => parse_bool(SAVE_MODEL, &value)?,
            None => true,
        };

        let log_level = match lookup(LOG_LEVEL) {
            Some(value) => parse_log_level(&value)?,
            None => LevelFilter::Info,
        };

        let settings = Self {
            dataset,
            model_choice: parse_or(&lookup, MODEL, dataset.default_model_choice())?,
            epochs: parse_or(&lookup, EPOCHS, dataset.default_epochs())?,
            batch_size: parse_or(&lookup, BATCH_SIZE, 128)?,
            num_workers: parse_or(&lookup, NUM_WORKERS, 4)?,
            seed: parse_or(&lookup, SEED, 42)?,
            results_dir: lookup(RESULTS_DIR).map_or_else(|| PathBuf::from("results"), PathBuf::from),
            data_dir,
            save_model,
            log_level,
        };

        if settings.epochs == 0 {
            return Err(invalid(EPOCHS, "0", "at least one epoch is needed"));
        }
        if settings.batch_size == 0 {
            return Err(invalid(BATCH_SIZE, "0", "batches cannot be empty"));
        }

        Ok(settings)
    }

    /// Where this run's config, logs, plots and model end up.
    pub fn artifact_dir(&self) -> PathBuf {
        self.results_dir
            .join(self.dataset.name())
            .join(self.model_choice.to_string())
    }

    /// Application log of a training run, kept next to its artifact directory
    /// since that one is recreated when training starts.
    pub fn log_file(&self) -> PathBuf {
        self.results_dir
            .join(self.dataset.name())
            .join(format!("train-{}.log", self.model_choice))
    }
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> Error {
    Error::InvalidSetting {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|err: T::Err| invalid(name, &value, err.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value, "expected true or false")),
    }
}

/// Accepts level names, or `0..=3` where 0 shows everything and 3 only errors.
fn parse_log_level(value: &str) -> Result<LevelFilter> {
    match value.trim() {
        "0" => Ok(LevelFilter::Trace),
        "1" => Ok(LevelFilter::Info),
        "2" => Ok(LevelFilter::Warn),
        "3" => Ok(LevelFilter::Error),
        other => other
            .parse()
            .map_err(|_| invalid(LOG_LEVEL, value, "expected a level name or 0 to 3")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_follow_the_dataset() {
        let cifar = settings(&[]).unwrap();
        assert_eq!(cifar.dataset, DatasetKind::Cifar10);
        assert_eq!(cifar.model_choice, 3);
        assert_eq!(cifar.epochs, 20);
        assert_eq!(cifar.batch_size, 128);
        assert!(cifar.save_model);
        assert_eq!(cifar.log_level, LevelFilter::Info);

        let mnist = settings(&[(DATASET, "mnist")]).unwrap();
        assert_eq!(mnist.model_choice, 1);
        assert_eq!(mnist.epochs, 1);
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            (DATASET, "cifar-10"),
            (MODEL, "2"),
            (EPOCHS, " 5 "),
            (SEED, "7"),
            (RESULTS_DIR, "/tmp/out"),
            (SAVE_MODEL, "no"),
            (LOG_LEVEL, "warn"),
        ])
        .unwrap();

        assert_eq!(s.model_choice, 2);
        assert_eq!(s.epochs, 5);
        assert_eq!(s.seed, 7);
        assert!(!s.save_model);
        assert_eq!(s.log_level, LevelFilter::Warn);
        assert_eq!(s.artifact_dir(), PathBuf::from("/tmp/out/cifar10/2"));
        assert_eq!(s.log_file(), PathBuf::from("/tmp/out/cifar10/train-2.log"));
        assert!(!s.log_file().starts_with(s.artifact_dir()));
    }

    #[test]
    fn numeric_log_levels_count_down_to_errors_only() {
        assert_eq!(parse_log_level("0").unwrap(), LevelFilter::Trace);
        assert_eq!(parse_log_level("3").unwrap(), LevelFilter::Error);
        assert_eq!(parse_log_level("off").unwrap(), LevelFilter::Off);
        assert!(parse_log_level("7").is_err());
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = settings(&[(EPOCHS, "many")]).unwrap_err();
        assert!(matches!(err, Error::InvalidSetting { name: EPOCHS, .. }));

        assert!(settings(&[(BATCH_SIZE, "0")]).is_err());
        assert!(settings(&[(SAVE_MODEL, "maybe")]).is_err());
        assert!(matches!(
            settings(&[(DATASET, "imagenet")]),
            Err(Error::UnknownDataset(_))
        ));
    }
}
