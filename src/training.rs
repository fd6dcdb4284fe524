use std::{path::Path, sync::Arc, time::Instant};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    optim::Optimizer,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{AccuracyMetric, LossMetric},
        LearnerBuilder,
    },
};

// `Result` stays unimported, `#[derive(Config)]` expands to the std one.
use crate::{
    architecture::{ModelPreset, OptimizerConfig},
    dataset::{ClassificationBatch, ClassificationBatcher, ImageDataset},
    error::path_str,
    model::{Model, ModelConfig},
};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    #[config(default = 20)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
}

impl TrainingConfig {
    pub fn from_preset(preset: &ModelPreset) -> Self {
        Self::new(preset.model.clone(), preset.optimizer.clone())
            .with_learning_rate(preset.learning_rate)
    }
}

type Loader<B> = Arc<dyn DataLoader<ClassificationBatch<B>>>;

/// Fits a fresh model on `train`, validating on `valid` after every epoch.
///
/// The artifact directory is recreated, then receives the training config, the
/// learner's metric logs and its checkpoints. Application logs go to whatever
/// logger the caller installed, see [`crate::logging::install`].
pub fn train<B: AutodiffBackend>(
    artifact_dir: &Path,
    config: &TrainingConfig,
    train: ImageDataset,
    valid: ImageDataset,
    device: B::Device,
) -> crate::Result<Model<B>> {
    create_artifact_dir(artifact_dir)?;
    config.save(artifact_dir.join(CONFIG_FILE))?;

    B::seed(config.seed);

    let shape = train.image_shape();
    let batcher_train = ClassificationBatcher::<B>::new(shape, device.clone());
    let batcher_valid = ClassificationBatcher::<B::InnerBackend>::new(shape, device.clone());

    log::info!(
        "Training on {} items, validating on {} items",
        train.len(),
        valid.len()
    );

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(valid);

    let model = config.model.init::<B>(&device)?;
    log::info!("Model has {} parameters", model.num_params());

    let artifact_dir = path_str(artifact_dir)?;
    let now = Instant::now();
    let model_trained = match &config.optimizer {
        OptimizerConfig::Sgd(sgd) => fit(
            artifact_dir,
            config,
            model,
            sgd.init(),
            device,
            dataloader_train,
            dataloader_valid,
        ),
        OptimizerConfig::Adam(adam) => fit(
            artifact_dir,
            config,
            model,
            adam.init(),
            device,
            dataloader_train,
            dataloader_valid,
        ),
    };
    let elapsed = now.elapsed().as_secs();
    log::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    Ok(model_trained)
}

fn fit<B, O>(
    artifact_dir: &str,
    config: &TrainingConfig,
    model: Model<B>,
    optim: O,
    device: B::Device,
    dataloader_train: Loader<B>,
    dataloader_valid: Loader<B::InnerBackend>,
) -> Model<B>
where
    B: AutodiffBackend,
    O: Optimizer<Model<B>, B> + 'static,
    O::Record: 'static,
{
    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .with_application_logger(None)
        .devices(vec![device])
        .num_epochs(config.num_epochs)
        .summary()
        .build(model, optim, config.learning_rate);

    learner.fit(dataloader_train, dataloader_valid)
}

fn create_artifact_dir(artifact_dir: &Path) -> crate::Result<()> {
    // Remove existing artifacts before to get an accurate learner summary
    if artifact_dir.exists() {
        std::fs::remove_dir_all(artifact_dir)?;
    }
    std::fs::create_dir_all(artifact_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{architecture::select_model, dataset::DatasetKind};

    #[test]
    fn preset_carries_into_config() {
        let preset = select_model(DatasetKind::Mnist, 2).unwrap();
        let config = TrainingConfig::from_preset(&preset).with_num_epochs(1);

        assert_eq!(config.learning_rate, 1.0e-3);
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.model.hidden_size, 256);
        assert_eq!(config.optimizer.name(), "adam");
    }

    #[test]
    fn config_round_trips_through_json() {
        let preset = select_model(DatasetKind::Cifar10, 3).unwrap();
        let config = TrainingConfig::from_preset(&preset).with_num_epochs(2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.num_epochs, 2);
        assert_eq!(loaded.optimizer.name(), "sgd");
        assert_eq!(
            loaded.model.flattened_size().unwrap(),
            config.model.flattened_size().unwrap()
        );
    }

    fn assert_config<C: Config>() {}

    #[test]
    fn training_config_is_a_burn_config() {
        assert_config::<TrainingConfig>();

        let preset = select_model(DatasetKind::Mnist, 1).unwrap();
        let config = TrainingConfig::from_preset(&preset).with_seed(7);
        let loaded = TrainingConfig::load_binary(config.to_string().as_bytes()).unwrap();

        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.model.hidden_size, 100);
    }

    #[test]
    fn artifact_dir_is_recreated_empty() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("run");
        std::fs::create_dir_all(artifacts.join("checkpoint")).unwrap();
        std::fs::write(artifacts.join("stale.log"), "old").unwrap();

        create_artifact_dir(&artifacts).unwrap();

        assert!(artifacts.is_dir());
        assert_eq!(std::fs::read_dir(&artifacts).unwrap().count(), 0);
    }
}
