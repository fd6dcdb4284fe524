use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    prelude::Backend,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};

use crate::{
    error::Result,
    model::Model,
    training::{TrainingConfig, CONFIG_FILE},
};

const MODEL_FILE: &str = "model";

/// Weights are kept at full precision, checkpoints during training are not.
type ModelRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Writes the model record next to the training config, returns the record path.
pub fn save_model<B: Backend>(artifact_dir: &Path, model: &Model<B>) -> Result<PathBuf> {
    let path = artifact_dir.join(MODEL_FILE);
    model.clone().save_file(path.clone(), &ModelRecorder::new())?;
    // extension added by the recorder
    Ok(path.with_extension("mpk"))
}

/// Rebuilds the model saved by [`save_model`] from its training config and record.
pub fn load_model<B: Backend>(artifact_dir: &Path, device: &B::Device) -> Result<Model<B>> {
    let config = TrainingConfig::load(artifact_dir.join(CONFIG_FILE))?;
    let record = ModelRecorder::new().load(artifact_dir.join(MODEL_FILE), device)?;

    Ok(config.model.init(device)?.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{architecture::select_model, dataset::DatasetKind};
    use burn::{
        backend::NdArray,
        tensor::{Distribution, Tensor},
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn saved_model_reloads_with_the_same_weights() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let preset = select_model(DatasetKind::Mnist, 2).unwrap();
        TrainingConfig::from_preset(&preset)
            .save(dir.path().join(CONFIG_FILE))
            .unwrap();
        let model = preset.model.init::<TestBackend>(&device).unwrap();

        let path = save_model(dir.path(), &model).unwrap();
        assert!(path.exists());
        let loaded = load_model::<TestBackend>(dir.path(), &device).unwrap();

        let images = Tensor::<TestBackend, 4>::random(
            [2, 1, 28, 28],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let expected = model.forward(images.clone()).into_data();
        let actual = loaded.forward(images).into_data();
        expected.assert_eq(&actual, true);
    }

    #[test]
    fn missing_artifacts_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_model::<TestBackend>(dir.path(), &Default::default()).is_err());
    }
}
