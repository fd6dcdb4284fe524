use std::path::PathBuf;

use burn::{
    module::AutodiffModule,
    tensor::backend::AutodiffBackend,
};

use crate::{
    architecture::select_model,
    dataset::ImageDataset,
    error::Result,
    evaluation::{evaluate, save_prediction_gallery, Evaluation},
    history::TrainingHistory,
    inference::save_model,
    plot::plot_history,
    settings::Settings,
    training::{train, TrainingConfig},
};

pub const HISTORY_FILE: &str = "history.csv";
pub const GALLERY_FILE: &str = "predictions.png";

/// What a run leaves behind.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub artifact_dir: PathBuf,
    pub history: TrainingHistory,
    pub evaluation: Evaluation,
    pub accuracy_plot: PathBuf,
    pub loss_plot: PathBuf,
    pub gallery: PathBuf,
    pub model_path: Option<PathBuf>,
}

/// Loads the dataset, trains the selected model, plots its curves, evaluates it
/// on the test split and optionally saves it.
pub fn run<B: AutodiffBackend>(settings: &Settings, device: B::Device) -> Result<RunSummary> {
    println!("convnet {}", env!("CARGO_PKG_VERSION"));
    println!("backend: {}", B::name());

    let dataset = settings.dataset;
    let train_full = ImageDataset::train(dataset, &settings.data_dir)?;
    let test = ImageDataset::test(dataset, &settings.data_dir)?;
    print_shapes("train", &train_full);
    print_shapes("test", &test);

    let seed = dataset.shuffles_split().then_some(settings.seed);
    let (train_set, valid_set) = train_full.split(dataset.default_validation_fraction(), seed)?;
    print_shapes("valid", &valid_set);

    let preset = select_model(dataset, settings.model_choice)?;
    log::info!(
        "Selected {} ({} optimizer, learning rate {})",
        preset.name(),
        preset.optimizer.name(),
        preset.learning_rate
    );

    let config = TrainingConfig::from_preset(&preset)
        .with_num_epochs(settings.epochs)
        .with_batch_size(settings.batch_size)
        .with_num_workers(settings.num_workers)
        .with_seed(settings.seed);

    let artifact_dir = settings.artifact_dir();
    let model = train::<B>(&artifact_dir, &config, train_set, valid_set, device.clone())?;

    let history = TrainingHistory::from_logs(&artifact_dir, config.num_epochs)?;
    history.write_csv(&artifact_dir.join(HISTORY_FILE))?;
    let (accuracy_plot, loss_plot) = plot_history(
        &history,
        &artifact_dir,
        dataset.name(),
        settings.model_choice,
    )?;
    log::info!("Wrote {accuracy_plot:?} and {loss_plot:?}, train in blue, validation in orange");

    let model_valid = model.valid();
    let evaluation = evaluate(&model_valid, &test, config.batch_size, &device)?;
    println!("Test Loss: {}", evaluation.loss);
    println!("Test Accuracy: {}", evaluation.accuracy);

    let gallery = artifact_dir.join(GALLERY_FILE);
    save_prediction_gallery(&test, &evaluation, &gallery)?;

    let model_path = if settings.save_model {
        let path = save_model(&artifact_dir, &model_valid)?;
        log::info!("Saved model to {path:?}");
        Some(path)
    } else {
        None
    };

    Ok(RunSummary {
        artifact_dir,
        history,
        evaluation,
        accuracy_plot,
        loss_plot,
        gallery,
        model_path,
    })
}

fn print_shapes(name: &str, dataset: &ImageDataset) {
    println!("x_{name}.shape={}", format_dims(&dataset.dims()));
    println!("y_{name}.shape={}", format_dims(&dataset.label_dims()));
}

fn format_dims(dims: &[usize]) -> String {
    let dims: Vec<String> = dims.iter().map(usize::to_string).collect();
    format!("({})", dims.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetKind, ImageItem};

    #[test]
    fn dims_print_as_tuples() {
        assert_eq!(format_dims(&[50000, 32, 32, 3]), "(50000, 32, 32, 3)");
        assert_eq!(format_dims(&[10]), "(10)");
    }

    #[test]
    fn shapes_of_a_split_dataset() {
        let items = (0..20)
            .map(|i| ImageItem {
                pixels: vec![0; 28 * 28],
                label: (i % 10) as u8,
            })
            .collect();
        let dataset = ImageDataset::new(DatasetKind::Mnist, items).unwrap();
        let (train, valid) = dataset
            .split(DatasetKind::Mnist.default_validation_fraction(), None)
            .unwrap();

        assert_eq!(format_dims(&train.dims()), "(18, 28, 28, 1)");
        assert_eq!(format_dims(&valid.label_dims()), "(2, 10)");
    }
}
