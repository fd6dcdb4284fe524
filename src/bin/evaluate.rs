use burn::backend::{wgpu::WgpuDevice, Wgpu};
use convnet::{
    evaluation::{evaluate, save_prediction_gallery},
    logging::{self, LogTarget},
    pipeline::GALLERY_FILE,
    ImageDataset, Settings,
};

fn main() -> Result<(), convnet::Error> {
    type MyBackend = Wgpu<f32, i32>;

    let settings = Settings::from_env()?;
    logging::install(settings.log_level, LogTarget::Stderr)?;

    let device = WgpuDevice::default();
    let artifact_dir = settings.artifact_dir();
    let model = convnet::load_model::<MyBackend>(&artifact_dir, &device)?;

    let test = ImageDataset::test(settings.dataset, &settings.data_dir)?;
    let evaluation = evaluate(&model, &test, settings.batch_size, &device)?;
    println!("Test Loss: {}", evaluation.loss);
    println!("Test Accuracy: {}", evaluation.accuracy);

    save_prediction_gallery(&test, &evaluation, &artifact_dir.join(GALLERY_FILE))?;
    Ok(())
}
