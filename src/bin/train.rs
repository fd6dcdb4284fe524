use burn::backend::{wgpu::WgpuDevice, Autodiff};
use convnet::{
    logging::{self, LogTarget},
    Settings,
};

fn main() -> Result<(), convnet::Error> {
    type MyBackend = burn::backend::Wgpu<f32, i32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;

    let settings = Settings::from_env()?;
    let log_file = settings.log_file();
    logging::install(settings.log_level, LogTarget::File(&log_file))?;
    println!("Logging to {}", log_file.display());

    let device = WgpuDevice::default();
    let summary = convnet::run::<MyAutodiffBackend>(&settings, device)?;

    println!("Results in {}", summary.artifact_dir.display());
    Ok(())
}
