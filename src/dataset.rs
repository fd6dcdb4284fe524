use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{vision::MnistDataset, Dataset},
        network::downloader,
    },
    prelude::*,
};
use flate2::read::GzDecoder;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use tar::Archive;

use crate::error::{Error, Result};

const CIFAR10_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
const CIFAR10_DIR: &str = "cifar-10-batches-bin";
const CIFAR10_TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const CIFAR10_TEST_FILE: &str = "test_batch.bin";

const CIFAR10_CLASSES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];
const MNIST_CLASSES: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

pub const NUM_CLASSES: usize = 10;

/// Only one thread extracts the CIFAR-10 archive at a time.
static DOWNLOAD_LOCK: Mutex<()> = Mutex::new(());

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    pub fn num_pixels(&self) -> usize {
        self.channels * self.height * self.width
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Mnist,
    Cifar10,
}

impl DatasetKind {
    pub fn image_shape(&self) -> ImageShape {
        match self {
            Self::Mnist => ImageShape::new(1, 28, 28),
            Self::Cifar10 => ImageShape::new(3, 32, 32),
        }
    }

    pub fn class_names(&self) -> &'static [&'static str] {
        match self {
            Self::Mnist => &MNIST_CLASSES,
            Self::Cifar10 => &CIFAR10_CLASSES,
        }
    }

    /// Name of class `label`, if the dataset has that many classes.
    pub fn class_name(&self, label: u8) -> Option<&'static str> {
        self.class_names().get(label as usize).copied()
    }

    /// Short name used for result directories and plot file prefixes.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mnist => "mnist",
            Self::Cifar10 => "cifar10",
        }
    }

    pub fn default_model_choice(&self) -> u8 {
        match self {
            Self::Mnist => 1,
            Self::Cifar10 => 3,
        }
    }

    pub fn default_epochs(&self) -> usize {
        match self {
            Self::Mnist => 1,
            Self::Cifar10 => 20,
        }
    }

    pub fn default_validation_fraction(&self) -> f64 {
        match self {
            Self::Mnist => 0.1,
            Self::Cifar10 => 0.2,
        }
    }

    /// MNIST holds out the tail of the training set, CIFAR-10 a random sample.
    pub fn shuffles_split(&self) -> bool {
        matches!(self, Self::Cifar10)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mnist" => Ok(Self::Mnist),
            "cifar10" | "cifar-10" => Ok(Self::Cifar10),
            _ => Err(Error::UnknownDataset(s.to_string())),
        }
    }
}

/// Single image with its class index.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    /// Raw brightness values in `[0, 255]`, laid out `[height, width, channels]`.
    pub pixels: Vec<u8>,
    pub label: u8,
}

/// A dataset split held entirely in memory.
///
/// MNIST (60k + 10k images of 28x28x1) and CIFAR-10 (50k + 10k images of 32x32x3)
/// are small enough that keeping the raw bytes around is cheaper than decoding on
/// every epoch.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    kind: DatasetKind,
    items: Vec<ImageItem>,
}

impl ImageDataset {
    pub fn new(kind: DatasetKind, items: Vec<ImageItem>) -> Result<Self> {
        let expected = kind.image_shape().num_pixels();
        let num_classes = kind.class_names().len();
        for (index, item) in items.iter().enumerate() {
            if item.pixels.len() != expected {
                return Err(Error::InvalidItem(format!(
                    "item {index} has {} pixels, {kind} images have {expected}",
                    item.pixels.len()
                )));
            }
            if item.label as usize >= num_classes {
                return Err(Error::InvalidItem(format!(
                    "item {index} has label {}, {kind} has {num_classes} classes",
                    item.label
                )));
            }
        }
        Ok(Self { kind, items })
    }

    /// Loads the training split, downloading it on first use.
    pub fn train(kind: DatasetKind, cache_dir: &Path) -> Result<Self> {
        match kind {
            DatasetKind::Mnist => Self::from_mnist(MnistDataset::train()),
            DatasetKind::Cifar10 => {
                let root = download_cifar10(cache_dir)?;
                let mut items = Vec::with_capacity(50_000);
                for name in CIFAR10_TRAIN_FILES {
                    items.extend(read_cifar_file(&root.join(name))?);
                }
                Self::new(kind, items)
            }
        }
    }

    /// Loads the test split, downloading it on first use.
    pub fn test(kind: DatasetKind, cache_dir: &Path) -> Result<Self> {
        match kind {
            DatasetKind::Mnist => Self::from_mnist(MnistDataset::test()),
            DatasetKind::Cifar10 => {
                let root = download_cifar10(cache_dir)?;
                let items = read_cifar_file(&root.join(CIFAR10_TEST_FILE))?;
                Self::new(kind, items)
            }
        }
    }

    fn from_mnist(mnist: MnistDataset) -> Result<Self> {
        let items = mnist
            .iter()
            .map(|item| ImageItem {
                pixels: item
                    .image
                    .iter()
                    .flat_map(|row| row.iter().map(|&value| value as u8))
                    .collect(),
                label: item.label,
            })
            .collect();
        Self::new(DatasetKind::Mnist, items)
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    pub fn image_shape(&self) -> ImageShape {
        self.kind.image_shape()
    }

    /// Image tensor shape as `[n, height, width, channels]`.
    pub fn dims(&self) -> [usize; 4] {
        let shape = self.image_shape();
        [self.items.len(), shape.height, shape.width, shape.channels]
    }

    /// Label tensor shape once one-hot encoded, `[n, classes]`.
    pub fn label_dims(&self) -> [usize; 2] {
        [self.items.len(), self.kind.class_names().len()]
    }

    /// Splits off a validation set of `ceil(len * validation_fraction)` items.
    ///
    /// With a seed the items are shuffled before the cut, otherwise the last
    /// items become the validation set.
    pub fn split(
        self,
        validation_fraction: f64,
        shuffle_seed: Option<u64>,
    ) -> Result<(ImageDataset, ImageDataset)> {
        if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
            return Err(Error::Split(format!(
                "validation fraction must be in (0, 1), got {validation_fraction}"
            )));
        }

        let Self { kind, mut items } = self;
        let num_valid = (items.len() as f64 * validation_fraction).ceil() as usize;
        if num_valid == 0 || num_valid >= items.len() {
            return Err(Error::Split(format!(
                "cannot hold out {num_valid} of {} items",
                items.len()
            )));
        }

        if let Some(seed) = shuffle_seed {
            items.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        let valid = items.split_off(items.len() - num_valid);

        Ok((Self { kind, items }, Self { kind, items: valid }))
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Downloads and extracts the CIFAR-10 binary archive into `cache_dir`.
fn download_cifar10(cache_dir: &Path) -> Result<PathBuf> {
    let _lock = DOWNLOAD_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let root = cache_dir.join(CIFAR10_DIR);
    if !root.join(CIFAR10_TEST_FILE).exists() {
        fs::create_dir_all(cache_dir)?;
        log::info!("Downloading CIFAR-10 into {cache_dir:?}");
        let bytes = downloader::download_file_as_bytes(CIFAR10_URL, "cifar-10-binary.tar.gz");

        let gz_buffer = GzDecoder::new(&bytes[..]);
        let mut archive = Archive::new(gz_buffer);
        archive.unpack(cache_dir)?;
    }

    Ok(root)
}

fn read_cifar_file(path: &Path) -> Result<Vec<ImageItem>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    parse_cifar_records(&bytes).map_err(|reason| Error::DatasetFormat {
        path: path.to_path_buf(),
        reason,
    })
}

/// Decodes CIFAR-10 binary records.
///
/// Each record is one label byte followed by the red, green and blue planes of a
/// 32x32 image, each plane row-major.
pub fn parse_cifar_records(bytes: &[u8]) -> std::result::Result<Vec<ImageItem>, String> {
    let shape = DatasetKind::Cifar10.image_shape();
    let plane = shape.height * shape.width;
    let record_len = 1 + shape.num_pixels();

    if bytes.len() % record_len != 0 {
        return Err(format!(
            "{} bytes is not a whole number of {record_len}-byte records",
            bytes.len()
        ));
    }

    bytes
        .chunks_exact(record_len)
        .enumerate()
        .map(|(index, record)| {
            let label = record[0];
            if label as usize >= CIFAR10_CLASSES.len() {
                return Err(format!("record {index} has label {label}"));
            }

            let planes = &record[1..];
            let mut pixels = Vec::with_capacity(shape.num_pixels());
            for position in 0..plane {
                for channel in 0..shape.channels {
                    pixels.push(planes[channel * plane + position]);
                }
            }

            Ok(ImageItem { pixels, label })
        })
        .collect()
}

#[derive(Clone)]
pub struct ClassificationBatcher<B: Backend> {
    shape: ImageShape,
    device: B::Device,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// Images scaled to `[0, 1]`.
    ///
    /// # Shape
    /// [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,
    /// Class indices.
    ///
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(shape: ImageShape, device: B::Device) -> Self {
        Self { shape, device }
    }
}

impl<B: Backend> Batcher<ImageItem, ClassificationBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ClassificationBatch<B> {
        let ImageShape {
            channels,
            height,
            width,
        } = self.shape;
        let batch_size = items.len();

        let mut pixels = Vec::with_capacity(batch_size * self.shape.num_pixels());
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            debug_assert_eq!(item.pixels.len(), self.shape.num_pixels());
            pixels.extend(item.pixels.into_iter().map(|p| p as f32));
            labels.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, height, width, channels])
                .convert::<B::FloatElem>(),
            &self.device,
        )
        .swap_dims(3, 2) // [N, H, C, W]
        .swap_dims(2, 1); // [N, C, H, W]
        let images = images / 255;

        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, [batch_size]).convert::<B::IntElem>(),
            &self.device,
        );

        ClassificationBatch { images, targets }
    }
}
