use std::fs;
use std::path::Path;

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use image::{Rgb, RgbImage};

use crate::{
    dataset::{ClassificationBatcher, ImageDataset, ImageItem, ImageShape},
    error::{Error, Result},
    model::Model,
};

const GALLERY_SIZE: usize = 9;
const GALLERY_COLUMNS: usize = 3;
const GALLERY_SCALE: u32 = 3;
const GALLERY_BORDER: u32 = 2;
const CORRECT_COLOR: Rgb<u8> = Rgb([0, 160, 0]);
const WRONG_COLOR: Rgb<u8> = Rgb([200, 0, 0]);
const UNKNOWN_CLASS: &str = "<unknown>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    /// Position of the item in the evaluated dataset.
    pub index: usize,
    pub predicted: u8,
    pub truth: u8,
}

impl Prediction {
    pub fn is_correct(&self) -> bool {
        self.predicted == self.truth
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Mean cross-entropy over all items.
    pub loss: f64,
    /// Fraction of correctly classified items.
    pub accuracy: f64,
    pub predictions: Vec<Prediction>,
}

impl Evaluation {
    /// First `n` correct and first `n` wrong predictions, in dataset order.
    pub fn examples(&self, n: usize) -> (Vec<Prediction>, Vec<Prediction>) {
        let correct = self
            .predictions
            .iter()
            .filter(|p| p.is_correct())
            .take(n)
            .copied()
            .collect();
        let wrong = self
            .predictions
            .iter()
            .filter(|p| !p.is_correct())
            .take(n)
            .copied()
            .collect();
        (correct, wrong)
    }
}

/// Runs `model` over `dataset` in order, without shuffling.
pub fn evaluate<B: Backend>(
    model: &Model<B>,
    dataset: &ImageDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<Evaluation> {
    if dataset.items().is_empty() || batch_size == 0 {
        return Err(Error::Evaluation(
            "needs at least one item and a non-zero batch size".to_string(),
        ));
    }

    let batcher = ClassificationBatcher::<B>::new(dataset.image_shape(), device.clone());
    let mut loss_sum = 0.0;
    let mut predictions = Vec::with_capacity(dataset.items().len());

    for (batch_index, chunk) in dataset.items().chunks(batch_size).enumerate() {
        let batch = batcher.batch(chunk.to_vec());
        let output = model.forward_classification(batch.images, batch.targets);

        loss_sum += output.loss.into_scalar().elem::<f64>() * chunk.len() as f64;

        let predicted = output
            .output
            .argmax(1)
            .flatten::<1>(0, 1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|err| Error::TensorData(format!("{err:?}")))?;

        let offset = batch_index * batch_size;
        predictions.extend(chunk.iter().zip(predicted).enumerate().map(
            |(i, (item, predicted))| Prediction {
                index: offset + i,
                predicted: predicted as u8,
                truth: item.label,
            },
        ));
    }

    let total = predictions.len() as f64;
    let correct = predictions.iter().filter(|p| p.is_correct()).count() as f64;

    Ok(Evaluation {
        loss: loss_sum / total,
        accuracy: correct / total,
        predictions,
    })
}

/// Draws the first nine correct predictions (top three rows, green border) and
/// the first nine wrong ones (bottom three rows, red border) into one PNG.
///
/// Returns the predictions that were drawn, correct ones first.
pub fn save_prediction_gallery(
    dataset: &ImageDataset,
    evaluation: &Evaluation,
    path: &Path,
) -> Result<Vec<Prediction>> {
    let shape = dataset.image_shape();
    let (correct, wrong) = evaluation.examples(GALLERY_SIZE);

    let cell_w = shape.width as u32 * GALLERY_SCALE + 2 * GALLERY_BORDER;
    let cell_h = shape.height as u32 * GALLERY_SCALE + 2 * GALLERY_BORDER;
    let rows = 2 * GALLERY_SIZE / GALLERY_COLUMNS;
    let mut img = RgbImage::from_pixel(
        cell_w * GALLERY_COLUMNS as u32,
        cell_h * rows as u32,
        Rgb([255, 255, 255]),
    );

    let cells = correct
        .iter()
        .enumerate()
        .map(|(slot, p)| (slot, p, CORRECT_COLOR))
        .chain(
            wrong
                .iter()
                .enumerate()
                .map(|(slot, p)| (GALLERY_SIZE + slot, p, WRONG_COLOR)),
        );

    for (slot, prediction, color) in cells {
        let item = dataset.items().get(prediction.index).ok_or_else(|| {
            Error::InvalidItem(format!("no item at index {}", prediction.index))
        })?;
        let x0 = (slot % GALLERY_COLUMNS) as u32 * cell_w;
        let y0 = (slot / GALLERY_COLUMNS) as u32 * cell_h;
        draw_cell(&mut img, item, shape, x0, y0, color);

        let kind = dataset.kind();
        log::info!(
            "#{} predicted: {}, truth: {}",
            prediction.index,
            kind.class_name(prediction.predicted).unwrap_or(UNKNOWN_CLASS),
            kind.class_name(prediction.truth).unwrap_or(UNKNOWN_CLASS),
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    img.save(path)?;

    Ok(correct.into_iter().chain(wrong).collect())
}

fn draw_cell(img: &mut RgbImage, item: &ImageItem, shape: ImageShape, x0: u32, y0: u32, border: Rgb<u8>) {
    let cell_w = shape.width as u32 * GALLERY_SCALE + 2 * GALLERY_BORDER;
    let cell_h = shape.height as u32 * GALLERY_SCALE + 2 * GALLERY_BORDER;
    for x in 0..cell_w {
        for y in 0..cell_h {
            img.put_pixel(x0 + x, y0 + y, border);
        }
    }

    for row in 0..shape.height {
        for col in 0..shape.width {
            let base = (row * shape.width + col) * shape.channels;
            let pixel = match shape.channels {
                1 => Rgb([item.pixels[base]; 3]),
                _ => Rgb([
                    item.pixels[base],
                    item.pixels[base + 1],
                    item.pixels[base + 2],
                ]),
            };
            for dx in 0..GALLERY_SCALE {
                for dy in 0..GALLERY_SCALE {
                    img.put_pixel(
                        x0 + GALLERY_BORDER + col as u32 * GALLERY_SCALE + dx,
                        y0 + GALLERY_BORDER + row as u32 * GALLERY_SCALE + dy,
                        pixel,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{architecture::select_model, dataset::DatasetKind};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn mnist(n: usize) -> ImageDataset {
        let items = (0..n)
            .map(|i| ImageItem {
                pixels: vec![(i * 13 % 256) as u8; 28 * 28],
                label: (i % 10) as u8,
            })
            .collect();
        ImageDataset::new(DatasetKind::Mnist, items).unwrap()
    }

    #[test]
    fn evaluation_covers_every_item_in_order() {
        let device = Default::default();
        let model = select_model(DatasetKind::Mnist, 1)
            .unwrap()
            .model
            .init::<TestBackend>(&device)
            .unwrap();
        let dataset = mnist(7);

        let evaluation = evaluate(&model, &dataset, 3, &device).unwrap();

        assert_eq!(evaluation.predictions.len(), 7);
        let indices: Vec<usize> = evaluation.predictions.iter().map(|p| p.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
        assert!(evaluation.loss.is_finite());
        assert!((0.0..=1.0).contains(&evaluation.accuracy));
        assert!(evaluation.predictions.iter().all(|p| p.predicted < 10));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let device = Default::default();
        let model = select_model(DatasetKind::Mnist, 1)
            .unwrap()
            .model
            .init::<TestBackend>(&device)
            .unwrap();
        let dataset = ImageDataset::new(DatasetKind::Mnist, vec![]).unwrap();

        assert!(evaluate(&model, &dataset, 8, &device).is_err());
    }

    #[test]
    fn examples_split_correct_and_wrong() {
        let predictions = (0..30)
            .map(|index| Prediction {
                index,
                predicted: (index % 3) as u8,
                truth: 0,
            })
            .collect();
        let evaluation = Evaluation {
            loss: 0.0,
            accuracy: 0.0,
            predictions,
        };

        let (correct, wrong) = evaluation.examples(9);

        assert_eq!(correct.len(), 9);
        assert_eq!(wrong.len(), 9);
        assert_eq!(correct[1].index, 3);
        assert_eq!(wrong[0].index, 1);
        assert!(correct.iter().all(Prediction::is_correct));
    }

    #[test]
    fn gallery_has_six_rows_of_three() {
        let dataset = mnist(4);
        let evaluation = Evaluation {
            loss: 0.0,
            accuracy: 0.5,
            predictions: vec![
                Prediction { index: 0, predicted: 0, truth: 0 },
                Prediction { index: 1, predicted: 7, truth: 1 },
                Prediction { index: 2, predicted: 2, truth: 2 },
                Prediction { index: 3, predicted: 12, truth: 3 },
            ],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.png");

        let drawn = save_prediction_gallery(&dataset, &evaluation, &path).unwrap();

        assert_eq!(drawn.len(), 4);
        let img = image::open(&path).unwrap().to_rgb8();
        let cell = 28 * GALLERY_SCALE + 2 * GALLERY_BORDER;
        assert_eq!(img.dimensions(), (3 * cell, 6 * cell));
        assert_eq!(*img.get_pixel(0, 0), CORRECT_COLOR);
        assert_eq!(*img.get_pixel(0, 3 * cell), WRONG_COLOR);
        // slot 2 of the correct rows stays empty
        assert_eq!(*img.get_pixel(2 * cell, 0), Rgb([255, 255, 255]));
    }
}
