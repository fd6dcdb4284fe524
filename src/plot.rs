use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use crate::{
    error::{Error, Result},
    history::TrainingHistory,
};

pub const TRAIN_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
pub const VALID_COLOR: Rgb<u8> = Rgb([255, 127, 14]);

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const MARGIN: u32 = 48;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const AXIS: Rgb<u8> = Rgb([0, 0, 0]);

/// One curve of a chart; `values[i]` is plotted at epoch `i + 1`.
pub struct Series<'a> {
    pub values: &'a [f64],
    pub color: Rgb<u8>,
}

/// Maps data coordinates into the plotting area of the image.
struct Frame {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    num_points: usize,
    min: f64,
    max: f64,
}

impl Frame {
    fn x(&self, index: usize) -> f64 {
        if self.num_points <= 1 {
            return self.left + self.width / 2.0;
        }
        self.left + self.width * index as f64 / (self.num_points - 1) as f64
    }

    fn y(&self, value: f64) -> f64 {
        self.top + self.height * (self.max - value) / (self.max - self.min)
    }
}

/// Draws the series as line charts over a grid, with a legend swatch per series
/// in the top right corner (first series on top).
pub fn render_chart(series: &[Series<'_>], width: u32, height: u32) -> Result<RgbImage> {
    let finite = || {
        series
            .iter()
            .flat_map(|s| s.values.iter().copied())
            .filter(|v| v.is_finite())
    };
    let min = finite().fold(f64::INFINITY, f64::min);
    let max = finite().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return Err(Error::EmptyPlot("no finite value in any series".to_string()));
    }
    if width <= 2 * MARGIN || height <= 2 * MARGIN {
        return Err(Error::EmptyPlot(format!("{width}x{height} leaves no room")));
    }

    let (min, max) = if max - min < f64::EPSILON {
        (min - 0.5, max + 0.5)
    } else {
        let pad = (max - min) * 0.05;
        (min - pad, max + pad)
    };

    let frame = Frame {
        left: MARGIN as f64,
        top: MARGIN as f64 / 2.0,
        width: (width - 2 * MARGIN) as f64,
        height: (height - 2 * MARGIN) as f64,
        num_points: series.iter().map(|s| s.values.len()).max().unwrap_or(0),
        min,
        max,
    };

    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    let (left, top) = (frame.left, frame.top);
    let (right, bottom) = (left + frame.width, top + frame.height);

    for step in 0..=5 {
        let y = top + frame.height * step as f64 / 5.0;
        draw_line(&mut img, (left, y), (right, y), GRID, 1);
    }
    if frame.num_points <= 50 {
        for index in 0..frame.num_points {
            let x = frame.x(index);
            draw_line(&mut img, (x, top), (x, bottom), GRID, 1);
        }
    }
    draw_line(&mut img, (left, bottom), (right, bottom), AXIS, 1);
    draw_line(&mut img, (left, top), (left, bottom), AXIS, 1);

    for s in series {
        let points: Vec<Option<(f64, f64)>> = s
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| v.is_finite().then(|| (frame.x(i), frame.y(v))))
            .collect();

        for pair in points.windows(2) {
            if let (Some(from), Some(to)) = (pair[0], pair[1]) {
                draw_line(&mut img, from, to, s.color, 2);
            }
        }
        for point in points.iter().flatten() {
            draw_marker(&mut img, *point, s.color);
        }
    }

    for (row, s) in series.iter().enumerate() {
        let y = top + 12.0 + 14.0 * row as f64;
        draw_line(&mut img, (right - 40.0, y), (right - 12.0, y), s.color, 3);
    }

    Ok(img)
}

/// Renders `series` and writes it as a PNG, creating parent directories.
pub fn save_chart(path: &Path, series: &[Series<'_>]) -> Result<()> {
    let img = render_chart(series, WIDTH, HEIGHT)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    img.save(path)?;
    Ok(())
}

/// Writes `<prefix>-accuracy-model-<choice>.png` and `<prefix>-loss-model-<choice>.png`
/// into `dir`, train in blue and validation in orange.
pub fn plot_history(
    history: &TrainingHistory,
    dir: &Path,
    prefix: &str,
    choice: u8,
) -> Result<(PathBuf, PathBuf)> {
    let accuracy_path = dir.join(format!("{prefix}-accuracy-model-{choice}.png"));
    save_chart(
        &accuracy_path,
        &[
            Series {
                values: &history.train_accuracy,
                color: TRAIN_COLOR,
            },
            Series {
                values: &history.valid_accuracy,
                color: VALID_COLOR,
            },
        ],
    )?;

    let loss_path = dir.join(format!("{prefix}-loss-model-{choice}.png"));
    save_chart(
        &loss_path,
        &[
            Series {
                values: &history.train_loss,
                color: TRAIN_COLOR,
            },
            Series {
                values: &history.valid_loss,
                color: VALID_COLOR,
            },
        ],
    )?;

    Ok((accuracy_path, loss_path))
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_line(img: &mut RgbImage, from: (f64, f64), to: (f64, f64), color: Rgb<u8>, thickness: i64) {
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil().max(1.0) as usize;
    for step in 0..=steps {
        let t = step as f64 / steps as f64;
        let x = (from.0 + (to.0 - from.0) * t).round() as i64;
        let y = (from.1 + (to.1 - from.1) * t).round() as i64;
        for offset in 0..thickness {
            put(img, x, y + offset, color);
        }
    }
}

fn draw_marker(img: &mut RgbImage, (x, y): (f64, f64), color: Rgb<u8>) {
    let (x, y) = (x.round() as i64, y.round() as i64);
    for dx in -2..=2 {
        for dy in -2..=2 {
            put(img, x + dx, y + dy, color);
        }
    }
}
