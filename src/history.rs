use std::path::Path;

use burn::train::{
    logger::{FileMetricLogger, MetricLogger},
    metric::NumericEntry,
};
use serde::Serialize;

use crate::error::{path_str, Result};

const ACCURACY: &str = "Accuracy";
const LOSS: &str = "Loss";

/// Per-epoch training curves, accuracy in `[0, 1]`.
///
/// An epoch with nothing logged for a metric holds `NaN` for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub valid_loss: Vec<f64>,
    pub train_accuracy: Vec<f64>,
    pub valid_accuracy: Vec<f64>,
}

#[derive(Serialize)]
struct HistoryRow {
    epoch: usize,
    train_loss: f64,
    valid_loss: f64,
    train_accuracy: f64,
    valid_accuracy: f64,
}

/// Mean of the per-iteration entries of one epoch, weighting aggregated entries
/// by their number of items.
pub fn epoch_mean(entries: &[NumericEntry]) -> Option<f64> {
    let (sum, count) = entries
        .iter()
        .fold((0.0, 0usize), |(sum, count), entry| match entry {
            NumericEntry::Value(value) => (sum + value, count + 1),
            NumericEntry::Aggregated(value, n) => (sum + value * *n as f64, count + n),
        });

    (count > 0).then(|| sum / count as f64)
}

impl TrainingHistory {
    /// Reads the metric logs the learner wrote under `<artifact_dir>/{train,valid}`.
    pub fn from_logs(artifact_dir: &Path, num_epochs: usize) -> Result<Self> {
        let dir = path_str(artifact_dir)?;
        let mut train_logger = FileMetricLogger::new(&format!("{dir}/train"));
        let mut valid_logger = FileMetricLogger::new(&format!("{dir}/valid"));

        let mut history = Self::default();
        for epoch in 1..=num_epochs {
            history
                .train_loss
                .push(read_epoch(&mut train_logger, LOSS, epoch, 1.0));
            history
                .valid_loss
                .push(read_epoch(&mut valid_logger, LOSS, epoch, 1.0));
            history
                .train_accuracy
                .push(read_epoch(&mut train_logger, ACCURACY, epoch, 100.0));
            history
                .valid_accuracy
                .push(read_epoch(&mut valid_logger, ACCURACY, epoch, 100.0));
        }

        Ok(history)
    }

    pub fn epochs(&self) -> usize {
        self.train_loss.len()
    }

    /// Writes `epoch,train_loss,valid_loss,train_accuracy,valid_accuracy` rows.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for epoch in 0..self.epochs() {
            writer.serialize(HistoryRow {
                epoch: epoch + 1,
                train_loss: self.train_loss[epoch],
                valid_loss: self.valid_loss[epoch],
                train_accuracy: self.train_accuracy[epoch],
                valid_accuracy: self.valid_accuracy[epoch],
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn read_epoch(logger: &mut FileMetricLogger, name: &str, epoch: usize, scale: f64) -> f64 {
    match logger.read_numeric(name, epoch) {
        Ok(entries) => epoch_mean(&entries).map_or(f64::NAN, |mean| mean / scale),
        Err(err) => {
            log::warn!("Could not read {name} for epoch {epoch}: {err}");
            f64::NAN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::train::metric::MetricEntry;

    #[test]
    fn aggregated_entries_are_weighted() {
        let entries = [
            NumericEntry::Aggregated(50.0, 3),
            NumericEntry::Aggregated(100.0, 1),
        ];
        assert_eq!(epoch_mean(&entries), Some(62.5));

        let entries = [NumericEntry::Value(1.0), NumericEntry::Value(2.0)];
        assert_eq!(epoch_mean(&entries), Some(1.5));

        assert_eq!(epoch_mean(&[]), None);
    }

    #[test]
    fn missing_logs_read_as_nan() {
        let dir = tempfile::tempdir().unwrap();
        let history = TrainingHistory::from_logs(dir.path(), 2).unwrap();

        assert_eq!(history.epochs(), 2);
        assert!(history.valid_accuracy.iter().all(|v| v.is_nan()));
    }

    fn write_epoch(logger: &mut FileMetricLogger, epoch: usize, entries: &[(&str, &str)]) {
        for (name, serialized) in entries {
            logger.log(&MetricEntry::new(
                name.to_string(),
                String::new(),
                serialized.to_string(),
            ));
        }
        logger.end_epoch(epoch);
    }

    #[test]
    fn learner_logs_become_epoch_means() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();

        let mut train = FileMetricLogger::new(&format!("{root}/train"));
        write_epoch(
            &mut train,
            1,
            &[(LOSS, "2.0,3"), (LOSS, "1.0,1"), (ACCURACY, "50,3"), (ACCURACY, "100,1")],
        );
        write_epoch(&mut train, 2, &[(LOSS, "1.0"), (ACCURACY, "80")]);
        drop(train);

        let mut valid = FileMetricLogger::new(&format!("{root}/valid"));
        write_epoch(&mut valid, 1, &[(LOSS, "2.5,2"), (ACCURACY, "40,2")]);
        drop(valid);

        let history = TrainingHistory::from_logs(dir.path(), 2).unwrap();

        assert_eq!(history.train_loss, vec![1.75, 1.0]);
        assert_eq!(history.train_accuracy, vec![0.625, 0.8]);
        assert_eq!(history.valid_loss[0], 2.5);
        assert_eq!(history.valid_accuracy[0], 0.4);
        // no validation entries for the second epoch
        assert!(history.valid_loss[1].is_nan());
        assert!(history.valid_accuracy[1].is_nan());
    }

    #[test]
    fn csv_has_one_row_per_epoch() {
        let history = TrainingHistory {
            train_loss: vec![2.0, 1.5],
            valid_loss: vec![2.1, 1.7],
            train_accuracy: vec![0.25, 0.5],
            valid_accuracy: vec![0.2, 0.4],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");

        history.write_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(
            lines[0],
            "epoch,train_loss,valid_loss,train_accuracy,valid_accuracy"
        );
        assert_eq!(lines[1], "1,2.0,2.1,0.25,0.2");
        assert_eq!(lines[2], "2,1.5,1.7,0.5,0.4");
        assert_eq!(lines.len(), 3);
    }
}
