use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;

use log::LevelFilter;
use tracing_subscriber::filter::LevelFilter as TracingLevel;

use crate::error::{Error, Result};

/// Where log records are written.
#[derive(Debug, Clone, Copy)]
pub enum LogTarget<'a> {
    Stderr,
    /// Appended to, so the training dashboard keeps the terminal.
    File(&'a Path),
}

/// Installs the process-wide logger, filtered at `level`.
///
/// Must run before training: the learner's own logger is never installed, so
/// this one keeps its filter for the whole run.
pub fn install(level: LevelFilter, target: LogTarget<'_>) -> Result<()> {
    let max_level = tracing_level(level);
    let installed = match target {
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_max_level(max_level)
            .with_writer(std::io::stderr)
            .try_init(),
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::options().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_max_level(max_level)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
    };
    installed.map_err(|err| Error::Logger(err.to_string()))?;

    // the log bridge opens the facade up to trace when it is set up
    log::set_max_level(level);
    Ok(())
}

fn tracing_level(level: LevelFilter) -> TracingLevel {
    match level {
        LevelFilter::Off => TracingLevel::OFF,
        LevelFilter::Error => TracingLevel::ERROR,
        LevelFilter::Warn => TracingLevel::WARN,
        LevelFilter::Info => TracingLevel::INFO,
        LevelFilter::Debug => TracingLevel::DEBUG,
        LevelFilter::Trace => TracingLevel::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::train::{ApplicationLoggerInstaller, FileApplicationLoggerInstaller};

    #[test]
    fn levels_map_one_to_one() {
        assert_eq!(tracing_level(LevelFilter::Off), TracingLevel::OFF);
        assert_eq!(tracing_level(LevelFilter::Warn), TracingLevel::WARN);
        assert_eq!(tracing_level(LevelFilter::Trace), TracingLevel::TRACE);
    }

    // The only test in the crate that installs the global logger.
    #[test]
    fn chosen_level_survives_the_learner_logger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("train-3.log");

        install(LevelFilter::Error, LogTarget::File(&path)).unwrap();
        assert_eq!(log::max_level(), LevelFilter::Error);

        let experiment = dir.path().join("experiment.log");
        let learner_logger = FileApplicationLoggerInstaller::new(experiment.to_str().unwrap());
        assert!(learner_logger.install().is_err());
        assert_eq!(log::max_level(), LevelFilter::Error);

        log::info!("filtered out");
        log::error!("kept");
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("kept"));
        assert!(!content.contains("filtered out"));

        assert!(matches!(
            install(LevelFilter::Trace, LogTarget::Stderr),
            Err(Error::Logger(_))
        ));
        assert_eq!(log::max_level(), LevelFilter::Error);
    }
}
