//! Epoch loss aggregation and the per-run loss history

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::training::loss::rms;
use crate::{fits, GalshapeError, Monitor, Result};

/// Batch losses accumulated over one pass through a loader
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    /// Raw (pre-sqrt) loss of every batch
    pub batch_losses: Vec<f64>,
    started: Instant,
}

impl Default for EpochMetrics {
    fn default() -> Self {
        EpochMetrics {
            batch_losses: Vec::new(),
            started: Instant::now(),
        }
    }
}

impl EpochMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, loss: f64) {
        self.batch_losses.push(loss);
    }

    pub fn batch_count(&self) -> usize {
        self.batch_losses.len()
    }

    /// `sqrt(mean(batch losses))`; an epoch without batches is an error
    pub fn loss(&self) -> Result<f64> {
        rms(&self.batch_losses)
            .ok_or_else(|| GalshapeError::Training("epoch produced no batches".to_string()))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Wall-clock time rendered as `minutes:seconds`, whole minutes and
/// seconds rounded to the nearest unit
pub struct EpochTime(pub Duration);

impl fmt::Display for EpochTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs_f64();
        write!(f, "{:.0}:{:.0}", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// Train and validation losses, one value per completed epoch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossHistory {
    pub train: Vec<f64>,
    pub valid: Vec<f64>,
}

impl LossHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_epoch(&mut self, train_loss: f64, valid_loss: f64) {
        self.train.push(train_loss);
        self.valid.push(valid_loss);
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    /// Series the scheduler and retention policy watch
    pub fn monitored(&self, monitor: Monitor) -> &[f64] {
        match monitor {
            Monitor::TrainLoss => &self.train,
            Monitor::ValidLoss => &self.valid,
        }
    }

    /// Epoch with the lowest monitored loss, ignoring NaN
    pub fn best_epoch(&self, monitor: Monitor) -> Option<usize> {
        self.monitored(monitor)
            .iter()
            .enumerate()
            .filter(|(_, loss)| !loss.is_nan())
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(epoch, _)| epoch)
    }

    /// Primary HDU holds the train losses, the image extension the valid ones
    pub fn write_fits(&self, path: &Path) -> Result<()> {
        fits::write_hdus(path, &[self.train.as_slice(), self.valid.as_slice()])
    }

    pub fn read_fits(path: &Path) -> Result<Self> {
        let mut hdus = fits::read_hdus(path)?.into_iter();
        match (hdus.next(), hdus.next()) {
            (Some(train), Some(valid)) => Ok(LossHistory { train, valid }),
            _ => Err(GalshapeError::Fits(format!(
                "{} does not hold train and valid losses",
                path.display()
            ))),
        }
    }
}

impl fmt::Display for LossHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>6} {:>14} {:>14}", "epoch", "train", "valid")?;
        for (epoch, (train, valid)) in self.train.iter().zip(&self.valid).enumerate() {
            writeln!(f, "{:>6} {:>14.6} {:>14.6}", epoch + 1, train, valid)?;
        }
        Ok(())
    }
}
