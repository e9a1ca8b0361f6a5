//! Batch inference over a dataset

use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::ElementConversion;
use serde::Serialize;
use std::path::Path;

use crate::model::TaskModel;
use crate::training::loss::LossFunction;
use crate::training::metrics::EpochMetrics;
use crate::training::task::{build_loader, Task};
use crate::Result;

/// Predictions for a whole dataset plus the RMS loss against its labels
#[derive(Debug, Clone, Serialize)]
pub struct PredictionReport<P> {
    pub predictions: P,
    /// `sqrt(mean(batch losses))`
    pub loss: f64,
    pub batches: usize,
}

impl<P: Serialize> PredictionReport<P> {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Runs a trained model in evaluation mode.
///
/// The model lives on a plain (non-autodiff) backend, so dropout is inactive
/// and no gradients are tracked.
pub struct Predictor<B: Backend, T: Task, M: TaskModel<B, T>> {
    task: T,
    model: M,
    loss_fn: LossFunction,
    device: B::Device,
}

impl<B, T, M> Predictor<B, T, M>
where
    B: Backend,
    T: Task,
    M: TaskModel<B, T>,
{
    pub fn new(task: T, model: M, device: B::Device) -> Self {
        Predictor {
            loss_fn: task.loss(),
            task,
            model,
            device,
        }
    }

    /// Forward every batch, scoring and accumulating in traversal order
    pub fn predict(
        &self,
        batches: impl Iterator<Item = T::Batch<B>>,
    ) -> Result<PredictionReport<T::Predictions>> {
        let mut predictions = T::Predictions::default();
        let mut metrics = EpochMetrics::new();

        for batch in batches {
            let output = self.model.forward_batch(&batch);
            let loss = self
                .loss_fn
                .forward(output.clone(), T::labels::<B>(&batch));
            metrics.update(loss.into_scalar().elem::<f64>());
            self.task.accumulate::<B>(&mut predictions, &batch, output)?;
        }

        let loss = metrics.loss()?;
        log::info!(
            "Predicted {} batches ({}), loss {}",
            metrics.batch_count(),
            self.task.kind(),
            loss
        );

        Ok(PredictionReport {
            predictions,
            loss,
            batches: metrics.batch_count(),
        })
    }

    /// Predict over `dataset` in its stored order
    pub fn predict_dataset<D>(
        &self,
        dataset: D,
        workers: usize,
    ) -> Result<PredictionReport<T::Predictions>>
    where
        D: Dataset<T::Sample> + 'static,
    {
        let loader =
            build_loader::<B, T, D>(&self.task, self.device.clone(), dataset, workers, None);
        self.predict(loader.iter())
    }
}
