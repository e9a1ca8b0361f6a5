//! What varies between the two training problems
//!
//! A [`Task`] decides how samples become batches, which loss scores a batch,
//! how loaders are sized and ordered, and how model outputs accumulate into
//! predictions. The trainer and predictor are written once against it.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;

use crate::data::split::DataSplit;
use crate::training::loss::LossFunction;
use crate::{GalshapeError, Result, TaskKind};

pub trait Task: Clone + Send + Sync + 'static {
    type Sample: Clone + Send + Sync + Debug + 'static;
    type Batch<B: Backend>: Clone + Send + Debug + 'static;
    type Predictions: Default + Debug + Serialize;

    fn kind(&self) -> TaskKind;

    /// Stack samples into tensors on `device`
    fn collate<B: Backend>(&self, items: Vec<Self::Sample>, device: &B::Device) -> Self::Batch<B>;

    /// Targets for the batch, one row per sample
    fn labels<B: Backend>(batch: &Self::Batch<B>) -> Tensor<B, 2>;

    fn loss(&self) -> LossFunction;

    /// Samples per batch
    fn batch_size(&self) -> usize;

    /// Seed for per-epoch reshuffling; `None` keeps dataset order
    fn shuffle(&self) -> Option<u64>;

    /// Consecutive samples that must share a batch; batch sizes and split
    /// boundaries are multiples of it
    fn group_size(&self) -> usize {
        1
    }

    /// Reject splits the task cannot batch
    fn check_split(&self, split: &DataSplit) -> Result<()> {
        match self.group_size() {
            1 => Ok(()),
            group => split.check_aligned(group),
        }
    }

    /// Append one batch's outputs to the running predictions
    fn accumulate<B: Backend>(
        &self,
        predictions: &mut Self::Predictions,
        batch: &Self::Batch<B>,
        output: Tensor<B, 2>,
    ) -> Result<()>;
}

/// Adapts a task's collate step to burn's data loader
#[derive(Clone)]
pub struct TaskBatcher<B: Backend, T: Task> {
    task: T,
    device: B::Device,
}

impl<B: Backend, T: Task> TaskBatcher<B, T> {
    pub fn new(task: T, device: B::Device) -> Self {
        TaskBatcher { task, device }
    }
}

impl<B: Backend, T: Task> Batcher<B, T::Sample, T::Batch<B>> for TaskBatcher<B, T> {
    fn batch(&self, items: Vec<T::Sample>, _device: &B::Device) -> T::Batch<B> {
        self.task.collate::<B>(items, &self.device)
    }
}

/// Loader over `dataset` with the task's batch size; reshuffled every pass
/// when `shuffle` carries a seed.
///
/// Worker threads each take a contiguous `len / workers` slice of the
/// dataset, which cuts through groups, so grouped tasks load on the calling
/// thread.
pub fn build_loader<B, T, D>(
    task: &T,
    device: B::Device,
    dataset: D,
    workers: usize,
    shuffle: Option<u64>,
) -> Arc<dyn DataLoader<B, T::Batch<B>>>
where
    B: Backend,
    T: Task,
    D: Dataset<T::Sample> + 'static,
{
    let batcher = TaskBatcher::<B, T>::new(task.clone(), device);
    let mut builder = DataLoaderBuilder::new(batcher).batch_size(task.batch_size());
    if let Some(seed) = shuffle {
        builder = builder.shuffle(seed);
    }
    if workers > 0 {
        if task.group_size() > 1 {
            log::debug!(
                "Ignoring {} workers to keep groups of {} samples in one batch",
                workers,
                task.group_size()
            );
        } else {
            builder = builder.num_workers(workers);
        }
    }
    builder.build(dataset)
}

/// Flatten a 2-D tensor into rows of `f32`
pub fn tensor_rows<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, cols] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| GalshapeError::Training(format!("tensor readback failed: {:?}", e)))?;
    Ok(values.chunks(cols.max(1)).map(|row| row.to_vec()).collect())
}
