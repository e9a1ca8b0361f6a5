//! Training loop shared by both tasks

use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use std::sync::Arc;

use crate::compute::ComputeContext;
use crate::data::split::{batch_count, DataSplit};
use crate::model::TaskModel;
use crate::training::checkpoint::CheckpointManager;
use crate::training::loss::LossFunction;
use crate::training::metrics::{EpochMetrics, EpochTime, LossHistory};
use crate::training::scheduler::ReduceLrOnPlateau;
use crate::training::task::{build_loader, Task};
use crate::{GalshapeError, Monitor, Result, TrainConfig};

/// Fixed-length epoch loop: train, validate, step the scheduler, checkpoint
pub struct Trainer<B, T, M, O>
where
    B: AutodiffBackend,
    T: Task,
    M: AutodiffModule<B> + TaskModel<B, T>,
    O: Optimizer<M, B>,
{
    task: T,
    model: M,
    optimizer: O,
    loss_fn: LossFunction,
    scheduler: ReduceLrOnPlateau,
    context: ComputeContext<B>,
    config: TrainConfig,
}

impl<B, T, M, O> Trainer<B, T, M, O>
where
    B: AutodiffBackend,
    T: Task,
    M: AutodiffModule<B> + TaskModel<B, T>,
    M::InnerModule: TaskModel<B::InnerBackend, T>,
    O: Optimizer<M, B>,
{
    pub fn new(
        task: T,
        model: M,
        optimizer: O,
        context: ComputeContext<B>,
        config: TrainConfig,
    ) -> Self {
        let scheduler =
            ReduceLrOnPlateau::from_config(config.initial_learning_rate, &config.scheduler);

        Trainer {
            loss_fn: task.loss(),
            task,
            model,
            optimizer,
            scheduler,
            context,
            config,
        }
    }

    /// Split `dataset`, train for `epoch_number` epochs and return the losses.
    ///
    /// The model is expected on the context's primary device already, as
    /// [`load_model`](crate::model::load_model) leaves it.
    pub fn run<D>(&mut self, dataset: Arc<D>) -> Result<LossHistory>
    where
        D: Dataset<T::Sample> + 'static,
    {
        let split = DataSplit::new(dataset.len(), self.config.validation_split)?;
        self.task.check_split(&split)?;
        if split.train_len() == 0 || split.valid_len() == 0 {
            return Err(GalshapeError::Training(format!(
                "empty subset: {} training and {} validation samples",
                split.train_len(),
                split.valid_len()
            )));
        }
        let (train_set, valid_set) = split.apply(dataset);

        let device = self.context.device().clone();
        let shuffle = self.task.shuffle();
        let train_loader = build_loader::<B, T, _>(
            &self.task,
            device.clone(),
            train_set,
            self.config.workers,
            shuffle,
        );
        let valid_loader = build_loader::<B::InnerBackend, T, _>(
            &self.task,
            device,
            valid_set,
            self.config.workers,
            shuffle,
        );

        let batch_size = self.task.batch_size();
        log::info!(
            "Train batches: {} Validation batches: {}",
            batch_count(split.train_len(), batch_size),
            batch_count(split.valid_len(), batch_size)
        );

        let mut checkpoints = self
            .config
            .save_model
            .then(|| CheckpointManager::from_config(&self.config));
        let monitor = self.config.monitor();
        let mut history = LossHistory::new();

        log::info!("Begin training ...");

        for epoch in 0..self.config.epoch_number {
            let train_loss = self.train_epoch(epoch, train_loader.iter())?;
            let valid_loss = self.valid_epoch(epoch, valid_loader.iter())?;

            let metric = match monitor {
                Monitor::TrainLoss => train_loss,
                Monitor::ValidLoss => valid_loss,
            };
            let lr = self.scheduler.step(metric);
            log::debug!(
                "Next learning rate {:e} (best monitored loss {})",
                lr,
                self.scheduler.best()
            );
            history.record_epoch(train_loss, valid_loss);

            if let Some(manager) = checkpoints.as_mut() {
                manager.save(&self.model, epoch, &history)?;
            }
        }

        if let Some(manager) = &checkpoints {
            let path = manager.loss_history_path();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            history.write_fits(&path)?;
            log::info!("Loss history written to {}", path.display());
        }

        log::info!("Finish training !");
        Ok(history)
    }

    /// One pass over the training loader; returns `sqrt(mean(batch losses))`
    fn train_epoch(
        &mut self,
        epoch: usize,
        loader: impl Iterator<Item = T::Batch<B>>,
    ) -> Result<f64> {
        let mut metrics = EpochMetrics::new();
        let lr = self.scheduler.lr();

        for batch in loader {
            let output = self.model.forward_batch(&batch);
            let labels = self.context.place(T::labels::<B>(&batch));
            let loss = self.loss_fn.forward(output, labels);
            metrics.update(loss.clone().into_scalar().elem::<f64>());

            // Step on the root loss; the recorded value stays squared
            let grads = loss.sqrt().backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(lr, self.model.clone(), grads);
        }

        let epoch_loss = metrics.loss()?;
        if self.config.show_log {
            log::info!(
                "[TRAIN] Epoch: {} Loss: {} Time: {}",
                epoch + 1,
                epoch_loss,
                EpochTime(metrics.elapsed())
            );
        }
        Ok(epoch_loss)
    }

    /// One pass over the validation loader without gradients or dropout
    fn valid_epoch(
        &self,
        epoch: usize,
        loader: impl Iterator<Item = T::Batch<B::InnerBackend>>,
    ) -> Result<f64> {
        let mut metrics = EpochMetrics::new();
        let model = self.model.valid();

        for batch in loader {
            let output = model.forward_batch(&batch);
            let loss = self
                .loss_fn
                .forward(output, T::labels::<B::InnerBackend>(&batch));
            metrics.update(loss.into_scalar().elem::<f64>());
        }

        let epoch_loss = metrics.loss()?;
        if self.config.show_log {
            log::info!(
                "[VALID] Epoch: {} Loss: {} Time: {}",
                epoch + 1,
                epoch_loss,
                EpochTime(metrics.elapsed())
            );
        }
        Ok(epoch_loss)
    }

    /// Learning rate the next epoch will use
    pub fn learning_rate(&self) -> f64 {
        self.scheduler.lr()
    }

    pub fn into_model(self) -> M {
        self.model
    }
}
