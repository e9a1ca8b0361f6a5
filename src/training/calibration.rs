//! Calibration regression scored on per-case means of noisy realisations

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::compute::ComputeContext;
use crate::data::calibration::{CalibrationDataset, CalibrationSample};
use crate::model::{load_model, CaliNet, CaliNetConfig};
use crate::training::loss::LossFunction;
use crate::training::metrics::LossHistory;
use crate::training::task::{tensor_rows, Task};
use crate::training::trainer::Trainer;
use crate::{Config, GmsbWarning, Result, TaskKind, TrainConfig};

#[derive(Debug, Clone)]
pub struct CalibrationTask {
    real_size: usize,
    batch_cases: usize,
    input_dim: usize,
    label_dim: usize,
    warning: GmsbWarning,
}

impl CalibrationTask {
    pub fn new(
        real_size: usize,
        batch_cases: usize,
        input_dim: usize,
        label_dim: usize,
        warning: GmsbWarning,
    ) -> Self {
        CalibrationTask {
            real_size,
            batch_cases,
            input_dim,
            label_dim,
            warning,
        }
    }

    /// `real_size` is taken from the dataset before any splitting
    pub fn from_config(config: &TrainConfig, dataset: &CalibrationDataset) -> Self {
        Self::new(
            dataset.real_size(),
            config.batch_cases,
            dataset.input_dim(),
            dataset.label_dim(),
            config.gmsb_warning,
        )
    }

    pub fn real_size(&self) -> usize {
        self.real_size
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationBatch<B: Backend> {
    /// [cases * real_size, input_dim]
    pub input: Tensor<B, 2>,
    /// [cases * real_size, label_dim]
    pub label: Tensor<B, 2>,
}

/// Per-case means in traversal order
#[derive(Debug, Clone, Default, Serialize)]
pub struct CalibrationPredictions {
    pub predicted: Vec<f32>,
    pub truth: Vec<f32>,
}

impl CalibrationPredictions {
    pub fn len(&self) -> usize {
        self.predicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicted.is_empty()
    }
}

impl Task for CalibrationTask {
    type Sample = CalibrationSample;
    type Batch<B: Backend> = CalibrationBatch<B>;
    type Predictions = CalibrationPredictions;

    fn kind(&self) -> TaskKind {
        TaskKind::Calibration
    }

    fn collate<B: Backend>(
        &self,
        items: Vec<CalibrationSample>,
        device: &B::Device,
    ) -> CalibrationBatch<B> {
        let rows = items.len();
        let mut input_data = Vec::with_capacity(rows * self.input_dim);
        let mut label_data = Vec::with_capacity(rows * self.label_dim);

        for sample in &items {
            input_data.extend_from_slice(&sample.input);
            label_data.extend_from_slice(&sample.label);
        }

        CalibrationBatch {
            input: Tensor::<B, 1>::from_floats(input_data.as_slice(), device)
                .reshape([rows, self.input_dim]),
            label: Tensor::<B, 1>::from_floats(label_data.as_slice(), device)
                .reshape([rows, self.label_dim]),
        }
    }

    fn labels<B: Backend>(batch: &CalibrationBatch<B>) -> Tensor<B, 2> {
        batch.label.clone()
    }

    fn loss(&self) -> LossFunction {
        LossFunction::group_mean_squared_bias(self.real_size, self.warning)
    }

    /// Whole cases only: `batch_cases` groups of `real_size` rows
    fn batch_size(&self) -> usize {
        self.batch_cases * self.real_size
    }

    fn shuffle(&self) -> Option<u64> {
        None
    }

    fn group_size(&self) -> usize {
        self.real_size
    }

    fn accumulate<B: Backend>(
        &self,
        predictions: &mut CalibrationPredictions,
        batch: &CalibrationBatch<B>,
        output: Tensor<B, 2>,
    ) -> Result<()> {
        predictions
            .predicted
            .extend(self.case_means(output)?);
        predictions
            .truth
            .extend(self.case_means(batch.label.clone())?);
        Ok(())
    }
}

impl CalibrationTask {
    fn case_means<B: Backend>(&self, values: Tensor<B, 2>) -> Result<Vec<f32>> {
        let numel = values.shape().num_elements();
        let grouped = values.reshape([numel / self.real_size, self.real_size]);
        let means = tensor_rows(grouped.mean_dim(1))?;
        Ok(means.into_iter().flatten().collect())
    }
}

/// Adam with the configured betas
pub fn optimizer<B, M>(config: &TrainConfig) -> OptimizerAdaptor<Adam, M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let (beta_1, beta_2) = config.adam_betas;
    AdamConfig::new()
        .with_beta_1(beta_1)
        .with_beta_2(beta_2)
        .init()
}

pub fn architecture(config: &Config, dataset: &CalibrationDataset) -> CaliNetConfig {
    CaliNetConfig {
        input_dim: dataset.input_dim(),
        output_dim: dataset.label_dim(),
        hidden: config.model.hidden,
        dropout: config.model.dropout,
    }
}

/// Train a CaliNet on `dataset`, optionally starting from a checkpoint
pub fn train<B: AutodiffBackend>(
    config: &Config,
    dataset: CalibrationDataset,
    context: ComputeContext<B>,
    resume: Option<&Path>,
) -> Result<(CaliNet<B>, LossHistory)> {
    let task = CalibrationTask::from_config(&config.train, &dataset);
    let model = load_model(&architecture(config, &dataset), &context, resume, true)?;
    let optimizer = optimizer::<B, CaliNet<B>>(&config.train);

    let mut trainer = Trainer::new(task, model, optimizer, context, config.train.clone());
    let history = trainer.run(Arc::new(dataset))?;
    Ok((trainer.into_model(), history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::split::DataSplit;
    use crate::predict::Predictor;
    use crate::training::scheduler::ReduceLrOnPlateau;
    use crate::training::task::build_loader;
    use crate::{GalshapeError, Monitor};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    /// `cases` groups of `real_size` rows; every row of a case shares its label
    fn dataset(cases: usize, real_size: usize) -> CalibrationDataset {
        let samples = (0..cases * real_size)
            .map(|row| {
                let case = row / real_size;
                CalibrationSample {
                    input: vec![case as f32 * 0.1, (row % real_size) as f32 * 0.01, 1.0],
                    label: vec![case as f32 * 0.2],
                }
            })
            .collect();
        CalibrationDataset::new(samples, real_size).unwrap()
    }

    fn small_config(dir: &Path, epochs: usize) -> Config {
        let mut config = Config::default();
        config.train.task = TaskKind::Calibration;
        config.train.epoch_number = epochs;
        config.train.initial_learning_rate = 0.001;
        config.train.batch_cases = 2;
        config.train.validation_split = 0.2;
        config.train.workers = 0;
        config.train.show_log = false;
        config.train.model_path = format!("{}/", dir.display());
        config.train.model_name = "cali".to_string();
        config.model.hidden = 8;
        config.model.dropout = 0.0;
        config
    }

    #[test]
    fn test_batch_holds_whole_cases() {
        let task = CalibrationTask::new(5, 3, 3, 1, GmsbWarning::NonzeroStd);
        assert_eq!(task.batch_size(), 15);
        assert_eq!(task.shuffle(), None);
        assert_eq!(
            task.loss(),
            LossFunction::GroupMeanSquaredBias {
                group_size: 5,
                warning: GmsbWarning::NonzeroStd
            }
        );
    }

    #[test]
    fn test_misaligned_split_is_config_error() {
        let task = CalibrationTask::new(4, 1, 3, 1, GmsbWarning::NonzeroStd);
        // 10 cases of 4 rows, 15% validation = 6 rows
        let split = DataSplit::new(40, 0.15).unwrap();
        assert!(matches!(
            task.check_split(&split),
            Err(GalshapeError::Config(_))
        ));
        assert!(task.check_split(&DataSplit::new(40, 0.1).unwrap()).is_ok());
    }

    #[test]
    fn test_train_monitors_validation_loss() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path(), 2);
        assert_eq!(config.train.monitor(), Monitor::ValidLoss);

        let context = ComputeContext::<TestAutodiffBackend>::single(Default::default());
        // 10 cases of 3: 2 validation cases, 8 training cases
        let (_, history) = train(&config, dataset(10, 3), context, None).unwrap();

        assert_eq!(history.len(), 2);
        assert!(history.valid.iter().all(|loss| loss.is_finite()));
        assert!(dir.path().join("cali0.mpk").exists());
        assert!(dir.path().join("cali1.mpk").exists());
        assert!(dir.path().join("training_loss.fits").exists());
    }

    #[test]
    fn test_predictions_are_case_means() {
        let context = ComputeContext::<TestBackend>::single(Default::default());
        let config = small_config(Path::new("."), 1);
        let data = dataset(5, 4);
        let model = load_model(&architecture(&config, &data), &context, None, true).unwrap();
        let task = CalibrationTask::from_config(&config.train, &data);

        let device = context.device().clone();
        let loader = build_loader::<TestBackend, _, _>(&task, device.clone(), data, 0, None);
        let predictor = Predictor::new(task, model, device);
        let report = predictor.predict(loader.iter()).unwrap();

        // batches of 2 cases: {2, 2, 1}
        assert_eq!(report.batches, 3);
        assert_eq!(report.predictions.len(), 5);
        for (case, truth) in report.predictions.truth.iter().enumerate() {
            assert!((truth - case as f32 * 0.2).abs() < 1e-6);
        }
    }

    #[test]
    fn test_workers_keep_whole_cases() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path(), 1);
        config.train.workers = 3;
        let context = ComputeContext::<TestAutodiffBackend>::single(Default::default());

        let (_, history) = train(&config, dataset(10, 3), context, None).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_predict_with_workers_on_uneven_cases() {
        let context = ComputeContext::<TestBackend>::single(Default::default());
        let config = small_config(Path::new("."), 1);
        // 9 cases of 4 rows do not divide across 4 workers
        let data = dataset(9, 4);
        let model = load_model(&architecture(&config, &data), &context, None, true).unwrap();
        let task = CalibrationTask::from_config(&config.train, &data);

        let predictor = Predictor::new(task, model, context.device().clone());
        let report = predictor.predict_dataset(data, 4).unwrap();

        assert_eq!(report.batches, 5);
        assert_eq!(report.predictions.len(), 9);
        for (case, truth) in report.predictions.truth.iter().enumerate() {
            assert!((truth - case as f32 * 0.2).abs() < 1e-6);
        }
    }

    #[test]
    fn test_scheduler_follows_monitored_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path(), 3);
        config.train.save_model = false;
        // a negligible step leaves every epoch on a plateau
        config.train.initial_learning_rate = 1e-20;
        config.train.scheduler.patience = 0;
        config.train.scheduler.factor = 0.5;
        config.train.scheduler.eps = 0.0;

        let context = ComputeContext::<TestAutodiffBackend>::single(Default::default());
        let data = dataset(10, 3);
        let task = CalibrationTask::from_config(&config.train, &data);
        let model = load_model(&architecture(&config, &data), &context, None, true).unwrap();
        let optimizer = optimizer::<TestAutodiffBackend, CaliNet<TestAutodiffBackend>>(&config.train);

        let mut trainer = Trainer::new(task, model, optimizer, context, config.train.clone());
        let history = trainer.run(Arc::new(data)).unwrap();

        let mut replay = ReduceLrOnPlateau::from_config(1e-20, &config.train.scheduler);
        for &loss in history.monitored(Monitor::ValidLoss) {
            replay.step(loss);
        }
        assert_eq!(trainer.learning_rate(), replay.lr());
        assert!((trainer.learning_rate() / 1e-20 - 0.25).abs() < 1e-9);
    }
}
