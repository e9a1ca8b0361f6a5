//! Per-sample shape regression: galaxy + PSF stamps in, shape parameters out

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{Sgd, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::compute::ComputeContext;
use crate::data::shape::{ShapeDataset, ShapeSample};
use crate::model::{load_model, ForkNet, ForkNetConfig};
use crate::training::loss::LossFunction;
use crate::training::metrics::LossHistory;
use crate::training::task::{tensor_rows, Task};
use crate::training::trainer::Trainer;
use crate::{Config, GalshapeError, Result, TaskKind, TrainConfig};

#[derive(Debug, Clone)]
pub struct ShapeTask {
    batch_size: usize,
    galaxy_stamp: usize,
    psf_stamp: usize,
    features: usize,
    seed: u64,
}

impl ShapeTask {
    pub fn new(
        batch_size: usize,
        galaxy_stamp: usize,
        psf_stamp: usize,
        features: usize,
        seed: u64,
    ) -> Self {
        ShapeTask {
            batch_size,
            galaxy_stamp,
            psf_stamp,
            features,
            seed,
        }
    }

    /// Task matching `dataset`; its label width must equal `feature_number`
    pub fn from_config(config: &TrainConfig, dataset: &ShapeDataset) -> Result<Self> {
        if dataset.features() != config.feature_number {
            return Err(GalshapeError::Config(format!(
                "feature_number = {} but labels have {} columns",
                config.feature_number,
                dataset.features()
            )));
        }

        let seed = config.seed.unwrap_or_else(rand::random);
        log::debug!("Shuffle seed: {}", seed);

        Ok(Self::new(
            config.batch_size,
            dataset.galaxy_stamp(),
            dataset.psf_stamp(),
            dataset.features(),
            seed,
        ))
    }
}

/// Stacked galaxy samples
#[derive(Debug, Clone)]
pub struct ShapeBatch<B: Backend> {
    /// [batch, 1, stamp, stamp]
    pub gal_image: Tensor<B, 4>,
    /// [batch, 1, psf_stamp, psf_stamp]
    pub psf_image: Tensor<B, 4>,
    /// [batch, features]
    pub label: Tensor<B, 2>,
    pub id: Vec<i64>,
    pub snr: Vec<f32>,
}

/// Outputs gathered over a dataset, rows in batch traversal order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShapePredictions {
    pub ids: Vec<i64>,
    pub predicted: Vec<Vec<f32>>,
    pub truth: Vec<Vec<f32>>,
    pub snr: Vec<f32>,
}

impl ShapePredictions {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `[id, predicted...]` per row
    pub fn combined_pred(&self) -> Vec<Vec<f64>> {
        prefix_ids(&self.ids, &self.predicted)
    }

    /// `[id, truth...]` per row
    pub fn combined_true(&self) -> Vec<Vec<f64>> {
        prefix_ids(&self.ids, &self.truth)
    }

    /// `[id, snr]` per row
    pub fn combined_snr(&self) -> Vec<Vec<f64>> {
        self.ids
            .iter()
            .zip(&self.snr)
            .map(|(&id, &snr)| vec![id as f64, snr as f64])
            .collect()
    }
}

fn prefix_ids(ids: &[i64], rows: &[Vec<f32>]) -> Vec<Vec<f64>> {
    ids.iter()
        .zip(rows)
        .map(|(&id, row)| {
            std::iter::once(id as f64)
                .chain(row.iter().map(|&v| v as f64))
                .collect()
        })
        .collect()
}

impl Task for ShapeTask {
    type Sample = ShapeSample;
    type Batch<B: Backend> = ShapeBatch<B>;
    type Predictions = ShapePredictions;

    fn kind(&self) -> TaskKind {
        TaskKind::Shape
    }

    fn collate<B: Backend>(&self, items: Vec<ShapeSample>, device: &B::Device) -> ShapeBatch<B> {
        let batch_size = items.len();
        let gal_pixels = self.galaxy_stamp * self.galaxy_stamp;
        let psf_pixels = self.psf_stamp * self.psf_stamp;

        let mut gal_data = Vec::with_capacity(batch_size * gal_pixels);
        let mut psf_data = Vec::with_capacity(batch_size * psf_pixels);
        let mut label_data = Vec::with_capacity(batch_size * self.features);
        let mut id = Vec::with_capacity(batch_size);
        let mut snr = Vec::with_capacity(batch_size);

        for sample in &items {
            gal_data.extend_from_slice(&sample.gal_image);
            psf_data.extend_from_slice(&sample.psf_image);
            label_data.extend_from_slice(&sample.label);
            id.push(sample.id);
            snr.push(sample.snr);
        }

        let gal_image = Tensor::<B, 1>::from_floats(gal_data.as_slice(), device).reshape([
            batch_size,
            1,
            self.galaxy_stamp,
            self.galaxy_stamp,
        ]);
        let psf_image = Tensor::<B, 1>::from_floats(psf_data.as_slice(), device).reshape([
            batch_size,
            1,
            self.psf_stamp,
            self.psf_stamp,
        ]);
        let label = Tensor::<B, 1>::from_floats(label_data.as_slice(), device)
            .reshape([batch_size, self.features]);

        ShapeBatch {
            gal_image,
            psf_image,
            label,
            id,
            snr,
        }
    }

    fn labels<B: Backend>(batch: &ShapeBatch<B>) -> Tensor<B, 2> {
        batch.label.clone()
    }

    fn loss(&self) -> LossFunction {
        LossFunction::Mse
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn shuffle(&self) -> Option<u64> {
        Some(self.seed)
    }

    fn accumulate<B: Backend>(
        &self,
        predictions: &mut ShapePredictions,
        batch: &ShapeBatch<B>,
        output: Tensor<B, 2>,
    ) -> Result<()> {
        predictions.ids.extend_from_slice(&batch.id);
        predictions.predicted.extend(tensor_rows(output)?);
        predictions.truth.extend(tensor_rows(batch.label.clone())?);
        predictions.snr.extend_from_slice(&batch.snr);
        Ok(())
    }
}

/// SGD with momentum and no dampening
pub fn optimizer<B, M>(config: &TrainConfig) -> OptimizerAdaptor<Sgd<B::InnerBackend>, M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(config.momentum)
                .with_dampening(0.0),
        ))
        .init()
}

pub fn architecture(config: &Config) -> ForkNetConfig {
    ForkNetConfig {
        features: config.train.feature_number,
        channels: config.model.channels,
        hidden: config.model.hidden,
        dropout: config.model.dropout,
    }
}

/// Train a ForkNet on `dataset`, optionally starting from a checkpoint
pub fn train<B: AutodiffBackend>(
    config: &Config,
    dataset: ShapeDataset,
    context: ComputeContext<B>,
    resume: Option<&Path>,
) -> Result<(ForkNet<B>, LossHistory)> {
    let task = ShapeTask::from_config(&config.train, &dataset)?;
    let model = load_model(&architecture(config), &context, resume, true)?;
    let optimizer = optimizer::<B, ForkNet<B>>(&config.train);

    let mut trainer = Trainer::new(task, model, optimizer, context, config.train.clone());
    let history = trainer.run(Arc::new(dataset))?;
    Ok((trainer.into_model(), history))
}
