//! Loss functions for the two training tasks

use burn::nn::loss::{MseLoss, Reduction};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use crate::GmsbWarning;

/// Scalar loss between a model output and its targets
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossFunction {
    /// Mean of squared elementwise differences
    Mse,
    /// Group-mean squared bias: squared difference of per-group means,
    /// averaged over groups of `group_size` consecutive values
    GroupMeanSquaredBias {
        group_size: usize,
        warning: GmsbWarning,
    },
}

impl LossFunction {
    pub fn group_mean_squared_bias(group_size: usize, warning: GmsbWarning) -> Self {
        LossFunction::GroupMeanSquaredBias {
            group_size,
            warning,
        }
    }

    /// Compute the loss; both tensors must have the same shape
    pub fn forward<B: Backend>(&self, output: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
        match *self {
            LossFunction::Mse => MseLoss::new().forward(output, target, Reduction::Mean),
            LossFunction::GroupMeanSquaredBias {
                group_size,
                warning,
            } => {
                let output = group(output, group_size);
                let target = group(target, group_size);
                self.check_targets(&target, warning);

                let bias = output.mean_dim(1) - target.mean_dim(1);
                bias.powf_scalar(2.0).mean()
            }
        }
    }

    fn check_targets<B: Backend>(&self, target: &Tensor<B, 2>, warning: GmsbWarning) {
        if should_warn(target, warning) {
            log::warn!("Target values vary within a calibration group");
        }
    }
}

/// Whether a grouped target triggers the constant-target warning
fn should_warn<B: Backend>(target: &Tensor<B, 2>, warning: GmsbWarning) -> bool {
    match warning {
        GmsbWarning::Always => true,
        GmsbWarning::NonzeroStd => target_spread(target),
    }
}

/// True when any row of `(groups, group_size)` targets has nonzero variance
fn target_spread<B: Backend>(target: &Tensor<B, 2>) -> bool {
    let centered = target.clone() - target.clone().mean_dim(1);
    let variance: f64 = centered
        .powf_scalar(2.0)
        .mean_dim(1)
        .max()
        .into_scalar()
        .elem();
    variance > 0.0
}

/// Reshape to `(numel / group_size, group_size)`
fn group<B: Backend>(tensor: Tensor<B, 2>, group_size: usize) -> Tensor<B, 2> {
    let numel = tensor.shape().num_elements();
    tensor.reshape([numel / group_size.max(1), group_size.max(1)])
}

/// Epoch aggregate: square root of the mean batch loss
pub fn rms(losses: &[f64]) -> Option<f64> {
    if losses.is_empty() {
        return None;
    }
    Some((losses.iter().sum::<f64>() / losses.len() as f64).sqrt())
}
