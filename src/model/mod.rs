//! Network architectures and checkpoint loading
//!
//! - ForkNet: galaxy + PSF convolutional regressor for shape estimation
//! - CaliNet: MLP for the calibration task

pub mod cali_net;
pub mod fork_net;
pub mod loader;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::training::task::Task;

pub use cali_net::{CaliNet, CaliNetConfig};
pub use fork_net::{ForkNet, ForkNetConfig};
pub use loader::{load_model, save_model};

/// Builds a fresh, randomly initialised module on a device
pub trait Architecture<B: Backend> {
    type Model: Module<B>;

    fn init(&self, device: &B::Device) -> Self::Model;
}

/// Forward computation a trainer needs from a model: one output row per
/// batch row, same width as the batch labels
pub trait TaskModel<B: Backend, T: Task>: Module<B> {
    fn forward_batch(&self, batch: &T::Batch<B>) -> Tensor<B, 2>;
}
