//! Multilayer perceptron for the calibration task
//!
//! Architecture: Input(D) → Hidden(h) → ReLU → Dropout → Hidden(h/2) → ReLU → Output(K)

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::{Architecture, TaskModel};
use crate::training::calibration::{CalibrationBatch, CalibrationTask};

#[derive(Debug, Clone)]
pub struct CaliNetConfig {
    /// Width of one calibration row
    pub input_dim: usize,
    pub output_dim: usize,
    pub hidden: usize,
    pub dropout: f64,
}

impl Default for CaliNetConfig {
    fn default() -> Self {
        CaliNetConfig {
            input_dim: 4,
            output_dim: 1,
            hidden: 128,
            dropout: 0.1,
        }
    }
}

#[derive(Module, Debug)]
pub struct CaliNet<B: Backend> {
    hidden1: Linear<B>,
    dropout: Dropout,
    hidden2: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> CaliNet<B> {
    pub fn new(device: &B::Device, config: CaliNetConfig) -> Self {
        let half = (config.hidden / 2).max(1);
        CaliNet {
            hidden1: LinearConfig::new(config.input_dim, config.hidden).init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
            hidden2: LinearConfig::new(config.hidden, half).init(device),
            output: LinearConfig::new(half, config.output_dim).init(device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.hidden1.forward(input));
        let x = self.dropout.forward(x);
        let x = relu(self.hidden2.forward(x));
        self.output.forward(x)
    }
}

impl<B: Backend> Architecture<B> for CaliNetConfig {
    type Model = CaliNet<B>;

    fn init(&self, device: &B::Device) -> CaliNet<B> {
        CaliNet::new(device, self.clone())
    }
}

impl<B: Backend> TaskModel<B, CalibrationTask> for CaliNet<B> {
    fn forward_batch(&self, batch: &CalibrationBatch<B>) -> Tensor<B, 2> {
        self.forward(batch.input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let config = CaliNetConfig {
            input_dim: 6,
            output_dim: 2,
            hidden: 8,
            dropout: 0.0,
        };
        let model = CaliNet::<TestBackend>::new(&device, config);

        let input = Tensor::<TestBackend, 2>::ones([10, 6], &device);
        assert_eq!(model.forward(input).dims(), [10, 2]);
    }
}
