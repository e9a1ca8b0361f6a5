//! Two-branch convolutional regressor over galaxy and PSF stamps
//!
//! Architecture:
//!   galaxy [b,1,H,W] → Conv3x3 → ReLU → MaxPool2 → Conv3x3 → ReLU → AdaptiveAvg(4x4) ─┐
//!   psf    [b,1,h,w] → Conv3x3 → ReLU → AdaptiveAvg(4x4) ─────────────────────────────┤
//!                                              concat → Linear → ReLU → Dropout → Linear(F)

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::{Architecture, TaskModel};
use crate::training::shape::{ShapeBatch, ShapeTask};

/// Side of the pooled feature map each branch flattens
const POOLED: usize = 4;

#[derive(Debug, Clone)]
pub struct ForkNetConfig {
    /// Number of regressed shape parameters
    pub features: usize,
    /// Convolution channels per branch
    pub channels: usize,
    pub hidden: usize,
    pub dropout: f64,
}

impl Default for ForkNetConfig {
    fn default() -> Self {
        ForkNetConfig {
            features: 4,
            channels: 16,
            hidden: 128,
            dropout: 0.1,
        }
    }
}

#[derive(Module, Debug)]
pub struct ForkNet<B: Backend> {
    gal_conv1: Conv2d<B>,
    gal_conv2: Conv2d<B>,
    gal_pool: MaxPool2d,
    psf_conv: Conv2d<B>,
    adaptive: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,
}

impl<B: Backend> ForkNet<B> {
    pub fn new(device: &B::Device, config: ForkNetConfig) -> Self {
        let conv = |in_channels: usize, out_channels: usize| -> Conv2d<B> {
            Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };

        ForkNet {
            gal_conv1: conv(1, config.channels),
            gal_conv2: conv(config.channels, config.channels),
            gal_pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            psf_conv: conv(1, config.channels),
            adaptive: AdaptiveAvgPool2dConfig::new([POOLED, POOLED]).init(),
            fc1: LinearConfig::new(2 * config.channels * POOLED * POOLED, config.hidden)
                .init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
            fc2: LinearConfig::new(config.hidden, config.features).init(device),
        }
    }

    /// Galaxy stamps need at least 2x2 pixels for the max-pool
    pub fn forward(&self, galaxy: Tensor<B, 4>, psf: Tensor<B, 4>) -> Tensor<B, 2> {
        let g = relu(self.gal_conv1.forward(galaxy));
        let g = self.gal_pool.forward(g);
        let g = relu(self.gal_conv2.forward(g));
        let g = self.adaptive.forward(g).flatten::<2>(1, 3);

        let p = relu(self.psf_conv.forward(psf));
        let p = self.adaptive.forward(p).flatten::<2>(1, 3);

        let x = Tensor::cat(vec![g, p], 1);
        let x = relu(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}

impl<B: Backend> Architecture<B> for ForkNetConfig {
    type Model = ForkNet<B>;

    fn init(&self, device: &B::Device) -> ForkNet<B> {
        ForkNet::new(device, self.clone())
    }
}

impl<B: Backend> TaskModel<B, ShapeTask> for ForkNet<B> {
    fn forward_batch(&self, batch: &ShapeBatch<B>) -> Tensor<B, 2> {
        self.forward(batch.gal_image.clone(), batch.psf_image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let config = ForkNetConfig {
            features: 3,
            channels: 4,
            hidden: 16,
            dropout: 0.0,
        };
        let model = ForkNet::<TestBackend>::new(&device, config);

        let galaxy = Tensor::random([5, 1, 12, 12], Distribution::Normal(0.0, 1.0), &device);
        let psf = Tensor::random([5, 1, 6, 6], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(model.forward(galaxy, psf).dims(), [5, 3]);
    }

    #[test]
    fn test_small_stamps() {
        let device = Default::default();
        let model = ForkNet::<TestBackend>::new(&device, ForkNetConfig::default());

        let galaxy = Tensor::zeros([2, 1, 4, 4], &device);
        let psf = Tensor::zeros([2, 1, 2, 2], &device);

        assert_eq!(model.forward(galaxy, psf).dims(), [2, 4]);
    }
}
