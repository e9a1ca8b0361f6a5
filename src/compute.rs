//! Device selection and placement
//!
//! The trainer never looks at device counts itself: it asks a
//! [`ComputeContext`] to place tensors and wrap modules.

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::{GalshapeError, Result};

/// Parsed `device` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    /// Accelerator ordinal of the primary device
    Gpu(usize),
}

impl DeviceSpec {
    /// Parse identifiers such as `cpu`, `gpu`, `gpu:1`, `cuda:0` or `wgpu:0`
    pub fn parse(identifier: &str) -> Result<Self> {
        let lower = identifier.trim().to_lowercase();
        let (kind, ordinal) = match lower.split_once(':') {
            Some((kind, ordinal)) => (kind, Some(ordinal)),
            None => (lower.as_str(), None),
        };

        match kind {
            "cpu" if ordinal.is_none() => Ok(DeviceSpec::Cpu),
            "gpu" | "cuda" | "wgpu" => {
                let index = match ordinal {
                    Some(o) => o.parse::<usize>().map_err(|_| {
                        GalshapeError::Config(format!("Invalid device ordinal in '{}'", identifier))
                    })?,
                    None => 0,
                };
                Ok(DeviceSpec::Gpu(index))
            }
            _ => Err(GalshapeError::Config(format!(
                "Unknown device '{}'. Use cpu, gpu, gpu:N or cuda:N.",
                identifier
            ))),
        }
    }

    /// Ordinals of the devices a run spans
    pub fn ordinals(&self, gpu_number: usize) -> Result<Vec<usize>> {
        match self {
            DeviceSpec::Cpu if gpu_number > 1 => Err(GalshapeError::Config(format!(
                "gpu_number = {} requires an accelerator device",
                gpu_number
            ))),
            DeviceSpec::Cpu => Ok(vec![0]),
            DeviceSpec::Gpu(first) => Ok((*first..*first + gpu_number.max(1)).collect()),
        }
    }
}

/// Devices a run executes on; the first one holds the module and the batches
#[derive(Debug, Clone)]
pub struct ComputeContext<B: Backend> {
    devices: Vec<B::Device>,
}

impl<B: Backend> ComputeContext<B> {
    pub fn new(devices: Vec<B::Device>) -> Result<Self> {
        if devices.is_empty() {
            return Err(GalshapeError::Config(
                "compute context needs at least one device".to_string(),
            ));
        }
        Ok(ComputeContext { devices })
    }

    /// Context for a single device
    pub fn single(device: B::Device) -> Self {
        ComputeContext {
            devices: vec![device],
        }
    }

    /// Primary device
    pub fn device(&self) -> &B::Device {
        &self.devices[0]
    }

    pub fn devices(&self) -> &[B::Device] {
        &self.devices
    }

    pub fn is_data_parallel(&self) -> bool {
        self.devices.len() > 1
    }

    /// Move a tensor onto the primary device
    pub fn place<const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        tensor.to_device(self.device())
    }

    /// Fork a module onto the primary device.
    ///
    /// With several devices the module stays replicated from the primary one;
    /// splitting batches across replicas and reducing gradients is the
    /// backend's job, so one forward+backward remains one unit here.
    pub fn wrap<M: Module<B>>(&self, model: M) -> M {
        if self.is_data_parallel() {
            log::info!(
                "Data-parallel execution over {} devices: {:?}",
                self.devices.len(),
                self.devices
            );
        }
        model.fork(self.device())
    }
}
