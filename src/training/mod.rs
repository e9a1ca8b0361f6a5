//! Model training
//!
//! Training loop, loss functions, learning-rate schedule, checkpoints and
//! loss tracking, plus the two task strategies the loop is generic over.

pub mod calibration;
pub mod checkpoint;
pub mod loss;
pub mod metrics;
pub mod scheduler;
pub mod shape;
pub mod task;
pub mod trainer;

pub use checkpoint::CheckpointManager;
pub use loss::LossFunction;
pub use metrics::LossHistory;
pub use scheduler::ReduceLrOnPlateau;
pub use task::Task;
pub use trainer::Trainer;
