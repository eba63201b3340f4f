pub mod config;
pub mod core;
pub mod dataset;
pub mod error;
pub mod models;
pub mod prelude;
pub mod scheduler;
pub mod tensor;

// Re-export types
pub use crate::core::{
    Activation, ConvLayer, FullyConnectedLayer, LayerTrait, Loss, MapLayer, MapShape, OptimizerConfig, PoolLayer,
    ProcessLayer, SerializeLayer,
};
pub use config::{LayerConfig, NetworkConfig, TrainingConfig};
pub use dataset::{Dataset, InMemoryDataset, Sample};
pub use error::{NNError, Result};
pub use models::Pipeline;
pub use scheduler::{CancellationToken, Scheduler, TaskQueue};
pub use tensor::{Fill, Matrix, Vector};
