pub use log::{debug, error, info, trace, warn};
pub use ndarray::{Array1, Array2, NdFloat};
pub use rand::rngs::StdRng;
pub use rand::{Rng, SeedableRng};
pub use serde::{Deserialize, Serialize};

pub use crate::error::*;
pub use crate::tensor::{Fill, Matrix, Vector};

pub use crate::core::{
    apply_optimization, Activation, ClipValue, ConvConfig, ConvLayer, DenseConfig, FullyConnectedLayer,
    GradientClipConfig, LayerRole, LayerTrait, Loss, MapLayer, MapShape, Normalization, Optimization,
    OptimizerConfig, PadFill, PadPlacement, Padding, PoolConfig, PoolKind, PoolLayer, ProcessConfig,
    ProcessLayer, Regularizer, SerializeConfig, SerializeLayer,
};
pub use crate::models::{Pipeline, PipelineBuilder};
