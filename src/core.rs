pub mod activations;
pub mod layers;
pub mod losses;
pub mod normalization;
pub mod optimizers;
pub mod padding;

pub use activations::Activation;
pub use layers::{
    ConvConfig, ConvLayer, ConvNode, DenseConfig, FullyConnectedLayer, LayerRole, LayerTrait, MapLayer, MapShape,
    PoolConfig, PoolKind, PoolLayer, ProcessConfig, ProcessLayer, SerializeConfig, SerializeLayer,
};
pub use losses::Loss;
pub use normalization::Normalization;
pub use optimizers::{apply_optimization, ClipValue, GradientClipConfig, Optimization, OptimizerConfig, Regularizer};
pub use padding::{pad, padded_extent, PadFill, PadPlacement, Padding};
