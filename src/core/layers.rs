use crate::prelude::*;

pub mod conv;
pub mod dense;
pub mod pool;
pub mod process;
pub mod serialize;

pub use conv::{ConvConfig, ConvLayer, ConvNode};
pub use dense::{DenseConfig, FullyConnectedLayer, LayerRole};
pub use pool::{PoolConfig, PoolKind, PoolLayer};
pub use process::{ProcessConfig, ProcessLayer};
pub use serialize::{SerializeConfig, SerializeLayer};

pub trait LayerTrait {
    fn typ(&self) -> String;

    fn parameter_count(&self) -> usize {
        0
    }
}

/// Shape of a list of equally sized feature maps.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapShape {
    pub channels: usize,
    pub rows: usize,
    pub cols: usize,
}

impl MapShape {
    pub fn new(channels: usize, rows: usize, cols: usize) -> Self {
        Self { channels, rows, cols }
    }

    pub fn len(&self) -> usize {
        self.channels * self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn zeros(&self) -> Vec<Matrix<f64>> {
        vec![Matrix::zeros(self.rows, self.cols); self.channels]
    }

    /// Whether `maps` has exactly this shape. Logs the mismatch under `op` otherwise.
    pub fn check(&self, op: &str, maps: &[Matrix<f64>]) -> bool {
        if maps.len() != self.channels {
            error!(
                "{}: expected {} feature maps, got {}",
                op,
                self.channels,
                maps.len()
            );
            return false;
        }
        if let Some(m) = maps.iter().find(|m| m.shape() != (self.rows, self.cols)) {
            error!(
                "{}: expected {}x{} feature maps, got {}x{}",
                op,
                self.rows,
                self.cols,
                m.rows(),
                m.cols()
            );
            return false;
        }
        true
    }
}

/// Rejects an initialization half-width that `Uniform` cannot sample from:
/// it must be positive, and `[-r, r)` must have a finite width.
pub fn check_init_range(init_range: f64) -> Result<()> {
    if init_range <= 0.0 || !(2.0 * init_range).is_finite() {
        return Err(NNError::InvalidLayerConfiguration(format!(
            "init_range must be positive and finite, got {}",
            init_range
        )));
    }
    Ok(())
}

/// Spatial output size `floor((n + extent - window) / stride) + 1`, or `None`
/// when the window does not fit.
pub fn output_extent(n: usize, extent: usize, window: usize, stride: usize) -> Option<usize> {
    if window == 0 || stride == 0 {
        return None;
    }
    let padded = n + extent;
    if padded < window {
        return None;
    }
    Some((padded - window) / stride + 1)
}

/// Layers that map a list of feature maps to a list of feature maps.
///
/// `forward` takes the previous layer's output by reference; a layer copies
/// only what its backward pass needs. `backward` consumes the gradient with
/// respect to this layer's output and returns the gradient with respect to
/// its input, which is what the previous layer receives.
pub trait MapLayer: LayerTrait {
    fn input_shape(&self) -> MapShape;

    fn output_shape(&self) -> MapShape;

    fn forward(&mut self, input: &[Matrix<f64>]) -> &[Matrix<f64>];

    fn output(&self) -> &[Matrix<f64>];

    fn backward(&mut self, delta: &[Matrix<f64>]) -> &[Matrix<f64>];

    fn input_delta(&self) -> &[Matrix<f64>];
}
