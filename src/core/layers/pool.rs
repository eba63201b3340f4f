use crate::core::layers::{output_extent, LayerTrait, MapLayer, MapShape};
use crate::core::padding::Padding;
use crate::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolKind {
    #[default]
    Max,
    Average,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub input: MapShape,
    pub pool_size: usize,
    /// Defaults to `pool_size`, giving non-overlapping windows.
    #[serde(default)]
    pub stride: Option<usize>,
    #[serde(default)]
    pub kind: PoolKind,
    #[serde(default)]
    pub padding: Padding,
}

impl PoolConfig {
    pub fn new(input: MapShape, pool_size: usize, kind: PoolKind) -> Self {
        Self { input, pool_size, stride: None, kind, padding: Padding::none() }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn effective_stride(&self) -> usize {
        self.stride.unwrap_or(self.pool_size)
    }
}

/// Downsampling layer. Max pooling remembers, per output cell, the flat index
/// (into the padded map) of the element that won its window.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PoolLayer {
    config: PoolConfig,
    output_shape: MapShape,
    output: Vec<Matrix<f64>>,
    // argmax[channel][i * out_cols + j]
    argmax: Vec<Vec<usize>>,
    input_delta: Vec<Matrix<f64>>,
}

impl PoolLayer {
    pub fn new(config: PoolConfig) -> Result<Self> {
        let input = config.input;
        if input.is_empty() {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "pooling needs a non-empty input, got {:?}",
                input
            )));
        }
        let stride = config.effective_stride();
        let padding = config.padding;
        let rows = output_extent(input.rows, padding.placement.extent(padding.rows), config.pool_size, stride);
        let cols = output_extent(input.cols, padding.placement.extent(padding.cols), config.pool_size, stride);
        let output_shape = match (rows, cols) {
            (Some(rows), Some(cols)) => MapShape::new(input.channels, rows, cols),
            _ => {
                return Err(NNError::InvalidLayerConfiguration(format!(
                    "pool {} with stride {} does not fit a {}x{} input",
                    config.pool_size, stride, input.rows, input.cols
                )))
            }
        };
        debug!("PoolLayer ({:?}): {:?} -> {:?}", config.kind, input, output_shape);
        Ok(Self {
            output: output_shape.zeros(),
            argmax: vec![vec![0; output_shape.rows * output_shape.cols]; input.channels],
            input_delta: input.zeros(),
            config,
            output_shape,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Flat indices into the padded input recorded by the last max-pool forward.
    pub fn argmax(&self) -> &[Vec<usize>] {
        &self.argmax
    }

    fn padded_shape(&self) -> (usize, usize) {
        self.config.padding.padded_shape(self.config.input.rows, self.config.input.cols)
    }
}

impl LayerTrait for PoolLayer {
    fn typ(&self) -> String {
        match self.config.kind {
            PoolKind::Max => "MaxPool".into(),
            PoolKind::Average => "AvgPool".into(),
        }
    }
}

impl MapLayer for PoolLayer {
    fn input_shape(&self) -> MapShape {
        self.config.input
    }

    fn output_shape(&self) -> MapShape {
        self.output_shape
    }

    fn forward(&mut self, input: &[Matrix<f64>]) -> &[Matrix<f64>] {
        if !self.config.input.check("PoolLayer::forward", input) {
            self.output = self.output_shape.zeros();
            return &self.output;
        }
        let size = self.config.pool_size;
        let stride = self.config.effective_stride();
        let (rows, cols) = (self.output_shape.rows, self.output_shape.cols);
        let area = (size * size) as f64;
        let padded_cols = self.padded_shape().1;

        for (channel, map) in input.iter().enumerate() {
            let padded = self.config.padding.apply(map);
            let mut out = Matrix::zeros(rows, cols);
            for i in 0..rows {
                for j in 0..cols {
                    let (r0, c0) = (i * stride, j * stride);
                    let Some(window) = padded.window(r0, c0, size, size) else {
                        continue;
                    };
                    out[(i, j)] = match self.config.kind {
                        PoolKind::Max => {
                            let (value, flat) = window.max().unwrap_or((0.0, 0));
                            let (wr, wc) = (flat / size, flat % size);
                            self.argmax[channel][i * cols + j] = (r0 + wr) * padded_cols + c0 + wc;
                            value
                        }
                        PoolKind::Average => window.sum() / area,
                    };
                }
            }
            self.output[channel] = out;
        }
        &self.output
    }

    fn output(&self) -> &[Matrix<f64>] {
        &self.output
    }

    fn backward(&mut self, delta: &[Matrix<f64>]) -> &[Matrix<f64>] {
        if !self.output_shape.check("PoolLayer::backward", delta) {
            self.input_delta = self.config.input.zeros();
            return &self.input_delta;
        }
        let size = self.config.pool_size;
        let stride = self.config.effective_stride();
        let (pr, pc) = self.padded_shape();
        let input = self.config.input;
        let area = (size * size) as f64;

        self.input_delta = delta
            .iter()
            .enumerate()
            .map(|(channel, d)| {
                let mut padded = Matrix::zeros(pr, pc);
                for i in 0..d.rows() {
                    for j in 0..d.cols() {
                        match self.config.kind {
                            PoolKind::Max => {
                                let flat = self.argmax[channel][i * d.cols() + j];
                                padded[(flat / pc, flat % pc)] += d[(i, j)];
                            }
                            PoolKind::Average => {
                                let share = d[(i, j)] / area;
                                for u in 0..size {
                                    for v in 0..size {
                                        padded[(i * stride + u, j * stride + v)] += share;
                                    }
                                }
                            }
                        }
                    }
                }
                self.config.padding.fold_back(&padded, input.rows, input.cols)
            })
            .collect();
        &self.input_delta
    }

    fn input_delta(&self) -> &[Matrix<f64>] {
        &self.input_delta
    }
}
