use rayon::prelude::*;

use crate::core::layers::{check_init_range, output_extent, LayerTrait, MapLayer, MapShape};
use crate::core::optimizers::{bias_step, weight_step, Optimization, OptimizerConfig};
use crate::core::padding::{pad, PadFill, PadPlacement, Padding};
use crate::prelude::*;

fn default_stride() -> usize {
    1
}

fn default_init_range() -> f64 {
    0.5
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConvConfig {
    pub input: MapShape,
    pub kernel_size: usize,
    pub kernel_count: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default)]
    pub padding: Padding,
    /// Kernels start uniform in `[-init_range, init_range)`.
    #[serde(default = "default_init_range")]
    pub init_range: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ConvConfig {
    pub fn new(input: MapShape, kernel_size: usize, kernel_count: usize) -> Self {
        Self {
            input,
            kernel_size,
            kernel_count,
            stride: default_stride(),
            padding: Padding::none(),
            init_range: default_init_range(),
            seed: None,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// One kernel with its bias and gradient state.
///
/// `kernel_delta`/`bias_delta` hold the gradient of the latest backward call;
/// the `*_sum` fields accumulate it over the current batch until the next
/// update.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConvNode {
    pub kernel: Matrix<f64>,
    pub bias: f64,
    pub kernel_delta: Matrix<f64>,
    pub bias_delta: f64,
    pub kernel_delta_sum: Matrix<f64>,
    pub bias_delta_sum: f64,
}

impl ConvNode {
    fn new(kernel: Matrix<f64>) -> Self {
        let (rows, cols) = kernel.shape();
        Self {
            kernel,
            bias: 0.0,
            kernel_delta: Matrix::zeros(rows, cols),
            bias_delta: 0.0,
            kernel_delta_sum: Matrix::zeros(rows, cols),
            bias_delta_sum: 0.0,
        }
    }

    fn clear_gradients(&mut self) {
        let (rows, cols) = self.kernel.shape();
        self.kernel_delta = Matrix::zeros(rows, cols);
        self.bias_delta = 0.0;
        self.kernel_delta_sum = Matrix::zeros(rows, cols);
        self.bias_delta_sum = 0.0;
    }
}

/// Convolutional layer: one output feature map per kernel.
///
/// Each kernel is cross-correlated with every input map and the results are
/// summed, then the bias is added. Outputs are left unactivated; follow the
/// layer with a [`ProcessLayer`](crate::core::layers::ProcessLayer) to apply a
/// transfer function.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConvLayer {
    config: ConvConfig,
    output_shape: MapShape,
    nodes: Vec<ConvNode>,
    // Feature map of node i lives at features[i].
    features: Vec<Matrix<f64>>,
    padded_input: Vec<Matrix<f64>>,
    input_delta: Vec<Matrix<f64>>,
    samples: usize,
}

impl ConvLayer {
    pub fn new(config: ConvConfig) -> Result<Self> {
        let output_shape = Self::validate(&config)?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let k = config.kernel_size;
        let r = config.init_range;
        let nodes = (0..config.kernel_count)
            .map(|_| ConvNode::new(Matrix::random(k, k, -r, r, &mut rng)))
            .collect();
        debug!(
            "ConvLayer: {:?} -> {:?} with {} {}x{} kernels",
            config.input, output_shape, config.kernel_count, k, k
        );
        Ok(Self::assemble(config, output_shape, nodes))
    }

    /// Builds a layer around given kernels and biases.
    pub fn with_kernels(config: ConvConfig, kernels: Vec<Matrix<f64>>, biases: Vec<f64>) -> Result<Self> {
        let output_shape = Self::validate(&config)?;
        let k = config.kernel_size;
        if kernels.len() != config.kernel_count || biases.len() != config.kernel_count {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "expected {} kernels and biases, got {} and {}",
                config.kernel_count,
                kernels.len(),
                biases.len()
            )));
        }
        if kernels.iter().any(|m| m.shape() != (k, k)) {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "every kernel must be {}x{}",
                k, k
            )));
        }
        let nodes = kernels
            .into_iter()
            .zip(biases)
            .map(|(kernel, bias)| ConvNode { bias, ..ConvNode::new(kernel) })
            .collect();
        Ok(Self::assemble(config, output_shape, nodes))
    }

    fn assemble(config: ConvConfig, output_shape: MapShape, nodes: Vec<ConvNode>) -> Self {
        let (pr, pc) = config.padding.padded_shape(config.input.rows, config.input.cols);
        Self {
            features: output_shape.zeros(),
            padded_input: vec![Matrix::zeros(pr, pc); config.input.channels],
            input_delta: config.input.zeros(),
            config,
            output_shape,
            nodes,
            samples: 0,
        }
    }

    fn validate(config: &ConvConfig) -> Result<MapShape> {
        let input = config.input;
        if input.is_empty() || config.kernel_count == 0 {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "convolution needs a non-empty input and at least one kernel, got {:?} and {} kernels",
                input, config.kernel_count
            )));
        }
        check_init_range(config.init_range)?;
        let padding = config.padding;
        let rows = output_extent(
            input.rows,
            padding.placement.extent(padding.rows),
            config.kernel_size,
            config.stride,
        );
        let cols = output_extent(
            input.cols,
            padding.placement.extent(padding.cols),
            config.kernel_size,
            config.stride,
        );
        match (rows, cols) {
            (Some(rows), Some(cols)) => Ok(MapShape::new(config.kernel_count, rows, cols)),
            _ => Err(NNError::InvalidLayerConfiguration(format!(
                "kernel {} with stride {} and padding {:?} does not fit a {}x{} input",
                config.kernel_size, config.stride, padding, input.rows, input.cols
            ))),
        }
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[ConvNode] {
        &self.nodes
    }

    pub fn features(&self) -> &[Matrix<f64>] {
        &self.features
    }

    pub fn kernels(&self) -> Vec<&Matrix<f64>> {
        self.nodes.iter().map(|n| &n.kernel).collect()
    }

    /// Resets per-call and batch gradients.
    pub fn clear_gradients(&mut self) {
        self.nodes.iter_mut().for_each(ConvNode::clear_gradients);
        self.samples = 0;
    }

    /// Adds another replica's batch gradients into this layer's.
    pub fn absorb_gradients(&mut self, other: &ConvLayer) {
        if self.nodes.len() != other.nodes.len() {
            error!(
                "ConvLayer::absorb_gradients: {} nodes vs {}",
                self.nodes.len(),
                other.nodes.len()
            );
            return;
        }
        for (node, theirs) in self.nodes.iter_mut().zip(&other.nodes) {
            node.kernel_delta_sum += &theirs.kernel_delta_sum;
            node.bias_delta_sum += theirs.bias_delta_sum;
        }
        self.samples += other.samples;
    }

    pub fn copy_parameters_from(&mut self, other: &ConvLayer) {
        for (node, theirs) in self.nodes.iter_mut().zip(&other.nodes) {
            node.kernel = theirs.kernel.clone();
            node.bias = theirs.bias;
        }
    }
}

/// Valid cross-correlation of `input` with `kernel` at `stride`, producing an
/// `out_rows × out_cols` map.
pub(crate) fn correlate(
    input: &Matrix<f64>,
    kernel: &Matrix<f64>,
    stride: usize,
    out_rows: usize,
    out_cols: usize,
) -> Matrix<f64> {
    let (kr, kc) = kernel.shape();
    let mut out = Matrix::zeros(out_rows, out_cols);
    for i in 0..out_rows {
        for j in 0..out_cols {
            let mut acc = 0.0;
            for u in 0..kr {
                for v in 0..kc {
                    acc += input[(i * stride + u, j * stride + v)] * kernel[(u, v)];
                }
            }
            out[(i, j)] = acc;
        }
    }
    out
}

/// Gradient of a stride-`stride` correlation with respect to its `k × k` kernel.
fn kernel_gradient(input: &Matrix<f64>, delta: &Matrix<f64>, stride: usize, k: usize) -> Matrix<f64> {
    let mut grad = Matrix::zeros(k, k);
    for u in 0..k {
        for v in 0..k {
            let mut acc = 0.0;
            for i in 0..delta.rows() {
                for j in 0..delta.cols() {
                    acc += input[(i * stride + u, j * stride + v)] * delta[(i, j)];
                }
            }
            grad[(u, v)] = acc;
        }
    }
    grad
}

/// Inserts `stride - 1` zeros between neighbouring entries.
fn dilate(delta: &Matrix<f64>, stride: usize) -> Matrix<f64> {
    if stride == 1 {
        return delta.clone();
    }
    let (rows, cols) = delta.shape();
    let mut out = Matrix::zeros((rows - 1) * stride + 1, (cols - 1) * stride + 1);
    for i in 0..rows {
        for j in 0..cols {
            out[(i * stride, j * stride)] = delta[(i, j)];
        }
    }
    out
}

/// Gradient with respect to the padded input: full convolution of the
/// dilated delta with the kernel rotated by 180 degrees, placed on a
/// `rows × cols` canvas. Trailing cells never visited by the kernel stay zero.
fn input_gradient(delta: &Matrix<f64>, kernel: &Matrix<f64>, stride: usize, rows: usize, cols: usize) -> Matrix<f64> {
    let k = kernel.rows();
    let dilated = dilate(delta, stride);
    let full = pad(&dilated, PadPlacement::Surround, PadFill::Zero, k - 1, k - 1);
    let (gr, gc) = (dilated.rows() + k - 1, dilated.cols() + k - 1);
    let grad = correlate(&full, &kernel.rot180(), 1, gr, gc);

    let mut out = Matrix::zeros(rows, cols);
    for r in 0..gr.min(rows) {
        for c in 0..gc.min(cols) {
            out[(r, c)] = grad[(r, c)];
        }
    }
    out
}

impl LayerTrait for ConvLayer {
    fn typ(&self) -> String {
        "Conv".into()
    }

    fn parameter_count(&self) -> usize {
        self.nodes.iter().map(|n| n.kernel.len() + 1).sum()
    }
}

impl MapLayer for ConvLayer {
    fn input_shape(&self) -> MapShape {
        self.config.input
    }

    fn output_shape(&self) -> MapShape {
        self.output_shape
    }

    fn forward(&mut self, input: &[Matrix<f64>]) -> &[Matrix<f64>] {
        if !self.config.input.check("ConvLayer::forward", input) {
            self.features = self.output_shape.zeros();
            return &self.features;
        }
        let padding = self.config.padding;
        self.padded_input = input.iter().map(|m| padding.apply(m)).collect();

        let stride = self.config.stride;
        let (rows, cols) = (self.output_shape.rows, self.output_shape.cols);
        let inputs = &self.padded_input;
        self.features = self
            .nodes
            .par_iter()
            .map(|node| {
                let mut feature = Matrix::filled(rows, cols, Fill::Value(node.bias));
                for map in inputs {
                    feature += &correlate(map, &node.kernel, stride, rows, cols);
                }
                feature
            })
            .collect();
        &self.features
    }

    fn output(&self) -> &[Matrix<f64>] {
        &self.features
    }

    fn backward(&mut self, delta: &[Matrix<f64>]) -> &[Matrix<f64>] {
        if !self.output_shape.check("ConvLayer::backward", delta) {
            self.input_delta = self.config.input.zeros();
            return &self.input_delta;
        }
        let stride = self.config.stride;
        let k = self.config.kernel_size;
        let (pr, pc) = self
            .config
            .padding
            .padded_shape(self.config.input.rows, self.config.input.cols);
        let inputs = &self.padded_input;

        let padded_grads: Vec<Matrix<f64>> = self
            .nodes
            .par_iter_mut()
            .zip(delta.par_iter())
            .map(|(node, d)| {
                let mut kernel_delta = Matrix::zeros(k, k);
                for map in inputs {
                    kernel_delta += &kernel_gradient(map, d, stride, k);
                }
                node.bias_delta = d.sum();
                node.kernel_delta_sum += &kernel_delta;
                node.bias_delta_sum += node.bias_delta;
                node.kernel_delta = kernel_delta;
                input_gradient(d, &node.kernel, stride, pr, pc)
            })
            .collect();
        self.samples += 1;

        let mut padded_grad = Matrix::zeros(pr, pc);
        for g in &padded_grads {
            padded_grad += g;
        }
        let input = self.config.input;
        let grad = self.config.padding.fold_back(&padded_grad, input.rows, input.cols);
        // the same kernel sees every input map, so every map gets the same gradient
        self.input_delta = vec![grad; input.channels];
        &self.input_delta
    }

    fn input_delta(&self) -> &[Matrix<f64>] {
        &self.input_delta
    }
}

impl Optimization for ConvLayer {
    fn optimize(&mut self, config: &OptimizerConfig) {
        if self.samples == 0 {
            return;
        }
        let scale = 1.0 / self.samples as f64;
        for node in &mut self.nodes {
            for (w, &g) in node.kernel.iter_mut().zip(node.kernel_delta_sum.iter()) {
                *w = weight_step(*w, g * scale, config);
            }
            node.bias = bias_step(node.bias, node.bias_delta_sum * scale, config);
        }
        self.clear_gradients();
    }
}
