use crate::core::activations::Activation;
use crate::core::layers::{check_init_range, LayerTrait};
use crate::core::losses::Loss;
use crate::core::optimizers::{apply_optimization, Optimization, OptimizerConfig};
use crate::prelude::*;

/// Position of a fully-connected layer in the dense stack. Only `Output`
/// layers carry a loss and compute their error from a target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerRole {
    Input,
    #[default]
    Hidden,
    Output,
}

fn default_init_range() -> f64 {
    0.5
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DenseConfig {
    pub input_size: usize,
    pub output_size: usize,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub role: LayerRole,
    /// Required for `LayerRole::Output`, ignored otherwise.
    #[serde(default)]
    pub loss: Option<Loss>,
    #[serde(default = "default_init_range")]
    pub init_range: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl DenseConfig {
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        Self {
            input_size,
            output_size,
            activation,
            role: LayerRole::Hidden,
            loss: None,
            init_range: default_init_range(),
            seed: None,
        }
    }

    pub fn input(mut self) -> Self {
        self.role = LayerRole::Input;
        self
    }

    pub fn output(mut self, loss: Loss) -> Self {
        self.role = LayerRole::Output;
        self.loss = Some(loss);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Fully-connected layer: `z = W·x + b`, `a = f(z)` with `W` of shape
/// `output_size × input_size`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FullyConnectedLayer {
    role: LayerRole,
    activation: Activation,
    loss: Option<Loss>,
    pub w: Matrix<f64>,
    pub b: Vector<f64>,
    x: Vector<f64>,
    z: Vector<f64>,
    a: Vector<f64>,
    delta: Vector<f64>,
    input_delta: Vector<f64>,
    weight_delta: Matrix<f64>,
    bias_delta: Vector<f64>,
    weight_delta_sum: Matrix<f64>,
    bias_delta_sum: Vector<f64>,
    samples: usize,
}

impl FullyConnectedLayer {
    pub fn new(config: DenseConfig) -> Result<Self> {
        Self::validate(&config)?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let r = config.init_range;
        let w = Matrix::random(config.output_size, config.input_size, -r, r, &mut rng);
        let b = Vector::zeros(config.output_size);
        Ok(Self::assemble(&config, w, b))
    }

    /// Builds a layer with given weights (`output_size × input_size`) and bias.
    pub fn with_parameters(
        w: Matrix<f64>,
        b: Vector<f64>,
        activation: Activation,
        role: LayerRole,
        loss: Option<Loss>,
    ) -> Result<Self> {
        let config = DenseConfig {
            input_size: w.cols(),
            output_size: w.rows(),
            activation,
            role,
            loss,
            init_range: default_init_range(),
            seed: None,
        };
        Self::validate(&config)?;
        if b.len() != w.rows() {
            return Err(NNError::InvalidLayerConfiguration(format!(
                "bias length {} doesn't match {} weight rows",
                b.len(),
                w.rows()
            )));
        }
        Ok(Self::assemble(&config, w, b))
    }

    fn validate(config: &DenseConfig) -> Result<()> {
        if config.input_size == 0 || config.output_size == 0 {
            return Err(NNError::InvalidLayerConfiguration(
                "Layer dimensions must be greater than 0".to_string(),
            ));
        }
        if config.role == LayerRole::Output && config.loss.is_none() {
            return Err(NNError::InvalidLayerConfiguration(
                "an output layer needs a loss function".to_string(),
            ));
        }
        check_init_range(config.init_range)?;
        Ok(())
    }

    fn assemble(config: &DenseConfig, w: Matrix<f64>, b: Vector<f64>) -> Self {
        let (out, inp) = (config.output_size, config.input_size);
        Self {
            role: config.role,
            activation: config.activation,
            loss: if config.role == LayerRole::Output { config.loss } else { None },
            w,
            b,
            x: Vector::zeros(inp),
            z: Vector::zeros(out),
            a: Vector::zeros(out),
            delta: Vector::zeros(out),
            input_delta: Vector::zeros(inp),
            weight_delta: Matrix::zeros(out, inp),
            bias_delta: Vector::zeros(out),
            weight_delta_sum: Matrix::zeros(out, inp),
            bias_delta_sum: Vector::zeros(out),
            samples: 0,
        }
    }

    pub fn input_size(&self) -> usize {
        self.w.cols()
    }

    pub fn output_size(&self) -> usize {
        self.w.rows()
    }

    pub fn role(&self) -> LayerRole {
        self.role
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn loss_function(&self) -> Option<Loss> {
        self.loss
    }

    pub fn forward(&mut self, x: &Vector<f64>) -> &Vector<f64> {
        if x.len() != self.input_size() {
            error!(
                "FullyConnectedLayer::forward: expected input length {}, got {}",
                self.input_size(),
                x.len()
            );
            self.x = Vector::zeros(self.input_size());
        } else {
            self.x = x.clone();
        }
        self.z = &(&self.w * &self.x) + &self.b;
        self.a = self.activation.forward_vector(&self.z);
        &self.a
    }

    /// Activated output `a`.
    pub fn output(&self) -> &Vector<f64> {
        &self.a
    }

    /// Pre-activation `z`.
    pub fn pre_activation(&self) -> &Vector<f64> {
        &self.z
    }

    /// Loss of the current output against `target`. Zero for non-output layers.
    pub fn loss(&self, target: &Vector<f64>) -> f64 {
        match self.loss {
            Some(loss) => loss.value(&self.a, target),
            None => {
                error!("FullyConnectedLayer::loss: {:?} layer has no loss function", self.role);
                0.0
            }
        }
    }

    /// Output-layer backward: `δ = loss'(a, target) ⊙ f'(z)`.
    pub fn backward_target(&mut self, target: &Vector<f64>) -> &Vector<f64> {
        let incoming = match self.loss {
            Some(loss) => loss.gradient(&self.a, target),
            None => {
                error!(
                    "FullyConnectedLayer::backward_target: {:?} layer has no loss function",
                    self.role
                );
                Vector::zeros(self.output_size())
            }
        };
        self.backward(&incoming)
    }

    /// Backward from the gradient with respect to `a`, which for a hidden layer
    /// is the next layer's `input_delta` (`Wᵀ_next·δ_next`).
    pub fn backward(&mut self, incoming: &Vector<f64>) -> &Vector<f64> {
        if incoming.len() != self.output_size() {
            error!(
                "FullyConnectedLayer::backward: expected delta length {}, got {}",
                self.output_size(),
                incoming.len()
            );
            self.input_delta = Vector::zeros(self.input_size());
            return &self.input_delta;
        }
        self.delta = self.activation.backward_vector(&self.z, incoming);
        self.weight_delta = self.delta.outer(&self.x);
        self.bias_delta = self.delta.clone();
        self.weight_delta_sum += &self.weight_delta;
        self.bias_delta_sum += &self.bias_delta;
        self.samples += 1;
        self.input_delta = &self.w.transpose() * &self.delta;
        &self.input_delta
    }

    /// Local error `δ` of the last backward call.
    pub fn delta(&self) -> &Vector<f64> {
        &self.delta
    }

    /// `Wᵀ·δ`, the gradient handed to the previous layer.
    pub fn input_delta(&self) -> &Vector<f64> {
        &self.input_delta
    }

    pub fn weight_delta(&self) -> &Matrix<f64> {
        &self.weight_delta
    }

    pub fn bias_delta(&self) -> &Vector<f64> {
        &self.bias_delta
    }

    pub fn weight_delta_sum(&self) -> &Matrix<f64> {
        &self.weight_delta_sum
    }

    pub fn bias_delta_sum(&self) -> &Vector<f64> {
        &self.bias_delta_sum
    }

    pub fn clear_gradients(&mut self) {
        let (out, inp) = self.w.shape();
        self.weight_delta = Matrix::zeros(out, inp);
        self.bias_delta = Vector::zeros(out);
        self.weight_delta_sum = Matrix::zeros(out, inp);
        self.bias_delta_sum = Vector::zeros(out);
        self.samples = 0;
    }

    pub fn absorb_gradients(&mut self, other: &FullyConnectedLayer) {
        self.weight_delta_sum += &other.weight_delta_sum;
        self.bias_delta_sum += &other.bias_delta_sum;
        self.samples += other.samples;
    }

    pub fn copy_parameters_from(&mut self, other: &FullyConnectedLayer) {
        if self.w.same_shape(&other.w) && self.b.len() == other.b.len() {
            self.w = other.w.clone();
            self.b = other.b.clone();
        } else {
            error!("FullyConnectedLayer::copy_parameters_from: parameter shapes differ");
        }
    }
}

impl LayerTrait for FullyConnectedLayer {
    fn typ(&self) -> String {
        match self.role {
            LayerRole::Input => "Dense(Input)".into(),
            LayerRole::Hidden => "Dense(Hidden)".into(),
            LayerRole::Output => "Dense(Output)".into(),
        }
    }

    fn parameter_count(&self) -> usize {
        self.w.len() + self.b.len()
    }
}

impl Optimization for FullyConnectedLayer {
    fn optimize(&mut self, config: &OptimizerConfig) {
        if self.samples == 0 {
            return;
        }
        let scale = 1.0 / self.samples as f64;
        let dw = self.weight_delta_sum.scale(scale);
        let db = self.bias_delta_sum.scale(scale);
        apply_optimization(&mut self.w, &mut self.b, &dw, &db, config);
        self.clear_gradients();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn identity_layer() -> FullyConnectedLayer {
        FullyConnectedLayer::with_parameters(
            Matrix::from_rows(&[vec![1.0, 1.0]]).unwrap(),
            Vector::from_vec(vec![0.0]),
            Activation::Linear,
            LayerRole::Output,
            Some(Loss::MSE),
        )
        .unwrap()
    }

    #[test]
    fn test_forward() {
        let mut layer = identity_layer();
        let a = layer.forward(&Vector::from_vec(vec![2.0, 3.0]));
        assert_eq!(a[0], 5.0);
    }

    #[test]
    fn test_output_backward_and_update() {
        let mut layer = identity_layer();
        let target = Vector::from_vec(vec![0.0]);
        layer.forward(&Vector::from_vec(vec![2.0, 3.0]));
        assert_eq!(layer.loss(&target), 12.5);

        let input_delta = layer.backward_target(&target).clone();
        assert_eq!(layer.delta()[0], 5.0);
        assert_eq!(*layer.weight_delta(), Matrix::from_rows(&[vec![10.0, 15.0]]).unwrap());
        assert_eq!(input_delta, Vector::from_vec(vec![5.0, 5.0]));

        layer.optimize(&OptimizerConfig::sgd(0.1));
        assert_abs_diff_eq!(layer.w[(0, 0)], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(layer.w[(0, 1)], -0.5, epsilon = 1e-12);
        assert_eq!(layer.weight_delta_sum().sum(), 0.0);
    }

    #[test]
    fn test_hidden_backward_uses_activation_derivative() {
        let mut layer = FullyConnectedLayer::with_parameters(
            Matrix::from_rows(&[vec![1.0], vec![-1.0]]).unwrap(),
            Vector::zeros(2),
            Activation::Relu,
            LayerRole::Hidden,
            None,
        )
        .unwrap();
        layer.forward(&Vector::from_vec(vec![2.0]));
        assert_eq!(layer.output().to_vec(), vec![2.0, 0.0]);
        let back = layer.backward(&Vector::from_vec(vec![1.0, 1.0])).clone();
        assert_eq!(layer.delta().to_vec(), vec![1.0, 0.0]);
        assert_eq!(back.to_vec(), vec![1.0]);
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(FullyConnectedLayer::new(DenseConfig::new(0, 3, Activation::Linear)).is_err());
        let no_loss = DenseConfig { role: LayerRole::Output, ..DenseConfig::new(2, 1, Activation::Linear) };
        assert!(FullyConnectedLayer::new(no_loss).is_err());
        let bad_bias = FullyConnectedLayer::with_parameters(
            Matrix::zeros(2, 2),
            Vector::zeros(3),
            Activation::Linear,
            LayerRole::Hidden,
            None,
        );
        assert!(bad_bias.is_err());
    }

    #[test]
    fn test_unsampleable_init_range_is_rejected() {
        for init_range in [f64::INFINITY, 1e308, -0.5] {
            let config = DenseConfig { init_range, ..DenseConfig::new(3, 2, Activation::Tanh) };
            assert!(matches!(FullyConnectedLayer::new(config), Err(NNError::InvalidLayerConfiguration(_))));
        }
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let config = DenseConfig::new(3, 2, Activation::Tanh).output(Loss::MSE).seed(9);
        let mut layer = FullyConnectedLayer::new(config).unwrap();
        let x = Vector::from_vec(vec![0.3, -0.7, 1.1]);
        let t = Vector::from_vec(vec![0.5, -0.2]);
        layer.forward(&x);
        let input_delta = layer.backward_target(&t).clone();
        let dw = layer.weight_delta().clone();

        let h = 1e-6;
        for (r, c) in [(0, 0), (1, 2)] {
            let base = layer.w[(r, c)];
            layer.w[(r, c)] = base + h;
            layer.forward(&x);
            let up = layer.loss(&t);
            layer.w[(r, c)] = base - h;
            layer.forward(&x);
            let down = layer.loss(&t);
            layer.w[(r, c)] = base;
            assert_abs_diff_eq!(dw[(r, c)], (up - down) / (2.0 * h), epsilon = 1e-6);
        }
        for i in 0..3 {
            let mut xp = x.clone();
            xp[i] += h;
            layer.forward(&xp);
            let up = layer.loss(&t);
            let mut xm = x.clone();
            xm[i] -= h;
            layer.forward(&xm);
            let down = layer.loss(&t);
            assert_abs_diff_eq!(input_delta[i], (up - down) / (2.0 * h), epsilon = 1e-6);
        }
    }
}
