use crate::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum Regularizer {
    #[default]
    None,
    L1(f64),
    L2(f64),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum ClipValue {
    #[default]
    None,
    Value(f64),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct GradientClipConfig {
    pub dw: ClipValue, // for weight gradients
    pub db: ClipValue, // for bias gradients
}

impl GradientClipConfig {
    pub fn new(dw: Option<f64>, db: Option<f64>) -> Self {
        Self {
            dw: dw.map_or(ClipValue::None, ClipValue::Value),
            db: db.map_or(ClipValue::None, ClipValue::Value),
        }
    }
}

/// Plain gradient-descent update settings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    #[serde(default)]
    pub regularizer: Regularizer,
    #[serde(default)]
    pub gradient_clip: GradientClipConfig,
}

impl OptimizerConfig {
    pub fn sgd(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            regularizer: Regularizer::None,
            gradient_clip: GradientClipConfig::default(),
        }
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = regularizer;
        self
    }

    pub fn with_gradient_clip(mut self, gradient_clip: GradientClipConfig) -> Self {
        self.gradient_clip = gradient_clip;
        self
    }
}

/// Layers holding batch-accumulated gradients.
pub trait Optimization {
    /// Applies the mean accumulated gradient, then clears the accumulators.
    ///
    /// The step is `learning_rate * sum / samples`, not `learning_rate * sum`:
    /// a learning rate tuned for summed batch gradients must be multiplied by
    /// the batch size to give the same step here.
    fn optimize(&mut self, config: &OptimizerConfig);
}

/// Regularized, clipped gradient-descent step on a weight value.
pub fn weight_step(weight: f64, grad: f64, config: &OptimizerConfig) -> f64 {
    let grad = match config.regularizer {
        Regularizer::L1(lambda) => grad + lambda * sign(weight),
        Regularizer::L2(lambda) => grad + lambda * weight,
        Regularizer::None => grad,
    };
    weight - config.learning_rate * clip(grad, config.gradient_clip.dw)
}

/// Clipped gradient-descent step on a bias value. Biases are not regularized.
pub fn bias_step(bias: f64, grad: f64, config: &OptimizerConfig) -> f64 {
    bias - config.learning_rate * clip(grad, config.gradient_clip.db)
}

pub fn apply_optimization(
    weights: &mut Matrix<f64>,
    bias: &mut Vector<f64>,
    dw: &Matrix<f64>,
    db: &Vector<f64>,
    config: &OptimizerConfig,
) {
    if !weights.same_shape(dw) || bias.len() != db.len() {
        error!(
            "apply_optimization: gradient shapes {:?}/{} don't match parameters {:?}/{}",
            dw.shape(),
            db.len(),
            weights.shape(),
            bias.len()
        );
        return;
    }
    for (w, &g) in weights.iter_mut().zip(dw.iter()) {
        *w = weight_step(*w, g, config);
    }
    for i in 0..bias.len() {
        bias[i] = bias_step(bias[i], db[i], config);
    }
}

fn clip(grad: f64, clip: ClipValue) -> f64 {
    match clip {
        ClipValue::Value(limit) if limit >= 0.0 => grad.clamp(-limit, limit),
        ClipValue::Value(limit) => {
            error!("clip: limit must be non-negative, got {}; gradient left unclipped", limit);
            grad
        }
        ClipValue::None => grad,
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_plain_sgd_step() {
        let mut w = Matrix::from_rows(&[vec![1.0, 1.0]]).unwrap();
        let mut b = Vector::from_vec(vec![0.0]);
        let dw = Matrix::from_rows(&[vec![10.0, 15.0]]).unwrap();
        let db = Vector::from_vec(vec![5.0]);
        apply_optimization(&mut w, &mut b, &dw, &db, &OptimizerConfig::sgd(0.1));
        assert_abs_diff_eq!(w[(0, 0)], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[(0, 1)], -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(b[0], -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_regularizers() {
        let l2 = OptimizerConfig::sgd(1.0).with_regularizer(Regularizer::L2(0.5));
        assert_abs_diff_eq!(weight_step(2.0, 0.0, &l2), 1.0);
        let l1 = OptimizerConfig::sgd(1.0).with_regularizer(Regularizer::L1(0.5));
        assert_abs_diff_eq!(weight_step(-2.0, 0.0, &l1), -1.5);
        // biases are never regularized
        assert_abs_diff_eq!(bias_step(2.0, 0.0, &l2), 2.0);
    }

    #[test]
    fn test_clipping() {
        let config = OptimizerConfig::sgd(1.0).with_gradient_clip(GradientClipConfig::new(Some(1.0), Some(0.5)));
        assert_abs_diff_eq!(weight_step(0.0, 10.0, &config), -1.0);
        assert_abs_diff_eq!(bias_step(0.0, -10.0, &config), 0.5);
    }

    #[test]
    fn test_invalid_clip_limit_leaves_gradient_unclipped() {
        for limit in [-1.0, f64::NAN] {
            let config =
                OptimizerConfig::sgd(1.0).with_gradient_clip(GradientClipConfig::new(Some(limit), Some(limit)));
            assert_abs_diff_eq!(weight_step(0.0, 10.0, &config), -10.0);
            assert_abs_diff_eq!(bias_step(0.0, -3.0, &config), 3.0);
        }

        let mut w = Matrix::from_rows(&[vec![1.0, 1.0]]).unwrap();
        let mut b = Vector::from_vec(vec![0.0]);
        let dw = Matrix::from_rows(&[vec![10.0, 15.0]]).unwrap();
        let config = OptimizerConfig::sgd(0.1).with_gradient_clip(GradientClipConfig::new(Some(-1.0), None));
        apply_optimization(&mut w, &mut b, &dw, &Vector::from_vec(vec![5.0]), &config);
        assert_abs_diff_eq!(w[(0, 1)], -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_mismatched_gradient_is_ignored() {
        let mut w = Matrix::from_rows(&[vec![1.0, 1.0]]).unwrap();
        let mut b = Vector::from_vec(vec![0.0]);
        let dw = Matrix::zeros(2, 2);
        apply_optimization(&mut w, &mut b, &dw, &Vector::zeros(1), &OptimizerConfig::sgd(0.1));
        assert_eq!(w, Matrix::from_rows(&[vec![1.0, 1.0]]).unwrap());
    }
}
