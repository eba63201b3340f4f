use crate::prelude::*;

/// Scalar transfer functions, each a (value, derivative) pair.
///
/// `derivative` is taken with respect to the pre-activation input, so callers
/// always pass the stored `z`, never the activated output.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    LeakyRelu(f64),
    Sigmoid,
    Tanh,
    Softplus,
}

impl Activation {
    pub fn value(&self, z: f64) -> f64 {
        match self {
            Self::Linear => z,
            Self::Relu => relu(z),
            Self::LeakyRelu(alpha) => if z >= 0.0 { z } else { alpha * z },
            Self::Sigmoid => sigmoid(z),
            Self::Tanh => z.tanh(),
            Self::Softplus => softplus(z),
        }
    }

    pub fn derivative(&self, z: f64) -> f64 {
        match self {
            Self::Linear => 1.0,
            Self::Relu => if z >= 0.0 { 1.0 } else { 0.0 },
            Self::LeakyRelu(alpha) => if z >= 0.0 { 1.0 } else { *alpha },
            Self::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            Self::Tanh => {
                let t = z.tanh();
                1.0 - t * t
            }
            // d/dz ln(1 + e^z) = sigmoid(z)
            Self::Softplus => sigmoid(z),
        }
    }

    pub fn forward(&self, z: &Matrix<f64>) -> Matrix<f64> {
        z.map(|v| self.value(v))
    }

    /// `da ⊙ f'(z)`
    pub fn backward(&self, z: &Matrix<f64>, da: &Matrix<f64>) -> Matrix<f64> {
        z.map(|v| self.derivative(v)).hadamard(da)
    }

    pub fn forward_vector(&self, z: &Vector<f64>) -> Vector<f64> {
        z.map(|v| self.value(v))
    }

    pub fn backward_vector(&self, z: &Vector<f64>, da: &Vector<f64>) -> Vector<f64> {
        z.map(|v| self.derivative(v)).hadamard(da)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn relu(z: f64) -> f64 {
    if z >= 0.0 { z } else { 0.0 }
}

fn softplus(z: f64) -> f64 {
    // ln(1 + e^z) without overflow for large z
    if z > 30.0 { z } else { z.exp().ln_1p() }
}
