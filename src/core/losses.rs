use crate::prelude::*;

/// Output-layer error functions, each a (value, gradient w.r.t. prediction) pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum Loss {
    /// `½ Σ (a - y)²`
    #[default]
    MSE,
    /// Binary cross-entropy `-Σ y ln a + (1 - y) ln(1 - a)`, for outputs in (0, 1).
    CrossEntropy,
}

const EPSILON: f64 = 1e-15;

impl Loss {
    pub fn value(&self, y_hat: &Vector<f64>, y: &Vector<f64>) -> f64 {
        if y_hat.len() != y.len() {
            error!(
                "Loss::value: prediction length {} doesn't match target length {}",
                y_hat.len(),
                y.len()
            );
            return 0.0;
        }
        match self {
            Self::MSE => 0.5 * y_hat.iter().zip(y.iter()).map(|(a, t)| (a - t).powi(2)).sum::<f64>(),
            Self::CrossEntropy => -y_hat
                .iter()
                .zip(y.iter())
                .map(|(&a, &t)| {
                    let a = a.clamp(EPSILON, 1.0 - EPSILON);
                    t * a.ln() + (1.0 - t) * (1.0 - a).ln()
                })
                .sum::<f64>(),
        }
    }

    /// `∂L/∂a`
    pub fn gradient(&self, y_hat: &Vector<f64>, y: &Vector<f64>) -> Vector<f64> {
        if y_hat.len() != y.len() {
            error!(
                "Loss::gradient: prediction length {} doesn't match target length {}",
                y_hat.len(),
                y.len()
            );
            return Vector::zeros(y_hat.len());
        }
        match self {
            Self::MSE => y_hat - y,
            Self::CrossEntropy => Vector::from_vec(
                y_hat
                    .iter()
                    .zip(y.iter())
                    .map(|(&a, &t)| {
                        let a = a.clamp(EPSILON, 1.0 - EPSILON);
                        -(t / a - (1.0 - t) / (1.0 - a))
                    })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_mse() {
        let a = Vector::from_vec(vec![5.0, 1.0]);
        let y = Vector::from_vec(vec![0.0, 1.0]);
        assert_eq!(Loss::MSE.value(&a, &y), 12.5);
        assert_eq!(Loss::MSE.gradient(&a, &y), Vector::from_vec(vec![5.0, 0.0]));
    }

    #[test]
    fn test_cross_entropy_gradient() {
        let a = Vector::from_vec(vec![0.25]);
        let y = Vector::from_vec(vec![1.0]);
        assert_abs_diff_eq!(Loss::CrossEntropy.value(&a, &y), -(0.25f64.ln()), epsilon = 1e-12);
        assert_abs_diff_eq!(Loss::CrossEntropy.gradient(&a, &y)[0], -4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_length_mismatch_is_neutral() {
        let a = Vector::from_vec(vec![1.0, 2.0]);
        let y = Vector::from_vec(vec![1.0]);
        assert_eq!(Loss::MSE.value(&a, &y), 0.0);
        assert_eq!(Loss::MSE.gradient(&a, &y), Vector::zeros(2));
    }
}
