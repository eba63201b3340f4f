use crate::prelude::*;

/// Affine rescaling between `[lb, ub]` and the unit interval.
pub trait Normalization {
    fn to_unity(&mut self, lb: f64, ub: f64);
    fn from_unity(&mut self, lb: f64, ub: f64);
}

fn rescale<'a>(values: impl Iterator<Item = &'a mut f64>, lb: f64, ub: f64, inverse: bool) {
    let range = ub - lb;
    // A degenerate range maps everything onto the lower end of the target range.
    if range.abs() < f64::EPSILON {
        let target = if inverse { lb } else { 0.0 };
        values.for_each(|v| *v = target);
    } else if inverse {
        values.for_each(|v| *v = *v * range + lb);
    } else {
        values.for_each(|v| *v = (*v - lb) / range);
    }
}

impl Normalization for Matrix<f64> {
    fn to_unity(&mut self, lb: f64, ub: f64) {
        rescale(self.iter_mut(), lb, ub, false);
    }

    fn from_unity(&mut self, lb: f64, ub: f64) {
        rescale(self.iter_mut(), lb, ub, true);
    }
}

impl Normalization for Vector<f64> {
    fn to_unity(&mut self, lb: f64, ub: f64) {
        rescale(self.iter_mut(), lb, ub, false);
    }

    fn from_unity(&mut self, lb: f64, ub: f64) {
        rescale(self.iter_mut(), lb, ub, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_and_from_unity() {
        let mut m = Matrix::from_rows(&[vec![0.0, 127.5, 255.0]]).unwrap();
        m.to_unity(0.0, 255.0);
        assert_eq!(m, Matrix::from_rows(&[vec![0.0, 0.5, 1.0]]).unwrap());
        m.from_unity(-1.0, 1.0);
        assert_eq!(m, Matrix::from_rows(&[vec![-1.0, 0.0, 1.0]]).unwrap());
    }

    #[test]
    fn test_degenerate_range() {
        let mut v = Vector::from_vec(vec![3.0, 4.0]);
        v.to_unity(2.0, 2.0);
        assert_eq!(v.to_vec(), vec![0.0, 0.0]);
        v.from_unity(2.0, 2.0);
        assert_eq!(v.to_vec(), vec![2.0, 2.0]);
    }
}
