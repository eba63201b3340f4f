use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Sub, SubAssign};

use log::error;
use ndarray::{Array1, Array2, Axis, NdFloat};
use serde::{Deserialize, Serialize};

use crate::tensor::{Fill, Matrix};

/// Dense column vector with value semantics. Mismatched operands follow the
/// same policy as [`Matrix`]: logged, zero result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Vector<T> {
    data: Array1<T>,
}

impl<T: NdFloat> Default for Vector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NdFloat> Vector<T> {
    pub fn new() -> Self {
        Self { data: Array1::zeros(0) }
    }

    pub fn init(&mut self, len: usize, fill: Fill<T>) {
        self.data = match fill {
            Fill::Zero => Array1::zeros(len),
            Fill::One | Fill::Identity => Array1::ones(len),
            Fill::Value(v) => Array1::from_elem(len, v),
        };
    }

    pub fn filled(len: usize, fill: Fill<T>) -> Self {
        let mut v = Self::new();
        v.init(len, fill);
        v
    }

    pub fn zeros(len: usize) -> Self {
        Self { data: Array1::zeros(len) }
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        Self { data: Array1::from_vec(data) }
    }

    pub fn from_array(data: Array1<T>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_array(&self) -> &Array1<T> {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.data.to_vec()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.data.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: T) -> bool {
        match self.data.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => {
                error!("Vector::set: index {} out of range for length {}", index, self.len());
                false
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.data.iter_mut()
    }

    pub fn map<F: Fn(T) -> T>(&self, f: F) -> Vector<T> {
        Self { data: self.data.mapv(f) }
    }

    pub fn scale(&self, factor: T) -> Vector<T> {
        self.map(|v| v * factor)
    }

    pub fn sum(&self) -> T {
        self.data.sum()
    }

    pub fn dot(&self, other: &Vector<T>) -> T {
        if self.len() != other.len() {
            report_mismatch("dot", self.len(), other.len());
            return T::zero();
        }
        self.data.dot(&other.data)
    }

    pub fn hadamard(&self, other: &Vector<T>) -> Vector<T> {
        if self.len() != other.len() {
            report_mismatch("hadamard", self.len(), other.len());
            return Self::zeros(self.len());
        }
        Self { data: &self.data * &other.data }
    }

    /// Outer product `self · otherᵀ`, a `self.len() × other.len()` matrix.
    pub fn outer(&self, other: &Vector<T>) -> Matrix<T> {
        let column = self.data.view().insert_axis(Axis(1));
        let row = other.data.view().insert_axis(Axis(0));
        Matrix::from_array(column.dot(&row))
    }

    /// The vector as a `len × 1` matrix.
    pub fn to_column(&self) -> Matrix<T> {
        let len = self.len();
        Matrix::from_array(
            Array2::from_shape_vec((len, 1), self.data.to_vec()).unwrap_or_else(|_| Array2::zeros((len, 1))),
        )
    }

    pub fn l1_norm(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, &v| acc + v.abs())
    }

    pub fn l2_norm(&self) -> T {
        self.dot(self).sqrt()
    }

    pub fn max_norm(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, &v| acc.max(v.abs()))
    }

    /// Index of the largest element, first one on ties.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(T, usize)> = None;
        for (i, &v) in self.data.iter().enumerate() {
            match best {
                Some((b, _)) if v <= b => {}
                _ => best = Some((v, i)),
            }
        }
        best.map(|(_, i)| i)
    }
}

fn report_mismatch(op: &str, left: usize, right: usize) {
    error!("Vector::{}: length mismatch, {} vs {}", op, left, right);
}

impl<T: NdFloat> Index<usize> for Vector<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.data[index]
    }
}

impl<T: NdFloat> IndexMut<usize> for Vector<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.data[index]
    }
}

impl<'a, T: NdFloat> Add<&'a Vector<T>> for &'a Vector<T> {
    type Output = Vector<T>;

    fn add(self, rhs: &'a Vector<T>) -> Vector<T> {
        if self.len() != rhs.len() {
            report_mismatch("add", self.len(), rhs.len());
            return Vector::zeros(self.len());
        }
        Vector { data: &self.data + &rhs.data }
    }
}

impl<T: NdFloat> Add for Vector<T> {
    type Output = Vector<T>;

    fn add(self, rhs: Vector<T>) -> Vector<T> {
        &self + &rhs
    }
}

impl<'a, T: NdFloat> Sub<&'a Vector<T>> for &'a Vector<T> {
    type Output = Vector<T>;

    fn sub(self, rhs: &'a Vector<T>) -> Vector<T> {
        if self.len() != rhs.len() {
            report_mismatch("sub", self.len(), rhs.len());
            return Vector::zeros(self.len());
        }
        Vector { data: &self.data - &rhs.data }
    }
}

impl<T: NdFloat> Sub for Vector<T> {
    type Output = Vector<T>;

    fn sub(self, rhs: Vector<T>) -> Vector<T> {
        &self - &rhs
    }
}

impl<T: NdFloat> Mul<T> for &Vector<T> {
    type Output = Vector<T>;

    fn mul(self, rhs: T) -> Vector<T> {
        self.scale(rhs)
    }
}

impl<T: NdFloat> Mul<T> for Vector<T> {
    type Output = Vector<T>;

    fn mul(self, rhs: T) -> Vector<T> {
        self.scale(rhs)
    }
}

impl<T: NdFloat> AddAssign<&Vector<T>> for Vector<T> {
    fn add_assign(&mut self, rhs: &Vector<T>) {
        if self.len() != rhs.len() {
            report_mismatch("add_assign", self.len(), rhs.len());
            return;
        }
        self.data += &rhs.data;
    }
}

impl<T: NdFloat> SubAssign<&Vector<T>> for Vector<T> {
    fn sub_assign(&mut self, rhs: &Vector<T>) {
        if self.len() != rhs.len() {
            report_mismatch("sub_assign", self.len(), rhs.len());
            return;
        }
        self.data -= &rhs.data;
    }
}

impl<T: NdFloat> From<Vec<T>> for Vector<T> {
    fn from(data: Vec<T>) -> Self {
        Self::from_vec(data)
    }
}

impl<T: NdFloat> fmt::Display for Vector<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill() {
        assert_eq!(Vector::<f64>::filled(3, Fill::Identity), Vector::from_vec(vec![1.0; 3]));
        assert_eq!(Vector::<f64>::filled(2, Fill::Value(2.5)).sum(), 5.0);
    }

    #[test]
    fn test_dot_and_outer() {
        let a = Vector::from_vec(vec![1.0, 2.0]);
        let b = Vector::from_vec(vec![3.0, 4.0, 5.0]);
        assert_eq!(a.dot(&a), 5.0);
        let o = a.outer(&b);
        assert_eq!(o.shape(), (2, 3));
        assert_eq!(o[(1, 2)], 10.0);
    }

    #[test]
    fn test_mismatch_is_neutral() {
        let a = Vector::from_vec(vec![1.0, 2.0]);
        let b = Vector::from_vec(vec![1.0]);
        assert_eq!(a.dot(&b), 0.0);
        assert_eq!(&a + &b, Vector::zeros(2));
        let mut c = a.clone();
        c -= &b;
        assert_eq!(c, a);
    }

    #[test]
    fn test_norms_and_argmax() {
        let a = Vector::from_vec(vec![3.0, -4.0, 1.0]);
        assert_eq!(a.l1_norm(), 8.0);
        assert_eq!(a.l2_norm(), 26f64.sqrt());
        assert_eq!(a.max_norm(), 4.0);
        assert_eq!(a.argmax(), Some(0));
        assert_eq!(Vector::<f64>::new().argmax(), None);
    }

    #[test]
    fn test_norms_share_matrix_names() {
        let v = Vector::from_vec(vec![-2.0, 1.0]);
        let m = v.to_column();
        assert_eq!(v.l1_norm(), m.l1_norm());
        assert_eq!(v.max_norm(), m.max_norm());
        assert_eq!(v.l2_norm(), m.frobenius_norm());

        let empty = Vector::<f64>::new();
        assert_eq!(empty.l1_norm(), 0.0);
        assert_eq!(empty.l2_norm(), 0.0);
        assert_eq!(empty.max_norm(), 0.0);
    }

    #[test]
    fn test_matrix_vector_product() {
        let m = Matrix::from_rows(&[vec![1.0, 1.0], vec![0.0, 2.0]]).unwrap();
        let v = Vector::from_vec(vec![2.0, 3.0]);
        assert_eq!(&m * &v, Vector::from_vec(vec![5.0, 6.0]));
    }
}
