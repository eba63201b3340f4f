use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Sub, SubAssign};

use log::{error, warn};
use ndarray::{s, Array2, NdFloat};
use ndarray_rand::RandomExt;
use num_traits::NumCast;
use rand::distributions::uniform::SampleUniform;
use rand::distributions::Uniform;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{NNError, Result};
use crate::tensor::{Fill, Vector};

/// Dense row-major matrix with value semantics.
///
/// Arithmetic never panics on mismatched shapes: the operation is logged and a
/// zero matrix is returned instead, so a single malformed sample cannot abort
/// a long training run. Element indexing through `Index` is bounds-checked and
/// panics out of range; `get` is the non-panicking form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    data: Array2<T>,
}

impl<T: NdFloat> Default for Matrix<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NdFloat> Matrix<T> {
    /// An empty 0×0 matrix, to be sized later with [`Matrix::init`].
    pub fn new() -> Self {
        Self { data: Array2::zeros((0, 0)) }
    }

    /// Replaces the buffer with a `rows × cols` one filled per `fill`.
    pub fn init(&mut self, rows: usize, cols: usize, fill: Fill<T>) {
        self.data = match fill {
            Fill::Zero => Array2::zeros((rows, cols)),
            Fill::One => Array2::ones((rows, cols)),
            Fill::Value(v) => Array2::from_elem((rows, cols), v),
            Fill::Identity => {
                let mut data = Array2::zeros((rows, cols));
                for i in 0..rows.min(cols) {
                    data[[i, i]] = T::one();
                }
                data
            }
        };
    }

    pub fn filled(rows: usize, cols: usize, fill: Fill<T>) -> Self {
        let mut m = Self::new();
        m.init(rows, cols, fill);
        m
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { data: Array2::zeros((rows, cols)) }
    }

    pub fn identity(n: usize) -> Self {
        Self::filled(n, n, Fill::Identity)
    }

    /// Builds a matrix from row-major data. Fails if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        let len = data.len();
        Array2::from_shape_vec((rows, cols), data)
            .map(|data| Self { data })
            .map_err(|_| {
                NNError::ShapeMismatch(format!(
                    "from_vec: {} elements cannot fill a {}x{} matrix",
                    len, rows, cols
                ))
            })
    }

    pub fn from_rows(rows: &[Vec<T>]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != cols) {
            return Err(NNError::ShapeMismatch(
                "from_rows: rows have different lengths".to_string(),
            ));
        }
        Self::from_vec(rows.len(), cols, rows.concat())
    }

    pub fn from_array(data: Array2<T>) -> Self {
        // Force standard (row-major, contiguous) layout.
        if data.is_standard_layout() {
            Self { data }
        } else {
            Self { data: data.as_standard_layout().to_owned() }
        }
    }

    /// Uniform random values in `[low, high)`.
    pub fn random<R: Rng + ?Sized>(rows: usize, cols: usize, low: T, high: T, rng: &mut R) -> Self
    where
        T: SampleUniform,
    {
        Self { data: Array2::random_using((rows, cols), Uniform::new(low, high), rng) }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_square(&self) -> bool {
        self.rows() == self.cols()
    }

    pub fn same_shape(&self, other: &Matrix<T>) -> bool {
        self.shape() == other.shape()
    }

    pub fn as_array(&self) -> &Array2<T> {
        &self.data
    }

    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        self.data.get((row, col)).copied()
    }

    /// Writes `value` at `(row, col)`. Returns `false` if out of range.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> bool {
        match self.data.get_mut((row, col)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => {
                error!(
                    "Matrix::set: index ({}, {}) out of range for {}x{}",
                    row,
                    col,
                    self.rows(),
                    self.cols()
                );
                false
            }
        }
    }

    /// Element at row-major flat index.
    pub fn get_flat(&self, index: usize) -> Option<T> {
        let cols = self.cols();
        if cols == 0 {
            return None;
        }
        self.get(index / cols, index % cols)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.data.iter_mut()
    }

    pub fn row(&self, row: usize) -> Option<Vector<T>> {
        (row < self.rows()).then(|| Vector::from_array(self.data.row(row).to_owned()))
    }

    pub fn col(&self, col: usize) -> Option<Vector<T>> {
        (col < self.cols()).then(|| Vector::from_array(self.data.column(col).to_owned()))
    }

    pub fn transpose(&self) -> Matrix<T> {
        Self::from_array(self.data.t().to_owned())
    }

    pub fn map<F: Fn(T) -> T>(&self, f: F) -> Matrix<T> {
        Self { data: self.data.mapv(f) }
    }

    pub fn map_inplace<F: Fn(T) -> T>(&mut self, f: F) {
        self.data.mapv_inplace(f);
    }

    pub fn scale(&self, factor: T) -> Matrix<T> {
        self.map(|v| v * factor)
    }

    /// Elementwise product.
    pub fn hadamard(&self, other: &Matrix<T>) -> Matrix<T> {
        if !self.same_shape(other) {
            report_mismatch("hadamard", self.shape(), other.shape());
            return Self::zeros(self.rows(), self.cols());
        }
        Self { data: &self.data * &other.data }
    }

    pub fn sum(&self) -> T {
        self.data.sum()
    }

    /// Largest element and its row-major flat index. The first maximum wins on ties.
    pub fn max(&self) -> Option<(T, usize)> {
        let mut best: Option<(T, usize)> = None;
        for (i, &v) in self.data.iter().enumerate() {
            match best {
                Some((b, _)) if v <= b => {}
                _ => best = Some((v, i)),
            }
        }
        best
    }

    /// Matrix rotated by 180 degrees (flipped on both axes).
    pub fn rot180(&self) -> Matrix<T> {
        Self::from_array(self.data.slice(s![..;-1, ..;-1]).to_owned())
    }

    /// Copy of the `rows × cols` block whose top-left corner is `(row, col)`.
    /// Returns `None` if the block leaves the matrix.
    pub fn window(&self, row: usize, col: usize, rows: usize, cols: usize) -> Option<Matrix<T>> {
        if row + rows > self.rows() || col + cols > self.cols() {
            return None;
        }
        Some(Self::from_array(
            self.data.slice(s![row..row + rows, col..col + cols]).to_owned(),
        ))
    }

    /// Matrix product `self · other`.
    pub fn matmul(&self, other: &Matrix<T>) -> Matrix<T> {
        if self.cols() != other.rows() {
            report_mismatch("matmul", self.shape(), other.shape());
            return Self::zeros(self.rows(), other.cols());
        }
        Self { data: self.data.dot(&other.data) }
    }

    /// Matrix-vector product `self · v`.
    pub fn mul_vector(&self, v: &Vector<T>) -> Vector<T> {
        if self.cols() != v.len() {
            error!(
                "Matrix::mul_vector: shape mismatch, matrix is {}x{} but vector has length {}",
                self.rows(),
                self.cols(),
                v.len()
            );
            return Vector::zeros(self.rows());
        }
        Vector::from_array(self.data.dot(v.as_array()))
    }

    /// Frobenius norm, `sqrt(Σ aᵢⱼ²)`.
    pub fn frobenius_norm(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, &v| acc + v * v).sqrt()
    }

    /// Induced 1-norm: largest absolute column sum.
    pub fn l1_norm(&self) -> T {
        self.data
            .columns()
            .into_iter()
            .map(|c| c.iter().fold(T::zero(), |acc, &v| acc + v.abs()))
            .fold(T::zero(), T::max)
    }

    /// Induced infinity norm: largest absolute row sum.
    pub fn infinity_norm(&self) -> T {
        self.data
            .rows()
            .into_iter()
            .map(|r| r.iter().fold(T::zero(), |acc, &v| acc + v.abs()))
            .fold(T::zero(), T::max)
    }

    /// Largest absolute element.
    pub fn max_norm(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, &v| acc.max(v.abs()))
    }

    /// Determinant by Gaussian elimination with partial pivoting.
    ///
    /// A non-square matrix reports the condition and yields zero; the 0×0
    /// matrix has determinant one.
    pub fn determinant(&self) -> T {
        if !self.is_square() {
            error!(
                "Matrix::determinant: requires a square matrix, got {}x{}",
                self.rows(),
                self.cols()
            );
            return T::zero();
        }
        let n = self.rows();
        let mut a = self.data.clone();
        let mut det = T::one();
        for k in 0..n {
            let pivot = pivot_row(&a, k);
            if a[[pivot, k]] == T::zero() {
                return T::zero();
            }
            if pivot != k {
                swap_rows(&mut a, pivot, k);
                det = -det;
            }
            let p = a[[k, k]];
            det = det * p;
            for i in k + 1..n {
                let factor = a[[i, k]] / p;
                for j in k..n {
                    let v = a[[k, j]];
                    a[[i, j]] -= factor * v;
                }
            }
        }
        det
    }

    /// Inverse by Gauss-Jordan elimination.
    pub fn try_inverse(&self) -> Result<Matrix<T>> {
        if !self.is_square() {
            return Err(NNError::ShapeMismatch(format!(
                "inverse: requires a square matrix, got {}x{}",
                self.rows(),
                self.cols()
            )));
        }
        let n = self.rows();
        let mut a = self.data.clone();
        let mut inv = Array2::<T>::eye(n);
        let tolerance = self.pivot_tolerance();
        for k in 0..n {
            let pivot = pivot_row(&a, k);
            if a[[pivot, k]].abs() <= tolerance {
                return Err(NNError::SingularMatrix(format!(
                    "inverse: {}x{} matrix has no pivot in column {}",
                    n, n, k
                )));
            }
            swap_rows(&mut a, pivot, k);
            swap_rows(&mut inv, pivot, k);
            let p = a[[k, k]];
            a.row_mut(k).mapv_inplace(|v| v / p);
            inv.row_mut(k).mapv_inplace(|v| v / p);
            for i in 0..n {
                if i == k {
                    continue;
                }
                let factor = a[[i, k]];
                if factor == T::zero() {
                    continue;
                }
                for j in 0..n {
                    let (av, iv) = (a[[k, j]], inv[[k, j]]);
                    a[[i, j]] -= factor * av;
                    inv[[i, j]] -= factor * iv;
                }
            }
        }
        Ok(Self { data: inv })
    }

    /// Inverse, or a zero matrix of the same shape when the matrix is singular
    /// or not square.
    pub fn inverse(&self) -> Matrix<T> {
        match self.try_inverse() {
            Ok(inv) => inv,
            Err(err) => {
                warn!("Matrix::inverse: {}", err);
                Self::zeros(self.rows(), self.cols())
            }
        }
    }

    /// Numerical rank from row-echelon form. Zero-size matrices have rank 0.
    pub fn rank(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let (rows, cols) = self.shape();
        let mut a = self.data.clone();
        let tolerance = self.pivot_tolerance();
        let mut rank = 0;
        for col in 0..cols {
            if rank == rows {
                break;
            }
            let mut pivot = rank;
            for i in rank + 1..rows {
                if a[[i, col]].abs() > a[[pivot, col]].abs() {
                    pivot = i;
                }
            }
            if a[[pivot, col]].abs() <= tolerance {
                continue;
            }
            swap_rows(&mut a, pivot, rank);
            let p = a[[rank, col]];
            for i in rank + 1..rows {
                let factor = a[[i, col]] / p;
                for j in col..cols {
                    let v = a[[rank, j]];
                    a[[i, j]] -= factor * v;
                }
            }
            rank += 1;
        }
        rank
    }

    fn pivot_tolerance(&self) -> T {
        let n: T = NumCast::from(self.rows().max(self.cols())).unwrap_or_else(T::one);
        n * T::epsilon() * self.max_norm()
    }
}

fn pivot_row<T: NdFloat>(a: &Array2<T>, k: usize) -> usize {
    let mut pivot = k;
    for i in k + 1..a.nrows() {
        if a[[i, k]].abs() > a[[pivot, k]].abs() {
            pivot = i;
        }
    }
    pivot
}

fn swap_rows<T: NdFloat>(a: &mut Array2<T>, i: usize, j: usize) {
    if i == j {
        return;
    }
    for c in 0..a.ncols() {
        a.swap([i, c], [j, c]);
    }
}

fn report_mismatch(op: &str, left: (usize, usize), right: (usize, usize)) {
    error!(
        "Matrix::{}: shape mismatch, {}x{} vs {}x{}",
        op, left.0, left.1, right.0, right.1
    );
}

impl<T: NdFloat> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, index: (usize, usize)) -> &T {
        &self.data[[index.0, index.1]]
    }
}

impl<T: NdFloat> IndexMut<(usize, usize)> for Matrix<T> {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut T {
        &mut self.data[[index.0, index.1]]
    }
}

impl<'a, T: NdFloat> Add<&'a Matrix<T>> for &'a Matrix<T> {
    type Output = Matrix<T>;

    fn add(self, rhs: &'a Matrix<T>) -> Matrix<T> {
        if !self.same_shape(rhs) {
            report_mismatch("add", self.shape(), rhs.shape());
            return Matrix::zeros(self.rows(), self.cols());
        }
        Matrix { data: &self.data + &rhs.data }
    }
}

impl<T: NdFloat> Add for Matrix<T> {
    type Output = Matrix<T>;

    fn add(self, rhs: Matrix<T>) -> Matrix<T> {
        &self + &rhs
    }
}

impl<'a, T: NdFloat> Sub<&'a Matrix<T>> for &'a Matrix<T> {
    type Output = Matrix<T>;

    fn sub(self, rhs: &'a Matrix<T>) -> Matrix<T> {
        if !self.same_shape(rhs) {
            report_mismatch("sub", self.shape(), rhs.shape());
            return Matrix::zeros(self.rows(), self.cols());
        }
        Matrix { data: &self.data - &rhs.data }
    }
}

impl<T: NdFloat> Sub for Matrix<T> {
    type Output = Matrix<T>;

    fn sub(self, rhs: Matrix<T>) -> Matrix<T> {
        &self - &rhs
    }
}

impl<'a, T: NdFloat> Mul<&'a Matrix<T>> for &'a Matrix<T> {
    type Output = Matrix<T>;

    fn mul(self, rhs: &'a Matrix<T>) -> Matrix<T> {
        self.matmul(rhs)
    }
}

impl<T: NdFloat> Mul for Matrix<T> {
    type Output = Matrix<T>;

    fn mul(self, rhs: Matrix<T>) -> Matrix<T> {
        self.matmul(&rhs)
    }
}

impl<'a, T: NdFloat> Mul<&'a Vector<T>> for &'a Matrix<T> {
    type Output = Vector<T>;

    fn mul(self, rhs: &'a Vector<T>) -> Vector<T> {
        self.mul_vector(rhs)
    }
}

impl<T: NdFloat> Mul<T> for &Matrix<T> {
    type Output = Matrix<T>;

    fn mul(self, rhs: T) -> Matrix<T> {
        self.scale(rhs)
    }
}

impl<T: NdFloat> Mul<T> for Matrix<T> {
    type Output = Matrix<T>;

    fn mul(self, rhs: T) -> Matrix<T> {
        self.scale(rhs)
    }
}

// Compound assignment leaves the left operand untouched on mismatch.
impl<T: NdFloat> AddAssign<&Matrix<T>> for Matrix<T> {
    fn add_assign(&mut self, rhs: &Matrix<T>) {
        if !self.same_shape(rhs) {
            report_mismatch("add_assign", self.shape(), rhs.shape());
            return;
        }
        self.data += &rhs.data;
    }
}

impl<T: NdFloat> SubAssign<&Matrix<T>> for Matrix<T> {
    fn sub_assign(&mut self, rhs: &Matrix<T>) {
        if !self.same_shape(rhs) {
            report_mismatch("sub_assign", self.shape(), rhs.shape());
            return;
        }
        self.data -= &rhs.data;
    }
}

impl<T: NdFloat> fmt::Display for Matrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.data)
    }
}
