use crate::prelude::*;

/// Where the original data sits inside the padded canvas.
///
/// `Surround` centers it and grows each axis by twice the pad amount; the
/// corner variants anchor the data at the named corner and grow only on the
/// opposite side.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadPlacement {
    #[default]
    Surround,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// What the added cells hold.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadFill {
    #[default]
    Zero,
    /// Copy of the nearest border cell.
    Replicate,
}

impl PadPlacement {
    /// Total growth along one axis for a pad amount.
    pub fn extent(&self, pad: usize) -> usize {
        match self {
            Self::Surround => 2 * pad,
            _ => pad,
        }
    }

    /// Rows above and columns left of the data.
    fn leading(&self, pad_rows: usize, pad_cols: usize) -> (usize, usize) {
        match self {
            Self::Surround => (pad_rows, pad_cols),
            Self::TopLeft => (0, 0),
            Self::TopRight => (0, pad_cols),
            Self::BottomLeft => (pad_rows, 0),
            Self::BottomRight => (pad_rows, pad_cols),
        }
    }
}

/// Pads `matrix` by `pad_rows`/`pad_cols` according to `placement` and `fill`.
pub fn pad<T: NdFloat>(
    matrix: &Matrix<T>,
    placement: PadPlacement,
    fill: PadFill,
    pad_rows: usize,
    pad_cols: usize,
) -> Matrix<T> {
    let (rows, cols) = matrix.shape();
    let out_rows = padded_extent(rows, pad_rows, placement);
    let out_cols = padded_extent(cols, pad_cols, placement);
    let (top, left) = placement.leading(pad_rows, pad_cols);

    let mut out = Matrix::zeros(out_rows, out_cols);
    for r in 0..out_rows {
        for c in 0..out_cols {
            if let Some((sr, sc)) = source_cell(r, c, top, left, rows, cols, fill) {
                out[(r, c)] = matrix[(sr, sc)];
            }
        }
    }
    out
}

/// Length of an axis of `n` cells after padding it by `pad`.
pub fn padded_extent(n: usize, pad: usize, placement: PadPlacement) -> usize {
    n + placement.extent(pad)
}

fn source_cell(
    r: usize,
    c: usize,
    top: usize,
    left: usize,
    rows: usize,
    cols: usize,
    fill: PadFill,
) -> Option<(usize, usize)> {
    if rows == 0 || cols == 0 {
        return None;
    }
    let sr = r as isize - top as isize;
    let sc = c as isize - left as isize;
    let inside = (0..rows as isize).contains(&sr) && (0..cols as isize).contains(&sc);
    match fill {
        _ if inside => Some((sr as usize, sc as usize)),
        PadFill::Zero => None,
        PadFill::Replicate => Some((
            sr.clamp(0, rows as isize - 1) as usize,
            sc.clamp(0, cols as isize - 1) as usize,
        )),
    }
}

/// Padding policy carried by convolution and pooling configs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub cols: usize,
    #[serde(default)]
    pub placement: PadPlacement,
    #[serde(default)]
    pub fill: PadFill,
}

impl Padding {
    pub fn none() -> Self {
        Self::default()
    }

    /// Zero padding of `amount` on every side.
    pub fn zeros(amount: usize) -> Self {
        Self { rows: amount, cols: amount, ..Self::default() }
    }

    pub fn new(rows: usize, cols: usize, placement: PadPlacement, fill: PadFill) -> Self {
        Self { rows, cols, placement, fill }
    }

    pub fn is_none(&self) -> bool {
        self.rows == 0 && self.cols == 0
    }

    pub fn padded_shape(&self, rows: usize, cols: usize) -> (usize, usize) {
        (
            padded_extent(rows, self.rows, self.placement),
            padded_extent(cols, self.cols, self.placement),
        )
    }

    pub fn apply<T: NdFloat>(&self, matrix: &Matrix<T>) -> Matrix<T> {
        if self.is_none() {
            return matrix.clone();
        }
        pad(matrix, self.placement, self.fill, self.rows, self.cols)
    }

    /// Source cell of a `rows × cols` map that padded cell `(r, c)` was filled
    /// from, or `None` for a zero-filled cell.
    pub fn source_index(&self, r: usize, c: usize, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let (top, left) = self.placement.leading(self.rows, self.cols);
        source_cell(r, c, top, left, rows, cols, self.fill)
    }

    /// Routes a gradient over the padded canvas back onto the `rows × cols`
    /// source map. Replicated cells add onto the border cell they copied.
    pub fn fold_back(&self, padded: &Matrix<f64>, rows: usize, cols: usize) -> Matrix<f64> {
        let mut out = Matrix::zeros(rows, cols);
        for r in 0..padded.rows() {
            for c in 0..padded.cols() {
                if let Some((sr, sc)) = self.source_index(r, c, rows, cols) {
                    out[(sr, sc)] += padded[(r, c)];
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Matrix<f64> {
        Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap()
    }

    #[test]
    fn test_surround_zero() {
        let p = pad(&sample(), PadPlacement::Surround, PadFill::Zero, 1, 1);
        assert_eq!(p.shape(), (4, 4));
        assert_eq!(p[(0, 0)], 0.0);
        assert_eq!(p[(1, 1)], 1.0);
        assert_eq!(p[(2, 2)], 4.0);
        assert_eq!(p.sum(), 10.0);
    }

    #[test]
    fn test_corner_placements_grow_one_side() {
        let p = pad(&sample(), PadPlacement::TopLeft, PadFill::Zero, 1, 2);
        assert_eq!(p.shape(), (3, 4));
        assert_eq!(p[(0, 0)], 1.0);
        assert_eq!(p[(2, 3)], 0.0);

        let p = pad(&sample(), PadPlacement::BottomRight, PadFill::Zero, 1, 1);
        assert_eq!(p.shape(), (3, 3));
        assert_eq!(p[(0, 0)], 0.0);
        assert_eq!(p[(2, 2)], 4.0);

        assert_eq!(padded_extent(2, 1, PadPlacement::BottomRight), 3);
        assert_eq!(padded_extent(2, 1, PadPlacement::Surround), 4);

        let p = pad(&sample(), PadPlacement::TopRight, PadFill::Zero, 1, 1);
        assert_eq!(p[(0, 1)], 1.0);
        let p = pad(&sample(), PadPlacement::BottomLeft, PadFill::Zero, 1, 1);
        assert_eq!(p[(1, 0)], 1.0);
    }

    #[test]
    fn test_replicate_copies_border() {
        let p = pad(&sample(), PadPlacement::Surround, PadFill::Replicate, 1, 1);
        assert_eq!(p[(0, 0)], 1.0);
        assert_eq!(p[(0, 3)], 2.0);
        assert_eq!(p[(3, 0)], 3.0);
        assert_eq!(p[(3, 3)], 4.0);
    }

    #[test]
    fn test_pad_is_reproducible() {
        let a = pad(&sample(), PadPlacement::Surround, PadFill::Replicate, 2, 1);
        let b = pad(&sample(), PadPlacement::Surround, PadFill::Replicate, 2, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fold_back_sums_replicated_cells() {
        let padding = Padding::new(1, 1, PadPlacement::Surround, PadFill::Replicate);
        let grad = Matrix::filled(4, 4, Fill::One);
        let folded = padding.fold_back(&grad, 2, 2);
        // each corner source cell receives itself + 3 replicated neighbours
        assert_eq!(folded, Matrix::filled(2, 2, Fill::Value(4.0)));

        let folded = Padding::zeros(1).fold_back(&grad, 2, 2);
        assert_eq!(folded, Matrix::filled(2, 2, Fill::One));
    }
}
