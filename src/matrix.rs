// src/matrix.rs

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Square kinship matrix used both as the running accumulator of an estimator
/// and as the carrier of the final result.
///
/// While an estimator is accumulating, only the lower triangle (`row >= col`)
/// is maintained; `mirror_lower` restores full symmetry once the values are final.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KinshipMatrix {
    data: Array2<f64>,
}

impl KinshipMatrix {
    /// Creates an empty 0x0 matrix.
    pub fn new() -> Self {
        Self {
            data: Array2::zeros((0, 0)),
        }
    }

    /// Creates a zero-filled `n x n` matrix.
    pub fn zeros(n: usize) -> Self {
        Self {
            data: Array2::zeros((n, n)),
        }
    }

    /// Wraps an existing array. Returns `None` if the array is not square.
    pub fn from_array(data: Array2<f64>) -> Option<Self> {
        if data.nrows() != data.ncols() {
            return None;
        }
        Some(Self { data })
    }

    /// Number of individuals (rows == cols).
    pub fn dim(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Resizes to `n x n`. Existing values are discarded and the matrix is zero-filled.
    pub fn resize(&mut self, n: usize) {
        if self.dim() != n {
            self.data = Array2::zeros((n, n));
        } else {
            self.data.fill(0.0);
        }
    }

    /// Zero-fills every cell, keeping the dimension.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied()
    }

    /// Copies the lower triangle onto the upper triangle.
    pub fn mirror_lower(&mut self) {
        let n = self.dim();
        for i in 0..n {
            for j in 0..i {
                self.data[[j, i]] = self.data[[i, j]];
            }
        }
    }

    /// Checks `M[i][j] == M[j][i]` within `tolerance` for every pair.
    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.dim();
        (0..n).all(|i| (0..i).all(|j| (self.data[[i, j]] - self.data[[j, i]]).abs() <= tolerance))
    }

    pub fn trace(&self) -> f64 {
        self.data.diag().sum()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub(crate) fn as_array_mut(&mut self) -> &mut Array2<f64> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }
}

impl Index<(usize, usize)> for KinshipMatrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        &self.data[[row, col]]
    }
}

impl IndexMut<(usize, usize)> for KinshipMatrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        &mut self.data[[row, col]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn resize_zero_fills() {
        let mut m = KinshipMatrix::zeros(2);
        m[(1, 0)] = 3.0;
        m.resize(2);
        assert_eq!(m[(1, 0)], 0.0);
        m.resize(3);
        assert_eq!(m.dim(), 3);
        assert!(m.as_array().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn mirror_lower_restores_symmetry() {
        let mut m = KinshipMatrix::zeros(3);
        m[(1, 0)] = 0.5;
        m[(2, 0)] = -1.0;
        m[(2, 1)] = 0.25;
        assert!(!m.is_symmetric(0.0));
        m.mirror_lower();
        assert!(m.is_symmetric(0.0));
        assert_eq!(m[(0, 2)], -1.0);
        assert_eq!(m[(1, 2)], 0.25);
    }

    #[test]
    fn from_array_rejects_non_square() {
        assert!(KinshipMatrix::from_array(Array2::zeros((2, 3))).is_none());
        let m = KinshipMatrix::from_array(array![[1.0, 0.5], [0.5, 2.0]]).unwrap();
        assert_eq!(m.trace(), 3.0);
        assert_eq!(m.get(5, 0), None);
    }
}
