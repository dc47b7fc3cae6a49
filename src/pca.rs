// Principal component analysis (PCA) of a kinship matrix

use crate::error::{KinshipError, Result};
use crate::linalg_backends::BackendEigh;
use crate::matrix::KinshipMatrix;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Eigendecomposition of a kinship matrix.
///
/// Eigenpairs are stored in descending-eigenvalue order: `eigenvalues[0]` is the
/// largest and `eigenvectors.column(0)` its unit-length eigenvector. The result
/// owns its data and never aliases the input matrix.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KinshipPca {
    /// Shape: (n_components)
    eigenvalues: Array1<f64>,
    /// Eigenvectors as columns.
    /// Shape: (n_individuals, n_components)
    eigenvectors: Array2<f64>,
}

impl KinshipPca {
    /// Decomposes `matrix` with the given backend.
    ///
    /// The matrix is copied and symmetrized as `(M + M^T) / 2` before solving,
    /// so a matrix with a stale upper triangle still yields real eigenpairs.
    ///
    /// # Errors
    /// Returns `EigenNonConvergence` if the input contains non-finite values, the
    /// backend fails, or the backend output has the wrong shape or non-finite entries.
    pub fn fit<B: BackendEigh<f64>>(matrix: &KinshipMatrix, backend: &B) -> Result<Self> {
        let n = matrix.dim();
        if matrix.as_array().iter().any(|v| !v.is_finite()) {
            return Err(KinshipError::eigen_non_convergence(
                "kinship matrix contains non-finite values",
            ));
        }

        let view = matrix.view();
        let solver_input: Array2<f64> = Array2::from_shape_fn((n, n), |(i, j)| 0.5 * (view[[i, j]] + view[[j, i]]));
        info!("Decomposing {}x{} kinship matrix.", n, n);

        let output = backend
            .eigh_upper(&solver_input)
            .map_err(|e| KinshipError::eigen_non_convergence(e.to_string()))?;

        if output.eigenvalues.len() != n || output.eigenvectors.dim() != (n, n) {
            return Err(KinshipError::eigen_non_convergence(format!(
                "solver returned {} eigenvalues and a {:?} eigenvector matrix for a {}x{} input",
                output.eigenvalues.len(),
                output.eigenvectors.dim(),
                n,
                n
            )));
        }
        if output
            .eigenvalues
            .iter()
            .chain(output.eigenvectors.iter())
            .any(|v| !v.is_finite())
        {
            return Err(KinshipError::eigen_non_convergence(
                "solver returned non-finite eigenpairs",
            ));
        }

        // Descending by eigenvalue.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            output.eigenvalues[b]
                .partial_cmp(&output.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let eigenvalues = order.iter().map(|&idx| output.eigenvalues[idx]).collect::<Array1<f64>>();
        let eigenvectors = output.eigenvectors.select(Axis(1), &order);
        debug!(
            "Largest eigenvalue {:?}, smallest {:?}.",
            eigenvalues.iter().next(),
            eigenvalues.iter().last()
        );

        Ok(Self { eigenvalues, eigenvectors })
    }

    /// Eigenvalues, largest first.
    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    /// Eigenvectors as columns, in the same order as `eigenvalues`.
    pub fn eigenvectors(&self) -> &Array2<f64> {
        &self.eigenvectors
    }

    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// The `k`-th component (0 = largest eigenvalue).
    pub fn component(&self, k: usize) -> Option<(f64, ArrayView1<'_, f64>)> {
        if k >= self.n_components() {
            return None;
        }
        Some((self.eigenvalues[k], self.eigenvectors.column(k)))
    }

    /// Loadings of individual `i` on every component, largest component first.
    pub fn loadings(&self, i: usize) -> Option<ArrayView1<'_, f64>> {
        if i >= self.eigenvectors.nrows() {
            return None;
        }
        Some(self.eigenvectors.row(i))
    }
}
