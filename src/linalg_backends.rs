// src/linalg_backends.rs

#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

use ndarray::{Array1, Array2};
use std::error::Error;
use std::marker::PhantomData;

// --- Trait Definitions ---

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues, in ascending order.
    pub eigenvalues: Array1<F>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvector_matrix.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<F>,
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVR or DSYEVD).
/// Implementers expect `matrix` to be symmetric and read its upper triangle.
/// An `Err` means the solver did not converge or could not run.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, Box<dyn Error + Send + Sync>>;
}

// --- NdarrayLinAlgBackend Implementation ---
use ndarray_linalg::{Eigh as NdLinalgEigh, UPLO};

/// LAPACK-backed solver through ndarray-linalg.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
    Box::new(e)
}

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, Box<dyn Error + Send + Sync>> {
        if matrix.is_empty() {
            return Ok(EighOutput { eigenvalues: Array1::zeros(0), eigenvectors: Array2::zeros((0, 0)) });
        }
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

// --- FaerLinAlgBackend Implementation ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendEigh, EighOutput};
    use bytemuck::Pod;
    use faer::traits::num_traits::Zero;
    use faer::traits::ComplexField;
    use faer::MatRef;
    use ndarray::{Array1, Array2, ShapeBuilder};
    use std::error::Error;

    fn to_dyn_error_faer(msg: String) -> Box<dyn Error + Send + Sync> {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg))
    }

    /// Pure-Rust solver through faer.
    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    fn faer_mat_to_ndarray<F: ComplexField + Copy + Pod + Zero>(
        faer_mat: MatRef<'_, F>,
    ) -> Result<Array2<F>, Box<dyn Error + Send + Sync>> {
        let nrows = faer_mat.nrows();
        let ncols = faer_mat.ncols();
        let mut data_vec = Vec::with_capacity(nrows * ncols);
        for j in 0..ncols {
            for i in 0..nrows {
                data_vec.push(faer_mat[(i, j)]);
            }
        }
        Array2::from_shape_vec((nrows, ncols).f(), data_vec).map_err(|e| {
            to_dyn_error_faer(format!("Failed to convert {}x{} faer matrix: {}", nrows, ncols, e))
        })
    }

    fn faer_col_to_ndarray_vec<F: ComplexField + Copy + Pod + Zero>(faer_col: faer::ColRef<'_, F>) -> Array1<F> {
        Array1::from_iter((0..faer_col.nrows()).map(|i| faer_col[i]))
    }

    impl BackendEigh<f64> for FaerLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, Box<dyn Error + Send + Sync>> {
            if matrix.nrows() != matrix.ncols() {
                return Err(to_dyn_error_faer("Matrix must be square for eigendecomposition.".to_string()));
            }
            if matrix.is_empty() {
                return Ok(EighOutput { eigenvalues: Array1::zeros(0), eigenvectors: Array2::zeros((0, 0)) });
            }
            let n = matrix.nrows();
            // Kinship matrices arrive in standard layout; anything else gets a contiguous copy.
            let contiguous = matrix.as_standard_layout();
            let slice = contiguous.as_slice().ok_or_else(|| {
                to_dyn_error_faer(format!("Failed to get slice from ndarray matrix ({}x{})", n, n))
            })?;
            let faer_mat_view = MatRef::from_row_major_slice(slice, n, n);
            let eig = faer_mat_view
                .self_adjoint_eigen(faer::Side::Upper)
                .map_err(|e| to_dyn_error_faer(format!("Faer eigendecomposition failed: {:?}", e)))?;
            Ok(EighOutput {
                eigenvalues: faer_col_to_ndarray_vec(eig.S().column_vector()),
                eigenvectors: faer_mat_to_ndarray(eig.U())?,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn faer_conversion_keeps_shape_and_values() {
            let mat = faer::Mat::<f64>::from_fn(2, 3, |i, j| (10 * i + j) as f64);
            let converted = faer_mat_to_ndarray(mat.as_ref()).unwrap();
            assert_eq!(converted.dim(), (2, 3));
            assert_eq!(converted[[1, 2]], 12.0);
            assert_eq!(converted[[0, 1]], 1.0);
        }
    }
}

#[cfg(feature = "backend_faer")]
pub use faer_specific_code::FaerLinAlgBackend;

// --- LinAlgBackendProvider Dispatch ---

/// Dispatches to the linear algebra backend selected by compile-time feature flags.
#[cfg(feature = "backend_faer")]
impl<F> BackendEigh<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendEigh<F>,
    faer_specific_code::FaerLinAlgBackend: BackendEigh<F>,
{
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, Box<dyn Error + Send + Sync>> {
        faer_specific_code::FaerLinAlgBackend.eigh_upper(matrix)
    }
}

/// Dispatches to the linear algebra backend selected by compile-time feature flags.
#[cfg(not(feature = "backend_faer"))]
impl<F> BackendEigh<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendEigh<F>,
{
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, Box<dyn Error + Send + Sync>> {
        NdarrayLinAlgBackend.eigh_upper(matrix)
    }
}
