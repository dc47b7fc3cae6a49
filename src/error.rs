// src/error.rs

//! Error types shared by the estimators, the pedigree constructor and the output layer.

use thiserror::Error;

/// Main error type for kinship operations.
#[derive(Error, Debug)]
pub enum KinshipError {
    /// A dosage outside `{0, 1, 2}` (or a non-finite value) was fed to an estimator.
    /// The whole site is rejected and the accumulator is left untouched.
    #[error("Invalid genotype {value} for individual {index}; dosages must be 0, 1, 2 or negative (missing)")]
    InvalidGenotype { index: usize, value: f64 },

    /// A genotype vector did not match the individual count fixed by the first accepted site.
    #[error("Genotype vector has {found} entries but the estimator expects {expected}")]
    GenotypeLengthMismatch { expected: usize, found: usize },

    /// `add_genotype` was called after `calculate`.
    #[error("Kinship has already been calculated; call clear() before adding more sites")]
    AlreadyCalculated,

    /// Identifier lists and matrix dimensions disagree at output time.
    #[error("Dimension mismatch: {message}")]
    DimensionMismatch { message: String },

    /// The symmetric eigensolver failed or produced non-finite output.
    #[error("Kinship decomposition failed: {message}")]
    EigenNonConvergence { message: String },

    /// A `KinshipConfig` value that cannot drive a run.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Pedigree records reference unknown parents or contain a cycle.
    #[error("Invalid pedigree: {message}")]
    InvalidPedigree { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Type alias for Results using KinshipError
pub type Result<T> = std::result::Result<T, KinshipError>;

impl KinshipError {
    pub fn dimension_mismatch(message: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            message: message.into(),
        }
    }

    pub fn eigen_non_convergence(message: impl Into<String>) -> Self {
        Self::EigenNonConvergence {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_pedigree(message: impl Into<String>) -> Self {
        Self::InvalidPedigree {
            message: message.into(),
        }
    }

    /// True for the per-site errors that a streaming caller should count and skip.
    pub fn is_site_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidGenotype { .. } | Self::GenotypeLengthMismatch { .. }
        )
    }
}
