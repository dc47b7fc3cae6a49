// Kinship matrices and their principal components

#![doc = include_str!("../README.md")]

pub mod error;
pub mod estimators;
pub mod linalg_backends;
pub mod matrix;
pub mod output;
pub mod pca;
pub mod pedigree;
pub mod pipeline;

pub use error::{KinshipError, Result};
pub use estimators::{
    BaldingNicolsKinship, EmpiricalKinship, IbsImputeKinship, IbsKinship, KinshipMethod, MISSING_DOSAGE,
};
pub use linalg_backends::{BackendEigh, EighOutput, LinAlgBackendProvider, NdarrayLinAlgBackend};
pub use matrix::KinshipMatrix;
pub use pca::KinshipPca;
pub use pedigree::{kinship_from_pedigree, Pedigree, Person};
pub use pipeline::{
    build_estimator, run_empirical, run_pedigree, write_outputs, GenotypeSite, KinshipConfig, KinshipRun,
    OutputReport, RunSummary,
};
