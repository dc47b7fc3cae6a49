// src/pipeline.rs

//! Drives genotype sites through an estimator (or a pedigree through the
//! constructor) and hands the finished matrix to the writers and the optional PCA.

use crate::error::{KinshipError, Result};
use crate::estimators::{
    BaldingNicolsKinship, EmpiricalKinship, IbsImputeKinship, IbsKinship, KinshipMethod, MISSING_DOSAGE,
};
use crate::linalg_backends::BackendEigh;
use crate::matrix::KinshipMatrix;
use crate::output::{self, KINSHIP_SUFFIX, PCA_SUFFIX};
use crate::pca::KinshipPca;
use crate::pedigree::{kinship_from_pedigree, Pedigree};
use log::{info, trace, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Run configuration handed in by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinshipConfig {
    /// Empirical estimator to use for genotype input.
    pub method: KinshipMethod,
    /// Decompose the finished matrix and write `<prefix>.pca`.
    pub perform_pca: bool,
    /// Normalize the imputing IBS estimator by twice the site count, as the legacy tool did.
    pub double_count_imputed_sites: bool,
    /// Dosage written for a missing call by `GenotypeSite::from_calls`. Must be negative.
    pub missing_dosage: f64,
}

impl KinshipConfig {
    /// Rejects settings no run can use.
    pub fn validate(&self) -> Result<()> {
        if !(self.missing_dosage.is_finite() && self.missing_dosage < 0.0) {
            return Err(KinshipError::invalid_config(format!(
                "missing_dosage must be a finite negative value, got {}",
                self.missing_dosage
            )));
        }
        Ok(())
    }
}

impl Default for KinshipConfig {
    fn default() -> Self {
        KinshipConfig {
            method: KinshipMethod::Ibs,
            perform_pca: false,
            double_count_imputed_sites: false,
            missing_dosage: MISSING_DOSAGE,
        }
    }
}

/// Genotype dosages of every individual at one retained site.
#[derive(Clone, Debug, PartialEq)]
pub struct GenotypeSite {
    pub id: String,
    pub dosages: Vec<f64>,
}

impl GenotypeSite {
    pub fn new(id: impl Into<String>, dosages: Vec<f64>) -> Self {
        Self { id: id.into(), dosages }
    }

    /// Builds a site from optional allele counts, writing `config.missing_dosage`
    /// for absent calls.
    pub fn from_calls(id: impl Into<String>, calls: &[Option<u8>], config: &KinshipConfig) -> Result<Self> {
        config.validate()?;
        let dosages = calls
            .iter()
            .map(|&call| call.map_or(config.missing_dosage, f64::from))
            .collect();
        Ok(Self { id: id.into(), dosages })
    }
}

/// Creates the estimator selected by `config.method`.
pub fn build_estimator(config: &KinshipConfig) -> Box<dyn EmpiricalKinship> {
    match config.method {
        KinshipMethod::Ibs => Box::new(IbsKinship::new()),
        KinshipMethod::IbsImpute if config.double_count_imputed_sites => {
            Box::new(IbsImputeKinship::with_double_site_count())
        }
        KinshipMethod::IbsImpute => Box::new(IbsImputeKinship::new()),
        KinshipMethod::BaldingNicols => Box::new(BaldingNicolsKinship::new()),
    }
}

/// Site counters of an empirical run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sites_seen: usize,
    pub sites_used: usize,
    pub sites_rejected: usize,
}

/// A finished kinship matrix with the identifiers of its rows.
#[derive(Clone, Debug)]
pub struct KinshipRun {
    pub family_names: Vec<String>,
    pub individual_names: Vec<String>,
    pub kinship: KinshipMatrix,
    pub summary: RunSummary,
}

/// Streams `sites` into the configured estimator and finalizes the matrix.
///
/// Sites whose length differs from `sample_names` or that contain invalid dosages
/// are logged, counted and skipped. A run with no usable site yields an all-zero
/// matrix. Sample names double as family ids in the output.
///
/// # Errors
/// Returns `InvalidConfig` before reading any site if `config` fails validation.
pub fn run_empirical<I>(config: &KinshipConfig, sample_names: &[String], sites: I) -> Result<KinshipRun>
where
    I: IntoIterator<Item = GenotypeSite>,
{
    config.validate()?;
    let num_individuals = sample_names.len();
    info!(
        "Create empirical kinship for {} individuals using {:?}.",
        num_individuals, config.method
    );
    let mut estimator = build_estimator(config);
    let mut summary = RunSummary::default();

    for site in sites {
        summary.sites_seen += 1;
        let outcome = if site.dosages.len() != num_individuals {
            Err(KinshipError::GenotypeLengthMismatch {
                expected: num_individuals,
                found: site.dosages.len(),
            })
        } else {
            estimator.add_genotype(&site.dosages)
        };
        match outcome {
            Ok(()) => {
                summary.sites_used += 1;
                trace!("Site {} added.", site.id);
            }
            Err(e) if e.is_site_rejection() => {
                summary.sites_rejected += 1;
                warn!("Skipping site {}: {}", site.id, e);
            }
            Err(e) => return Err(e),
        }
    }

    estimator.calculate();
    let kinship = if estimator.num_sites() == 0 {
        warn!("No sites were used; kinship matrix is all zeros.");
        KinshipMatrix::zeros(num_individuals)
    } else {
        estimator.kinship().clone()
    };
    info!(
        "Total {} sites seen, {} used to calculate kinship, {} rejected.",
        summary.sites_seen, summary.sites_used, summary.sites_rejected
    );

    Ok(KinshipRun {
        family_names: sample_names.to_vec(),
        individual_names: sample_names.to_vec(),
        kinship,
        summary,
    })
}

/// Builds the theoretical kinship matrix of `pedigree`.
pub fn run_pedigree(pedigree: &Pedigree) -> Result<KinshipRun> {
    info!("Create kinship from pedigree of {} people.", pedigree.len());
    let kinship = kinship_from_pedigree(pedigree)?;
    Ok(KinshipRun {
        family_names: pedigree.family_names(),
        individual_names: pedigree.person_names(),
        kinship,
        summary: RunSummary::default(),
    })
}

/// What `write_outputs` produced.
#[derive(Debug)]
pub struct OutputReport {
    pub kinship_path: PathBuf,
    pub pca_path: Option<PathBuf>,
    pub pca: Option<KinshipPca>,
    /// Set when PCA was requested but the decomposition failed.
    pub pca_error: Option<KinshipError>,
}

/// Writes `<prefix>.kinship` and, if `config.perform_pca` is set, decomposes the
/// matrix and writes `<prefix>.pca`.
///
/// # Errors
/// Dimension mismatches and I/O failures are returned. A failed decomposition is
/// not: it is logged and recorded in `OutputReport::pca_error`, and the kinship
/// file already written is kept.
pub fn write_outputs<B: BackendEigh<f64>>(
    run: &KinshipRun,
    prefix: &Path,
    config: &KinshipConfig,
    backend: &B,
) -> Result<OutputReport> {
    output::check_dimensions(&run.family_names, &run.individual_names, run.kinship.dim())?;

    let kinship_path = output::output_path(prefix, KINSHIP_SUFFIX);
    let file = File::create(&kinship_path)?;
    output::write_kinship(BufWriter::new(file), &run.family_names, &run.individual_names, &run.kinship)?;
    info!("Kinship matrix written to {}.", kinship_path.display());

    let mut report = OutputReport {
        kinship_path,
        pca_path: None,
        pca: None,
        pca_error: None,
    };
    if !config.perform_pca {
        return Ok(report);
    }

    match KinshipPca::fit(&run.kinship, backend) {
        Ok(pca) => {
            let pca_path = output::output_path(prefix, PCA_SUFFIX);
            let file = File::create(&pca_path)?;
            output::write_pca(BufWriter::new(file), &run.family_names, &run.individual_names, &pca)?;
            info!("PCA written to {}.", pca_path.display());
            report.pca_path = Some(pca_path);
            report.pca = Some(pca);
        }
        Err(e) => {
            warn!("{}", e);
            report.pca_error = Some(e);
        }
    }
    Ok(report)
}
