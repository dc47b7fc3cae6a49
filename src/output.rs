// src/output.rs

//! Tab-delimited writers for `<prefix>.kinship` and `<prefix>.pca`.

use crate::error::{KinshipError, Result};
use crate::matrix::KinshipMatrix;
use crate::pca::KinshipPca;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const KINSHIP_SUFFIX: &str = "kinship";
pub const PCA_SUFFIX: &str = "pca";

/// `<prefix>.<suffix>`, appending rather than replacing any extension already in the prefix.
pub fn output_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Family and individual name lists must agree with each other and with the matrix.
pub fn check_dimensions(family_names: &[String], individual_names: &[String], dim: usize) -> Result<()> {
    if family_names.len() != individual_names.len() {
        return Err(KinshipError::dimension_mismatch(format!(
            "{} family names but {} individual names",
            family_names.len(),
            individual_names.len()
        )));
    }
    if dim != individual_names.len() {
        return Err(KinshipError::dimension_mismatch(format!(
            "{}x{} matrix for {} individuals",
            dim,
            dim,
            individual_names.len()
        )));
    }
    Ok(())
}

fn tsv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .flexible(false)
        .from_writer(writer)
}

/// Writes the kinship table: header `FID IID <id-1> ... <id-n>`, then one row
/// per individual with its full row of kinship values.
pub fn write_kinship<W: Write>(
    writer: W,
    family_names: &[String],
    individual_names: &[String],
    matrix: &KinshipMatrix,
) -> Result<()> {
    check_dimensions(family_names, individual_names, matrix.dim())?;
    let mut wtr = tsv_writer(writer);

    let mut header = Vec::with_capacity(individual_names.len() + 2);
    header.push("FID".to_string());
    header.push("IID".to_string());
    header.extend(individual_names.iter().cloned());
    wtr.write_record(&header)?;

    for (i, (fid, iid)) in family_names.iter().zip(individual_names).enumerate() {
        let mut row = Vec::with_capacity(individual_names.len() + 2);
        row.push(fid.clone());
        row.push(iid.clone());
        row.extend(matrix.view().row(i).iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the PCA table: header `FID IID Lambda U1 ... Un`. Row `i` carries the
/// `i`-th largest eigenvalue, then the loadings of individual `i` on every
/// component, largest component first.
pub fn write_pca<W: Write>(
    writer: W,
    family_names: &[String],
    individual_names: &[String],
    pca: &KinshipPca,
) -> Result<()> {
    check_dimensions(family_names, individual_names, pca.n_components())?;
    let mut wtr = tsv_writer(writer);

    let mut header = Vec::with_capacity(individual_names.len() + 3);
    header.push("FID".to_string());
    header.push("IID".to_string());
    header.push("Lambda".to_string());
    header.extend((1..=pca.n_components()).map(|k| format!("U{}", k)));
    wtr.write_record(&header)?;

    let eigenvectors = pca.eigenvectors();
    for (i, (fid, iid)) in family_names.iter().zip(individual_names).enumerate() {
        let mut row = Vec::with_capacity(individual_names.len() + 3);
        row.push(fid.clone());
        row.push(iid.clone());
        row.push(pca.eigenvalues()[i].to_string());
        row.extend(eigenvectors.row(i).iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}
