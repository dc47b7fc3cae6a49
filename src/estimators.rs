// src/estimators.rs

//! Streaming empirical kinship estimators.
//!
//! Every estimator consumes one genotype vector per variant site (dosages
//! `0`, `1`, `2`, or a negative value for a missing call) and folds it into
//! the lower triangle of a [`KinshipMatrix`]. `calculate` normalizes the running
//! sums and mirrors the matrix into full symmetry.

use crate::error::{KinshipError, Result};
use crate::matrix::KinshipMatrix;
use log::{debug, trace};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Sentinel dosage for a missing call.
pub const MISSING_DOSAGE: f64 = -9.0;

/// Recentered Balding-Nicols dosages below this value came from a missing call.
const BN_MISSING_GUARD: f64 = -5.0;

/// Internal genotype code for a missing call in the imputation table.
const IMPUTE_MISSING_CODE: usize = 3;

/// Which empirical estimator to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KinshipMethod {
    /// Identity-by-state, skipping pairs where both calls are missing.
    #[default]
    Ibs,
    /// Identity-by-state with missing calls imputed from the site frequency.
    IbsImpute,
    /// Balding-Nicols allele-frequency-normalized estimator.
    BaldingNicols,
}

/// Common capability of the empirical estimators.
///
/// Lifecycle: `add_genotype` zero or more times, `calculate` once, then read
/// the result through `kinship`. `clear` returns the estimator to its freshly
/// constructed state.
pub trait EmpiricalKinship: Send {
    /// Folds one site into the accumulator. A rejected site leaves the state untouched.
    fn add_genotype(&mut self, genotype: &[f64]) -> Result<()>;

    /// Normalizes the accumulated sums and mirrors the matrix. A no-op after the first call.
    fn calculate(&mut self);

    fn kinship(&self) -> &KinshipMatrix;

    fn clear(&mut self);

    /// Number of sites incorporated so far.
    fn num_sites(&self) -> usize;

    fn method(&self) -> KinshipMethod;
}

/// Rejects the site if a dosage is above 2 or not finite, or if the vector
/// length disagrees with an already allocated accumulator.
fn validate_site(genotype: &[f64], expected_len: Option<usize>) -> Result<()> {
    if let Some(expected) = expected_len {
        if genotype.len() != expected {
            return Err(KinshipError::GenotypeLengthMismatch {
                expected,
                found: genotype.len(),
            });
        }
    }
    match genotype
        .iter()
        .enumerate()
        .find(|(_, &g)| g > 2.0 || !g.is_finite())
    {
        Some((index, &value)) => Err(KinshipError::InvalidGenotype { index, value }),
        None => Ok(()),
    }
}

fn normalize_and_mirror(k: &mut KinshipMatrix, divisor: f64) {
    let n = k.dim();
    for i in 0..n {
        for j in 0..=i {
            k[(i, j)] /= divisor;
        }
    }
    k.mirror_lower();
}

// --- IBS, skipping missing pairs ---

/// Identity-by-state kinship averaged per pair over the sites where the pair has data.
///
/// ```text
///      0   1   2
///  0   2   1   0
///  1   1   2   1
///  2   0   1   2
/// ```
///
/// A pair contributes `2 - |g_i - g_j|` (dosages truncated to integers) whenever at
/// least one of the two calls is present, and each cell is divided by its own
/// count of contributing sites.
#[derive(Clone, Debug, Default)]
pub struct IbsKinship {
    k: KinshipMatrix,
    count: Array2<u32>,
    n: usize,
    calculated: bool,
}

impl IbsKinship {
    pub fn new() -> Self {
        Self {
            k: KinshipMatrix::new(),
            count: Array2::zeros((0, 0)),
            n: 0,
            calculated: false,
        }
    }

    /// Number of sites that contributed to the pair `(i, j)`.
    pub fn pair_count(&self, i: usize, j: usize) -> Option<u32> {
        let (row, col) = if i >= j { (i, j) } else { (j, i) };
        self.count.get((row, col)).copied()
    }
}

impl EmpiricalKinship for IbsKinship {
    fn add_genotype(&mut self, genotype: &[f64]) -> Result<()> {
        if self.calculated {
            return Err(KinshipError::AlreadyCalculated);
        }
        validate_site(genotype, (self.n > 0).then(|| self.k.dim()))?;
        let num_individuals = genotype.len();
        if self.n == 0 {
            debug!("Allocating {}x{} IBS accumulator.", num_individuals, num_individuals);
            self.k.resize(num_individuals);
            self.count = Array2::zeros((num_individuals, num_individuals));
        }

        for i in 0..num_individuals {
            let gi = genotype[i];
            for j in 0..=i {
                let gj = genotype[j];
                if gi >= 0.0 || gj >= 0.0 {
                    let distance = ((gi as i64) - (gj as i64)).abs() as f64;
                    self.k[(i, j)] += 2.0 - distance;
                    self.count[[i, j]] += 1;
                }
            }
        }
        self.n += 1;
        trace!("IBS site {} incorporated.", self.n);
        Ok(())
    }

    fn calculate(&mut self) {
        if self.calculated {
            return;
        }
        self.calculated = true;
        if self.n == 0 {
            return;
        }
        let n = self.k.dim();
        for i in 0..n {
            for j in 0..=i {
                let c = self.count[[i, j]];
                if c > 0 {
                    self.k[(i, j)] /= c as f64;
                }
            }
        }
        self.k.mirror_lower();
        debug!("IBS kinship calculated from {} sites.", self.n);
    }

    fn kinship(&self) -> &KinshipMatrix {
        &self.k
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    fn num_sites(&self) -> usize {
        self.n
    }

    fn method(&self) -> KinshipMethod {
        KinshipMethod::Ibs
    }
}

// --- IBS with imputation ---

/// Identity-by-state kinship where a missing call is replaced by its expected
/// contribution given the observed site mean `p`:
///
/// ```text
///           0          1     2     missing
///  0        2          1     0     2(1-p)
///  1        1          2     1     1
///  2        0          1     2     2p
///  missing  2(1-p)     1     2p    2-4p(1-p)
/// ```
#[derive(Clone, Debug, Default)]
pub struct IbsImputeKinship {
    k: KinshipMatrix,
    geno: Vec<usize>,
    n: usize,
    calculated: bool,
    double_count_sites: bool,
}

impl IbsImputeKinship {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes by twice the number of accepted sites.
    pub fn with_double_site_count() -> Self {
        Self {
            double_count_sites: true,
            ..Self::default()
        }
    }

    fn divisor(&self) -> f64 {
        if self.double_count_sites {
            2.0 * self.n as f64
        } else {
            self.n as f64
        }
    }
}

fn imputation_table(p: f64) -> [[f64; 4]; 4] {
    let miss_vs_ref = 2.0 * (1.0 - p);
    let miss_vs_alt = 2.0 * p;
    let miss_vs_miss = 2.0 - 4.0 * p * (1.0 - p);
    [
        [2.0, 1.0, 0.0, miss_vs_ref],
        [1.0, 2.0, 1.0, 1.0],
        [0.0, 1.0, 2.0, miss_vs_alt],
        [miss_vs_ref, 1.0, miss_vs_alt, miss_vs_miss],
    ]
}

impl EmpiricalKinship for IbsImputeKinship {
    fn add_genotype(&mut self, genotype: &[f64]) -> Result<()> {
        if self.calculated {
            return Err(KinshipError::AlreadyCalculated);
        }
        validate_site(genotype, (self.n > 0).then(|| self.k.dim()))?;
        let num_individuals = genotype.len();
        if self.n == 0 {
            debug!("Allocating {}x{} imputed IBS accumulator.", num_individuals, num_individuals);
            self.k.resize(num_individuals);
        }

        self.geno.clear();
        let mut sum = 0.0;
        let mut non_missing = 0usize;
        for &g in genotype {
            if g < 0.0 {
                self.geno.push(IMPUTE_MISSING_CODE);
            } else {
                self.geno.push(g as usize);
                sum += g;
                non_missing += 1;
            }
        }
        let p = if non_missing > 0 {
            sum / non_missing as f64
        } else {
            0.0
        };
        let table = imputation_table(p);

        for i in 0..num_individuals {
            let row = &table[self.geno[i]];
            for j in 0..=i {
                self.k[(i, j)] += row[self.geno[j]];
            }
        }
        self.n += 1;
        trace!("Imputed IBS site {} incorporated (p = {}).", self.n, p);
        Ok(())
    }

    fn calculate(&mut self) {
        if self.calculated {
            return;
        }
        self.calculated = true;
        if self.n == 0 {
            return;
        }
        let divisor = self.divisor();
        normalize_and_mirror(&mut self.k, divisor);
        debug!(
            "Imputed IBS kinship calculated from {} sites (divisor {}).",
            self.n, divisor
        );
    }

    fn kinship(&self) -> &KinshipMatrix {
        &self.k
    }

    fn clear(&mut self) {
        let double_count_sites = self.double_count_sites;
        *self = Self {
            double_count_sites,
            ..Self::default()
        };
    }

    fn num_sites(&self) -> usize {
        self.n
    }

    fn method(&self) -> KinshipMethod {
        KinshipMethod::IbsImpute
    }
}

// --- Balding-Nicols ---

/// Balding-Nicols kinship: dosages are centered on the site mean `2p` and each
/// product is scaled by `1 / (2p(1-p))`, expressed through the mean as
/// `sqrt(1 / ((1 - mean/2) * mean))`.
///
/// The per-site pair loop runs on the rayon thread pool, one accumulator row per task.
#[derive(Clone, Debug, Default)]
pub struct BaldingNicolsKinship {
    k: KinshipMatrix,
    geno: Vec<f64>,
    n: usize,
    calculated: bool,
}

impl BaldingNicolsKinship {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmpiricalKinship for BaldingNicolsKinship {
    fn add_genotype(&mut self, genotype: &[f64]) -> Result<()> {
        if self.calculated {
            return Err(KinshipError::AlreadyCalculated);
        }
        validate_site(genotype, (self.n > 0).then(|| self.k.dim()))?;
        let num_individuals = genotype.len();
        if self.n == 0 {
            debug!("Allocating {}x{} Balding-Nicols accumulator.", num_individuals, num_individuals);
            self.k.resize(num_individuals);
        }

        self.geno.clear();
        let mut sum = 0.0;
        let mut non_missing = 0usize;
        for &g in genotype {
            if g < 0.0 {
                self.geno.push(MISSING_DOSAGE);
            } else {
                self.geno.push(g);
                sum += g;
                non_missing += 1;
            }
        }
        let mut mean = 0.0;
        let mut scale = 0.0;
        if non_missing > 0 {
            mean = sum / non_missing as f64;
            // mean = 2p, var = 2p(1-p)
            let variance = (1.0 - mean / 2.0) * mean;
            if variance > 0.0 {
                scale = (1.0 / variance).sqrt();
            }
        }
        for g in self.geno.iter_mut() {
            *g -= mean;
        }

        let geno = &self.geno;
        self.k
            .as_array_mut()
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                let gi = geno[i];
                for j in 0..=i {
                    let gj = geno[j];
                    if gi >= BN_MISSING_GUARD || gj >= BN_MISSING_GUARD {
                        row[j] += (gi * gj) * scale;
                    }
                }
            });

        self.n += 1;
        trace!("Balding-Nicols site {} incorporated (mean = {}, scale = {}).", self.n, mean, scale);
        Ok(())
    }

    fn calculate(&mut self) {
        if self.calculated {
            return;
        }
        self.calculated = true;
        if self.n == 0 {
            return;
        }
        normalize_and_mirror(&mut self.k, self.n as f64);
        debug!("Balding-Nicols kinship calculated from {} sites.", self.n);
    }

    fn kinship(&self) -> &KinshipMatrix {
        &self.k
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn num_sites(&self) -> usize {
        self.n
    }

    fn method(&self) -> KinshipMethod {
        KinshipMethod::BaldingNicols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const M: f64 = MISSING_DOSAGE;

    fn run<E: EmpiricalKinship>(mut estimator: E, sites: &[Vec<f64>]) -> E {
        for site in sites {
            estimator.add_genotype(site).unwrap();
        }
        estimator.calculate();
        estimator
    }

    #[test]
    fn ibs_hand_computed_scenario() {
        let est = run(IbsKinship::new(), &[vec![0.0, 1.0, 2.0], vec![0.0, 0.0, M]]);
        let k = est.kinship();
        assert_eq!(k.dim(), 3);
        // site1: 2-|0-1| = 1, site2: 2-|0-0| = 2, two contributing sites
        assert_eq!(k[(0, 1)], 1.5);
        assert_eq!(k[(1, 0)], 1.5);
        assert_eq!(k[(0, 0)], 2.0);
        // individual 2 is missing at site2, so only site1 counts for its diagonal
        assert_eq!(k[(2, 2)], 2.0);
        assert_eq!(est.pair_count(2, 2), Some(1));
        assert_eq!(est.pair_count(0, 2), Some(2));
        // one-sided missing pairs still contribute, using the truncated sentinel
        assert_eq!(k[(2, 0)], (0.0 + (2.0 - 9.0)) / 2.0);
        assert!(k.is_symmetric(0.0));
    }

    #[test]
    fn ibs_pair_missing_everywhere_stays_zero() {
        let est = run(IbsKinship::new(), &[vec![M, M, 1.0], vec![M, M, 2.0]]);
        assert_eq!(est.kinship()[(1, 0)], 0.0);
        assert_eq!(est.kinship()[(0, 1)], 0.0);
        assert_eq!(est.pair_count(0, 1), Some(0));
        assert_eq!(est.kinship()[(2, 2)], 2.0);
    }

    #[test]
    fn impute_table_with_missing_call() {
        // p = (0 + 2) / 2 = 1
        let est = run(IbsImputeKinship::new(), &[vec![0.0, 2.0, M]]);
        let k = est.kinship();
        assert_eq!(k[(0, 0)], 2.0);
        assert_eq!(k[(1, 0)], 0.0);
        assert_eq!(k[(2, 0)], 0.0);
        assert_eq!(k[(2, 1)], 2.0);
        assert_eq!(k[(2, 2)], 2.0);
        assert!(k.is_symmetric(0.0));
    }

    #[test]
    fn impute_normalizes_by_true_site_count() {
        let sites = vec![vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 0.0], vec![2.0, M, 2.0]];
        let single = run(IbsImputeKinship::new(), &sites);
        assert_eq!(single.num_sites(), 3);
        assert_eq!(single.kinship()[(0, 0)], 2.0);
        assert_eq!(single.kinship()[(2, 2)], 2.0);
        // both-missing pair at p = 2 imputes 2 - 4*2*(1-2) = 10
        assert_abs_diff_eq!(single.kinship()[(1, 1)], 14.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn impute_legacy_double_count_halves_every_cell() {
        let sites = vec![vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 0.0], vec![2.0, M, 2.0]];
        let single = run(IbsImputeKinship::new(), &sites);
        let doubled = run(IbsImputeKinship::with_double_site_count(), &sites);
        assert_eq!(doubled.num_sites(), 3);
        assert_eq!(doubled.kinship()[(0, 0)], 1.0);
        for (a, b) in single
            .kinship()
            .as_array()
            .iter()
            .zip(doubled.kinship().as_array().iter())
        {
            assert_abs_diff_eq!(*a, 2.0 * *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn doubled_divisor_ignores_rejected_sites() {
        let mut est = IbsImputeKinship::with_double_site_count();
        est.add_genotype(&[0.0, 1.0, 2.0]).unwrap();
        assert!(est.add_genotype(&[0.0, 5.0, 2.0]).is_err());
        est.add_genotype(&[1.0, 1.0, 0.0]).unwrap();
        est.calculate();
        assert_eq!(est.num_sites(), 2);
        // 2 * 2 per site over a divisor of 2 * 2 accepted sites
        assert_eq!(est.kinship()[(0, 0)], 1.0);
    }

    #[test]
    fn balding_nicols_hand_computed_site() {
        let est = run(BaldingNicolsKinship::new(), &[vec![0.0, 1.0, 2.0]]);
        let k = est.kinship();
        let scale = 2.0_f64.sqrt();
        assert_abs_diff_eq!(k[(0, 0)], scale, epsilon = 1e-12);
        assert_abs_diff_eq!(k[(1, 0)], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(k[(2, 0)], -scale, epsilon = 1e-12);
        assert_abs_diff_eq!(k[(0, 2)], -scale, epsilon = 1e-12);
        assert_abs_diff_eq!(k[(2, 2)], scale, epsilon = 1e-12);
    }

    #[test]
    fn balding_nicols_missing_uses_recentered_sentinel() {
        // mean = 1, recentered = [-1, 1, -10]
        let est = run(BaldingNicolsKinship::new(), &[vec![0.0, 2.0, M]]);
        let k = est.kinship();
        let scale = 2.0_f64.sqrt();
        assert_abs_diff_eq!(k[(2, 0)], 10.0 * scale, epsilon = 1e-12);
        assert_eq!(k[(2, 2)], 0.0);
    }

    #[test]
    fn balding_nicols_monomorphic_site_contributes_nothing() {
        for value in [0.0, 1.0, 2.0] {
            let est = run(BaldingNicolsKinship::new(), &[vec![value; 4]]);
            assert!(est.kinship().as_array().iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn balding_nicols_all_missing_site_is_a_no_op() {
        let est = run(BaldingNicolsKinship::new(), &[vec![0.0, 1.0, 2.0], vec![M, M, M]]);
        let once = run(BaldingNicolsKinship::new(), &[vec![0.0, 1.0, 2.0]]);
        assert_eq!(est.num_sites(), 2);
        assert_abs_diff_eq!(est.kinship()[(0, 0)] * 2.0, once.kinship()[(0, 0)], epsilon = 1e-12);
    }

    #[test]
    fn invalid_genotype_is_rejected_without_mutation() {
        let mut est = IbsImputeKinship::new();
        let err = est.add_genotype(&[0.0, 3.0, 1.0]).unwrap_err();
        assert!(matches!(err, KinshipError::InvalidGenotype { index: 1, value } if value == 3.0));
        assert_eq!(est.num_sites(), 0);
        assert!(est.kinship().is_empty());

        est.add_genotype(&[0.0, 1.0, 1.0]).unwrap();
        assert!(est.add_genotype(&[0.0, 1.0, f64::NAN]).is_err());
        est.add_genotype(&[2.0, 1.0, 1.0]).unwrap();
        est.calculate();

        let reference = run(IbsImputeKinship::new(), &[vec![0.0, 1.0, 1.0], vec![2.0, 1.0, 1.0]]);
        assert_eq!(est.kinship(), reference.kinship());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut est = BaldingNicolsKinship::new();
        est.add_genotype(&[0.0, 1.0]).unwrap();
        let err = est.add_genotype(&[0.0, 1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            KinshipError::GenotypeLengthMismatch { expected: 2, found: 3 }
        ));
        assert!(err.is_site_rejection());
        assert_eq!(est.num_sites(), 1);
    }

    #[test]
    fn zero_sites_calculate_is_a_no_op() {
        let mut est = IbsKinship::new();
        est.calculate();
        assert!(est.kinship().is_empty());
        assert_eq!(est.num_sites(), 0);
    }

    #[test]
    fn calculate_twice_does_not_renormalize() {
        let mut est = IbsImputeKinship::new();
        est.add_genotype(&[0.0, 1.0]).unwrap();
        est.add_genotype(&[0.0, 2.0]).unwrap();
        est.calculate();
        let first = est.kinship().clone();
        est.calculate();
        assert_eq!(&first, est.kinship());
        assert!(matches!(
            est.add_genotype(&[0.0, 1.0]),
            Err(KinshipError::AlreadyCalculated)
        ));
    }

    #[test]
    fn clear_resets_to_fresh_state() {
        let sites = vec![vec![0.0, 1.0, 2.0], vec![1.0, M, 0.0], vec![2.0, 2.0, 1.0]];
        let fresh = run(IbsKinship::new(), &sites);

        let mut reused = run(IbsKinship::new(), &[vec![2.0, 2.0, 2.0], vec![M, 0.0, 1.0]]);
        reused.clear();
        assert_eq!(reused.num_sites(), 0);
        let reused = run(reused, &sites);
        assert_eq!(fresh.kinship(), reused.kinship());
    }
}
