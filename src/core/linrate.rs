//! Per-pixel linear deformation rate estimation
//!
//! For every pixel the interferograms selected by the redundancy mask are
//! fitted with a generalized least-squares line through the origin,
//! `phase = rate * time_span`, weighted by the matching block of the full
//! variance-covariance matrix. Observations whose whitened residual exceeds
//! `sigma_multiplier` are dropped one at a time and the fit repeated; a final
//! estimate whose standard error exceeds `max_sigma` is discarded.

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::{
    CovarianceMatrix, InsarError, InsarResult, Interferogram, RedundancyMask,
};

/// Linear rate estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRateParams {
    /// Minimum number of observations needed to fit a pixel
    pub sample_threshold: usize,
    /// Whitened residual above which an observation is rejected
    pub sigma_multiplier: f64,
    /// Largest accepted rate standard error
    pub max_sigma: f64,
    /// Fit rows concurrently
    pub parallel: bool,
}

impl Default for LinearRateParams {
    fn default() -> Self {
        Self {
            sample_threshold: 3,
            sigma_multiplier: 3.0,
            max_sigma: 2.0,
            parallel: true,
        }
    }
}

/// Rate, standard error and sample count rasters.
///
/// `rate` and `error` are NaN where no estimate was retained; `samples` is
/// populated everywhere.
#[derive(Debug, Clone)]
pub struct RateResult {
    pub rate: Array2<f64>,
    pub error: Array2<f64>,
    pub samples: Array2<u32>,
}

impl RateResult {
    /// Number of pixels with a retained estimate
    pub fn estimated_pixels(&self) -> usize {
        self.rate.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Outcome for a single pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelFit {
    pub rate: f64,
    pub error: f64,
    pub samples: u32,
}

impl PixelFit {
    fn no_estimate(samples: usize) -> Self {
        Self {
            rate: f64::NAN,
            error: f64::NAN,
            samples: samples as u32,
        }
    }

    pub fn is_estimate(&self) -> bool {
        !self.rate.is_nan()
    }
}

/// Weighted least-squares fit of one observation subset
#[derive(Debug, Clone)]
struct WeightedFit {
    rate: f64,
    error: f64,
    /// Residuals `L^-1 (t * rate - phase)` with `L L^T = V`
    whitened_residuals: Vec<f64>,
}

/// Linear rate estimator
pub struct LinearRateEstimator {
    params: LinearRateParams,
}

impl LinearRateEstimator {
    pub fn new(params: LinearRateParams) -> Self {
        Self { params }
    }

    /// Estimator with default parameters
    pub fn standard() -> Self {
        Self::new(LinearRateParams::default())
    }

    /// Estimate rate, error and sample count for every pixel.
    ///
    /// Without a redundancy mask every interferogram is a candidate at every
    /// pixel.
    pub fn estimate(
        &self,
        ifgs: &[Interferogram],
        vcm: &CovarianceMatrix,
        mst: Option<&RedundancyMask>,
    ) -> InsarResult<RateResult> {
        let (rows, cols) = self.validate_inputs(ifgs, vcm, mst)?;

        log::info!(
            "Estimating linear rate for {}x{} pixels from {} interferograms",
            rows,
            cols,
            ifgs.len()
        );
        log::debug!("Linear rate parameters: {:?}", self.params);

        let spans: Vec<f64> = ifgs.iter().map(|ifg| ifg.time_span).collect();
        let fit_row = |row: usize| -> Vec<PixelFit> {
            (0..cols)
                .map(|col| {
                    let candidates: Vec<usize> = (0..ifgs.len())
                        .filter(|&k| mst.map_or(true, |m| m[[k, row, col]]))
                        .collect();
                    let obs: Vec<f64> = ifgs
                        .iter()
                        .map(|ifg| ifg.phase_data[[row, col]] as f64)
                        .collect();
                    self.fit_pixel(&spans, &obs, candidates, vcm)
                })
                .collect()
        };

        let fitted_rows = self.map_rows(rows, fit_row);

        let mut result = RateResult {
            rate: Array2::from_elem((rows, cols), f64::NAN),
            error: Array2::from_elem((rows, cols), f64::NAN),
            samples: Array2::zeros((rows, cols)),
        };
        for (row, fits) in fitted_rows.into_iter().enumerate() {
            for (col, fit) in fits.into_iter().enumerate() {
                result.rate[[row, col]] = fit.rate;
                result.error[[row, col]] = fit.error;
                result.samples[[row, col]] = fit.samples;
            }
        }

        log::info!(
            "Linear rate retained for {} of {} pixels",
            result.estimated_pixels(),
            rows * cols
        );
        Ok(result)
    }

    /// Fit a single pixel.
    ///
    /// `obs` holds the pixel's phase in every interferogram, `candidates` the
    /// indices the redundancy mask selected. NaN observations are skipped.
    pub fn fit_pixel(
        &self,
        spans: &[f64],
        obs: &[f64],
        candidates: Vec<usize>,
        vcm: &CovarianceMatrix,
    ) -> PixelFit {
        let mut ind: Vec<usize> = candidates.into_iter().filter(|&k| !obs[k].is_nan()).collect();
        let threshold = self.params.sample_threshold.max(1);

        while ind.len() >= threshold {
            let fit = match weighted_fit(spans, obs, vcm, &ind) {
                Some(fit) => fit,
                None => {
                    log::debug!("Singular system for observations {:?}", ind);
                    return PixelFit::no_estimate(ind.len());
                }
            };

            let (worst, max_ratio) = fit
                .whitened_residuals
                .iter()
                .map(|r| r.abs())
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, r)| {
                    if r > best.1 {
                        (i, r)
                    } else {
                        best
                    }
                });

            if max_ratio > self.params.sigma_multiplier {
                ind.remove(worst);
                continue;
            }

            if fit.error > self.params.max_sigma {
                return PixelFit::no_estimate(ind.len());
            }
            return PixelFit {
                rate: fit.rate,
                error: fit.error,
                samples: ind.len() as u32,
            };
        }

        PixelFit::no_estimate(ind.len())
    }

    fn validate_inputs(
        &self,
        ifgs: &[Interferogram],
        vcm: &CovarianceMatrix,
        mst: Option<&RedundancyMask>,
    ) -> InsarResult<(usize, usize)> {
        let n = ifgs.len();
        if n == 0 {
            return Err(InsarError::InvalidInput(
                "No interferograms supplied for rate estimation".to_string(),
            ));
        }
        let (rows, cols) = ifgs[0].shape();
        if let Some(i) = ifgs.iter().position(|ifg| ifg.shape() != (rows, cols)) {
            return Err(InsarError::InvalidInput(format!(
                "Interferogram {} has shape {:?}, expected {:?}",
                i,
                ifgs[i].shape(),
                (rows, cols)
            )));
        }
        if vcm.dim() != (n, n) {
            return Err(InsarError::InvalidInput(format!(
                "Covariance matrix is {:?}, expected ({}, {})",
                vcm.dim(),
                n,
                n
            )));
        }
        if let Some(mask) = mst {
            if mask.dim() != (n, rows, cols) {
                return Err(InsarError::InvalidInput(format!(
                    "Redundancy mask is {:?}, expected ({}, {}, {})",
                    mask.dim(),
                    n,
                    rows,
                    cols
                )));
            }
        }
        let asymmetric = (0..n)
            .flat_map(|i| (0..i).map(move |j| (i, j)))
            .any(|(i, j)| (vcm[[i, j]] - vcm[[j, i]]).abs() > 1e-9 * vcm[[i, j]].abs().max(1.0));
        if asymmetric {
            log::warn!("Covariance matrix is not symmetric, using its lower triangle");
        }
        Ok((rows, cols))
    }

    #[cfg(feature = "parallel")]
    fn map_rows<F>(&self, rows: usize, fit_row: F) -> Vec<Vec<PixelFit>>
    where
        F: Fn(usize) -> Vec<PixelFit> + Sync + Send,
    {
        use rayon::prelude::*;

        if self.params.parallel {
            (0..rows).into_par_iter().map(fit_row).collect()
        } else {
            (0..rows).map(fit_row).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn map_rows<F>(&self, rows: usize, fit_row: F) -> Vec<Vec<PixelFit>>
    where
        F: Fn(usize) -> Vec<PixelFit>,
    {
        (0..rows).map(fit_row).collect()
    }
}

/// Estimate rate, error and sample count rasters for a stack.
pub fn estimate_rate(
    ifgs: &[Interferogram],
    vcm: &CovarianceMatrix,
    sample_threshold: usize,
    sigma_multiplier: f64,
    max_sigma: f64,
    mst: Option<&RedundancyMask>,
) -> InsarResult<RateResult> {
    let params = LinearRateParams {
        sample_threshold,
        sigma_multiplier,
        max_sigma,
        ..Default::default()
    };
    LinearRateEstimator::new(params).estimate(ifgs, vcm, mst)
}

/// Generalized least squares through the origin for the observations `ind`.
///
/// Returns `None` when the covariance block is not positive definite or the
/// time spans carry no information.
fn weighted_fit(
    spans: &[f64],
    obs: &[f64],
    vcm: &CovarianceMatrix,
    ind: &[usize],
) -> Option<WeightedFit> {
    let m = ind.len();
    if m == 0 {
        return None;
    }
    let block = DMatrix::from_fn(m, m, |i, j| vcm[[ind[i], ind[j]]]);
    let lower = block.cholesky()?.l();

    let t = DVector::from_iterator(m, ind.iter().map(|&k| spans[k]));
    let phase = DVector::from_iterator(m, ind.iter().map(|&k| obs[k]));
    let a = lower.solve_lower_triangular(&t)?;
    let b = lower.solve_lower_triangular(&phase)?;

    let normal = a.norm_squared();
    if !(normal > 0.0) {
        return None;
    }
    let rate = a.dot(&b) / normal;
    let error = (1.0 / normal).sqrt();
    let whitened_residuals = (&a * rate - &b).iter().copied().collect();

    Some(WeightedFit {
        rate,
        error,
        whitened_residuals,
    })
}
