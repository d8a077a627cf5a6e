//! Reference phase estimation
//!
//! Every interferogram carries an unknown scene-wide phase offset. This module
//! estimates that offset as a NaN-aware median, either over the whole scene
//! (restricted to pixels valid in every interferogram) or over a small chip
//! centred on the reference pixel, and removes it in place.

use ndarray::s;
use serde::{Deserialize, Serialize};

use crate::core::stats::{count_valid, nan_propagating_sum, nanmedian, ravel_fortran};
use crate::types::{
    validate_stack, InsarError, InsarResult, Interferogram, Phase, PhaseImage, ReferencePixel,
};

/// Reference phase estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencePhaseParams {
    /// Method code: 1 = whole scene, 2 = chip around the reference pixel
    pub method: i32,
    /// Chip width in pixels (rounded up to the next odd number)
    pub chip_size: usize,
    /// Minimum fraction of coherent pixels required inside the chip
    pub min_fraction: f64,
    /// Estimate interferograms concurrently
    pub parallel: bool,
}

impl Default for ReferencePhaseParams {
    fn default() -> Self {
        Self {
            method: 1,
            chip_size: 21,
            min_fraction: 0.5,
            parallel: true,
        }
    }
}

/// Available reference phase estimators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferencePhaseMethod {
    /// Median over pixels that are coherent in every interferogram
    WholeScene,
    /// Median over a chip centred on the reference pixel
    ReferencePatch,
}

impl TryFrom<i32> for ReferencePhaseMethod {
    type Error = InsarError;

    fn try_from(code: i32) -> InsarResult<Self> {
        match code {
            1 => Ok(ReferencePhaseMethod::WholeScene),
            2 => Ok(ReferencePhaseMethod::ReferencePatch),
            other => Err(InsarError::ReferencePhase(format!(
                "No such option {}. Use refest=1 or 2",
                other
            ))),
        }
    }
}

impl ReferencePhaseMethod {
    pub fn code(&self) -> i32 {
        match self {
            ReferencePhaseMethod::WholeScene => 1,
            ReferencePhaseMethod::ReferencePatch => 2,
        }
    }

    /// Compute one reference phase per interferogram without modifying them.
    pub fn estimate(
        &self,
        ifgs: &[Interferogram],
        params: &ReferencePhaseParams,
        refpix: ReferencePixel,
    ) -> InsarResult<Vec<Phase>> {
        match self {
            ReferencePhaseMethod::WholeScene => whole_scene_phases(ifgs, params.parallel),
            ReferencePhaseMethod::ReferencePatch => {
                let chip = ChipGeometry::new(params.chip_size, params.min_fraction);
                log::debug!(
                    "Reference chip {}x{} at ({}, {}), coherent pixel threshold {:.2}",
                    chip.size, chip.size, refpix.x, refpix.y, chip.threshold
                );
                per_ifg(ifgs, params.parallel, |_, ifg| {
                    patch_phase(&ifg.phase_data, refpix, &chip)
                })
            }
        }
    }
}

/// Odd chip size and coherent pixel threshold derived from the parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChipGeometry {
    pub half_size: usize,
    pub size: usize,
    pub threshold: f64,
}

impl ChipGeometry {
    pub fn new(chip_size: usize, min_fraction: f64) -> Self {
        let half_size = chip_size / 2;
        let size = 2 * half_size + 1;
        Self {
            half_size,
            size,
            threshold: (size * size) as f64 * min_fraction,
        }
    }
}

/// Reference phase estimator
pub struct ReferencePhaseEstimator {
    params: ReferencePhaseParams,
}

impl ReferencePhaseEstimator {
    pub fn new(params: ReferencePhaseParams) -> Self {
        Self { params }
    }

    /// Estimator with default parameters
    pub fn standard() -> Self {
        Self::new(ReferencePhaseParams::default())
    }

    pub fn params(&self) -> &ReferencePhaseParams {
        &self.params
    }

    /// Estimate and remove the reference phase of every interferogram.
    ///
    /// Returns the reference phases in input order. The stack is only modified
    /// once every estimate has succeeded.
    pub fn estimate(
        &self,
        ifgs: &mut [Interferogram],
        refpix: ReferencePixel,
    ) -> InsarResult<Vec<Phase>> {
        validate_stack(ifgs)?;
        let method = ReferencePhaseMethod::try_from(self.params.method)?;

        log::info!(
            "Estimating reference phase for {} interferograms using {:?} ({})",
            ifgs.len(),
            method,
            if self.params.parallel { "parallel" } else { "serial" }
        );
        log::debug!("Reference phase parameters: {:?}", self.params);

        let ref_phs = method.estimate(ifgs, &self.params, refpix)?;
        for (i, ph) in ref_phs.iter().enumerate() {
            if ph.is_nan() {
                log::warn!("Interferogram {} has no valid pixels for its reference phase", i);
            } else {
                log::debug!("Interferogram {}: reference phase {:.6}", i, ph);
            }
        }

        remove_reference_phases(ifgs, &ref_phs, self.params.parallel);
        log::info!("Reference phase removed from {} interferograms", ifgs.len());
        Ok(ref_phs)
    }
}

/// Estimate and remove reference phases for a stack.
pub fn estimate_reference_phase(
    ifgs: &mut [Interferogram],
    params: &ReferencePhaseParams,
    refpix: ReferencePixel,
) -> InsarResult<Vec<Phase>> {
    ReferencePhaseEstimator::new(params.clone()).estimate(ifgs, refpix)
}

fn whole_scene_phases(ifgs: &[Interferogram], parallel: bool) -> InsarResult<Vec<Phase>> {
    let shape = ifgs[0].shape();
    let sum = nan_propagating_sum(ifgs.iter().map(|ifg| ifg.phase_data.view()), shape);

    // Composite mask: true where any interferogram is missing
    let mask: Vec<bool> = ravel_fortran(&sum.view()).into_iter().map(f64::is_nan).collect();
    let valid = mask.iter().filter(|&&m| !m).count();
    log::debug!("{} of {} pixels coherent in every interferogram", valid, mask.len());

    per_ifg(ifgs, parallel, |_, ifg| Ok(whole_scene_phase(&ifg.phase_data, &mask)))
}

fn whole_scene_phase(phase_data: &PhaseImage, mask: &[bool]) -> Phase {
    let mut values = ravel_fortran(&phase_data.view());
    for (v, &masked) in values.iter_mut().zip(mask) {
        if masked {
            *v = Phase::NAN;
        }
    }
    nanmedian(&values)
}

fn patch_phase(
    phase_data: &PhaseImage,
    refpix: ReferencePixel,
    chip: &ChipGeometry,
) -> InsarResult<Phase> {
    let (rows, cols) = phase_data.dim();
    let half = chip.half_size;
    if refpix.x < half
        || refpix.y < half
        || refpix.x >= cols.saturating_sub(half)
        || refpix.y >= rows.saturating_sub(half)
    {
        return Err(InsarError::ReferencePhase(format!(
            "Reference chip of size {} around ({}, {}) exceeds the {}x{} raster",
            chip.size, refpix.x, refpix.y, rows, cols
        )));
    }

    let patch = phase_data.slice(s![
        refpix.y - half..=refpix.y + half,
        refpix.x - half..=refpix.x + half
    ]);
    let values = ravel_fortran(&patch);
    let coherent = count_valid(&values);
    if (coherent as f64) < chip.threshold {
        return Err(InsarError::ReferencePhase(format!(
            "The reference pixel ({}, {}) is not in a sufficiently coherent area: \
             {} of {} chip pixels valid, need {:.2}",
            refpix.x,
            refpix.y,
            coherent,
            values.len(),
            chip.threshold
        )));
    }

    Ok(nanmedian(&values))
}

/// Run `f` on every interferogram and gather the results by index.
#[cfg(feature = "parallel")]
fn per_ifg<F>(ifgs: &[Interferogram], parallel: bool, f: F) -> InsarResult<Vec<Phase>>
where
    F: Fn(usize, &Interferogram) -> InsarResult<Phase> + Sync + Send,
{
    use rayon::prelude::*;

    let tag = |i: usize, e: InsarError| match e {
        InsarError::ReferencePhase(msg) => {
            InsarError::ReferencePhase(format!("interferogram {}: {}", i, msg))
        }
        other => other,
    };

    if parallel {
        ifgs.par_iter()
            .enumerate()
            .map(|(i, ifg)| f(i, ifg).map_err(|e| tag(i, e)))
            .collect()
    } else {
        ifgs.iter()
            .enumerate()
            .map(|(i, ifg)| f(i, ifg).map_err(|e| tag(i, e)))
            .collect()
    }
}

#[cfg(not(feature = "parallel"))]
fn per_ifg<F>(ifgs: &[Interferogram], _parallel: bool, f: F) -> InsarResult<Vec<Phase>>
where
    F: Fn(usize, &Interferogram) -> InsarResult<Phase>,
{
    ifgs.iter()
        .enumerate()
        .map(|(i, ifg)| {
            f(i, ifg).map_err(|e| match e {
                InsarError::ReferencePhase(msg) => {
                    InsarError::ReferencePhase(format!("interferogram {}: {}", i, msg))
                }
                other => other,
            })
        })
        .collect()
}

#[cfg(feature = "parallel")]
fn remove_reference_phases(ifgs: &mut [Interferogram], ref_phs: &[Phase], parallel: bool) {
    use rayon::prelude::*;

    if parallel {
        ifgs.par_iter_mut()
            .zip(ref_phs.par_iter())
            .for_each(|(ifg, &ph)| ifg.phase_data.mapv_inplace(|v| v - ph));
    } else {
        for (ifg, &ph) in ifgs.iter_mut().zip(ref_phs) {
            ifg.phase_data.mapv_inplace(|v| v - ph);
        }
    }
}

#[cfg(not(feature = "parallel"))]
fn remove_reference_phases(ifgs: &mut [Interferogram], ref_phs: &[Phase], _parallel: bool) {
    for (ifg, &ph) in ifgs.iter_mut().zip(ref_phs) {
        ifg.phase_data.mapv_inplace(|v| v - ph);
    }
}
