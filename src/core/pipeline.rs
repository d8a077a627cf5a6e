use crate::core::linrate::{LinearRateEstimator, RateResult};
use crate::core::ref_phase::ReferencePhaseEstimator;
use crate::types::{
    CovarianceMatrix, InsarResult, Interferogram, Phase, ProcessingParams, RedundancyMask,
    ReferencePixel,
};

/// Outputs of a stack run
#[derive(Debug, Clone)]
pub struct StackProducts {
    pub reference_phases: Vec<Phase>,
    pub rates: RateResult,
}

/// Reference the stack, then fit a linear rate per pixel.
///
/// The interferograms are left reference-corrected.
pub fn process_stack(
    ifgs: &mut [Interferogram],
    params: &ProcessingParams,
    refpix: ReferencePixel,
    vcm: &CovarianceMatrix,
    mst: Option<&RedundancyMask>,
) -> InsarResult<StackProducts> {
    log::info!("Processing stack of {} interferograms", ifgs.len());

    let reference_phases =
        ReferencePhaseEstimator::new(params.reference_phase.clone()).estimate(ifgs, refpix)?;
    let rates = LinearRateEstimator::new(params.linear_rate.clone()).estimate(ifgs, vcm, mst)?;

    Ok(StackProducts {
        reference_phases,
        rates,
    })
}
