//! Core InSAR stack processing modules

pub mod stats;
pub mod ref_phase;
pub mod linrate;
pub mod aps;
pub mod pipeline;

// Re-export main types
pub use ref_phase::{
    estimate_reference_phase, ChipGeometry, ReferencePhaseEstimator, ReferencePhaseMethod,
    ReferencePhaseParams,
};
pub use linrate::{estimate_rate, LinearRateEstimator, LinearRateParams, PixelFit, RateResult};
pub use aps::{incidence_from_elevation, remove_aps_delay, ApsMethod, ApsParams, DelayModel};
pub use pipeline::{process_stack, StackProducts};
