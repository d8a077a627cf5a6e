use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::linrate::LinearRateParams;
use crate::core::ref_phase::ReferencePhaseParams;

/// Unwrapped interferometric phase (radians or millimetres)
pub type Phase = f32;

/// 2D phase raster (row x column), NaN marks a no-coherence pixel
pub type PhaseImage = Array2<Phase>;

/// Full variance-covariance matrix of the interferogram observations
pub type CovarianceMatrix = Array2<f64>;

/// Per-pixel network selection (interferogram x row x column)
pub type RedundancyMask = Array3<bool>;

/// Days per year used to turn epoch differences into time spans
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Metadata key recording the atmospheric correction status
pub const APS_ERROR_KEY: &str = "APS_ERROR";

/// Metadata value written once atmospheric delay has been removed
pub const APS_REMOVED: &str = "REMOVED";

/// Pixel chosen as the phase reference, in (column, row) order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePixel {
    pub x: usize, // column
    pub y: usize, // row
}

impl ReferencePixel {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Unit of the phase values held by an interferogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseUnit {
    Radians,
    Millimetres,
}

/// A single unwrapped interferogram in a stack
#[derive(Debug, Clone)]
pub struct Interferogram {
    pub phase_data: PhaseImage,
    /// Elapsed time between the two acquisitions, in years
    pub time_span: f64,
    /// Acquisition dates (first, second) when known
    pub epochs: Option<(NaiveDate, NaiveDate)>,
    /// Raw value used by the producer to flag missing pixels
    pub nodata_value: Phase,
    pub nan_converted: bool,
    pub unit: PhaseUnit,
    pub metadata: HashMap<String, String>,
}

impl Interferogram {
    /// Create an interferogram from a phase raster and a time span in years
    pub fn new(phase_data: PhaseImage, time_span: f64) -> Self {
        Self {
            phase_data,
            time_span,
            epochs: None,
            nodata_value: 0.0,
            nan_converted: false,
            unit: PhaseUnit::Radians,
            metadata: HashMap::new(),
        }
    }

    /// Create an interferogram from its acquisition dates.
    ///
    /// The time span is derived as the day difference over 365.25.
    pub fn from_epochs(phase_data: PhaseImage, first: NaiveDate, second: NaiveDate) -> Self {
        let days = (second - first).num_days() as f64;
        let mut ifg = Self::new(phase_data, days / DAYS_PER_YEAR);
        ifg.epochs = Some((first, second));
        ifg
    }

    pub fn shape(&self) -> (usize, usize) {
        self.phase_data.dim()
    }

    pub fn num_cells(&self) -> usize {
        self.phase_data.len()
    }

    pub fn nan_count(&self) -> usize {
        self.phase_data.iter().filter(|v| v.is_nan()).count()
    }

    /// Fraction of pixels carrying a valid (non-NaN) phase
    pub fn coherent_fraction(&self) -> f64 {
        if self.num_cells() == 0 {
            return 0.0;
        }
        1.0 - self.nan_count() as f64 / self.num_cells() as f64
    }

    /// Replace the producer's nodata value with NaN. Applied at most once.
    pub fn convert_to_nans(&mut self) {
        if self.nan_converted {
            log::debug!("Interferogram already NaN-converted, skipping");
            return;
        }
        let nodata = self.nodata_value;
        self.phase_data.mapv_inplace(|v| if v == nodata { Phase::NAN } else { v });
        self.nan_converted = true;
    }

    /// Convert phase from radians to millimetres of line-of-sight displacement.
    pub fn convert_to_mm(&mut self, wavelength_m: f64) -> InsarResult<()> {
        if self.unit == PhaseUnit::Millimetres {
            log::debug!("Interferogram already in millimetres, skipping");
            return Ok(());
        }
        if !(wavelength_m.is_finite() && wavelength_m > 0.0) {
            return Err(InsarError::InvalidInput(format!(
                "Wavelength must be positive, got {}",
                wavelength_m
            )));
        }
        let scale = (wavelength_m * 1000.0 / (4.0 * std::f64::consts::PI)) as Phase;
        self.phase_data.mapv_inplace(|v| v * scale);
        self.unit = PhaseUnit::Millimetres;
        Ok(())
    }

    pub fn is_aps_corrected(&self) -> bool {
        self.metadata.get(APS_ERROR_KEY).map(String::as_str) == Some(APS_REMOVED)
    }
}

/// Processing parameters for a complete velocity run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingParams {
    pub reference_phase: ReferencePhaseParams,
    pub linear_rate: LinearRateParams,
}

/// Error types for InSAR stack processing
#[derive(Debug, thiserror::Error)]
pub enum InsarError {
    #[error("Reference phase error: {0}")]
    ReferencePhase(String),

    #[error("APS correction error: {0}")]
    Aps(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for InSAR operations
pub type InsarResult<T> = Result<T, InsarError>;

/// Check that a stack holds at least two interferograms of one shape
pub fn validate_stack(ifgs: &[Interferogram]) -> InsarResult<()> {
    if ifgs.len() < 2 {
        return Err(InsarError::ReferencePhase(format!(
            "Need to provide at least 2 interferograms, got {}",
            ifgs.len()
        )));
    }
    let shape = ifgs[0].shape();
    if let Some((i, ifg)) = ifgs.iter().enumerate().find(|(_, ifg)| ifg.shape() != shape) {
        return Err(InsarError::InvalidInput(format!(
            "Interferogram {} has shape {:?}, expected {:?}",
            i,
            ifg.shape(),
            shape
        )));
    }
    Ok(())
}
