//! sarrate: reference phase and linear rate estimation for InSAR stacks
//!
//! Given a stack of unwrapped interferograms this library removes the
//! per-interferogram reference phase and fits a weighted linear deformation
//! rate at every pixel.

pub mod types;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    validate_stack, CovarianceMatrix, InsarError, InsarResult, Interferogram, Phase, PhaseImage,
    PhaseUnit, ProcessingParams, RedundancyMask, ReferencePixel,
};

pub use crate::core::{
    estimate_rate, estimate_reference_phase, process_stack, remove_aps_delay,
    LinearRateEstimator, LinearRateParams, RateResult, ReferencePhaseEstimator,
    ReferencePhaseParams,
};

#[cfg(feature = "python")]
mod python {
    use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray2, PyReadonlyArray3};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    use crate::types::{InsarError, Interferogram, ReferencePixel};
    use crate::core::{estimate_rate, estimate_reference_phase, ReferencePhaseParams};

    pyo3::create_exception!(_core, ReferencePhaseError, pyo3::exceptions::PyException);

    fn to_py_err(e: InsarError) -> PyErr {
        match e {
            InsarError::ReferencePhase(_) => ReferencePhaseError::new_err(e.to_string()),
            InsarError::InvalidInput(_) => PyValueError::new_err(e.to_string()),
            _ => PyRuntimeError::new_err(e.to_string()),
        }
    }

    /// Estimate and remove reference phases.
    ///
    /// Returns (reference_phases, corrected_phase_rasters).
    #[pyfunction]
    #[pyo3(signature = (
        phase_data, method, refpx, refpy, chip_size, min_fraction, parallel = true
    ))]
    #[allow(clippy::too_many_arguments)]
    fn estimate_ref_phase<'py>(
        py: Python<'py>,
        phase_data: Vec<PyReadonlyArray2<'py, f32>>,
        method: i32,
        refpx: usize,
        refpy: usize,
        chip_size: usize,
        min_fraction: f64,
        parallel: bool,
    ) -> PyResult<(&'py PyArray1<f32>, Vec<&'py PyArray2<f32>>)> {
        let mut ifgs: Vec<Interferogram> = phase_data
            .iter()
            .map(|a| Interferogram::new(a.as_array().to_owned(), 0.0))
            .collect();
        let params = ReferencePhaseParams {
            method,
            chip_size,
            min_fraction,
            parallel,
        };

        let ref_phs = py
            .allow_threads(|| {
                estimate_reference_phase(&mut ifgs, &params, ReferencePixel::new(refpx, refpy))
            })
            .map_err(to_py_err)?;

        let rasters = ifgs.into_iter().map(|ifg| ifg.phase_data.into_pyarray(py)).collect();
        Ok((ref_phs.into_pyarray(py), rasters))
    }

    /// Fit a linear rate per pixel.
    ///
    /// Returns (rate, error, samples) rasters.
    #[pyfunction]
    #[pyo3(signature = (
        phase_data, time_spans, vcm, sample_threshold, sigma_multiplier, max_sigma, mst = None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn linear_rate<'py>(
        py: Python<'py>,
        phase_data: Vec<PyReadonlyArray2<'py, f32>>,
        time_spans: Vec<f64>,
        vcm: PyReadonlyArray2<'py, f64>,
        sample_threshold: usize,
        sigma_multiplier: f64,
        max_sigma: f64,
        mst: Option<PyReadonlyArray3<'py, bool>>,
    ) -> PyResult<(&'py PyArray2<f64>, &'py PyArray2<f64>, &'py PyArray2<u32>)> {
        if phase_data.len() != time_spans.len() {
            return Err(PyValueError::new_err(format!(
                "{} rasters but {} time spans",
                phase_data.len(),
                time_spans.len()
            )));
        }
        let ifgs: Vec<Interferogram> = phase_data
            .iter()
            .zip(&time_spans)
            .map(|(a, &t)| Interferogram::new(a.as_array().to_owned(), t))
            .collect();
        let vcm = vcm.as_array().to_owned();
        let mst = mst.map(|m| m.as_array().to_owned());

        let result = py
            .allow_threads(|| {
                estimate_rate(
                    &ifgs,
                    &vcm,
                    sample_threshold,
                    sigma_multiplier,
                    max_sigma,
                    mst.as_ref(),
                )
            })
            .map_err(to_py_err)?;

        Ok((
            result.rate.into_pyarray(py),
            result.error.into_pyarray(py),
            result.samples.into_pyarray(py),
        ))
    }

    /// Python module definition
    #[pymodule]
    fn _core(py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(estimate_ref_phase, m)?)?;
        m.add_function(wrap_pyfunction!(linear_rate, m)?)?;
        m.add("ReferencePhaseError", py.get_type::<ReferencePhaseError>())?;
        Ok(())
    }
}
