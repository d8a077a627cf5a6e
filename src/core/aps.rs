//! Atmospheric phase screen (APS) removal
//!
//! The tropospheric delay itself comes from an external weather model behind
//! the [`DelayModel`] trait. This module projects the zenith delays of both
//! acquisitions into the line of sight, differences them and removes the
//! result from each interferogram in place.

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{InsarError, InsarResult, Interferogram, APS_ERROR_KEY, APS_REMOVED};

/// APS correction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApsParams {
    /// 1 = single scene incidence angle, 2 = per-pixel incidence map
    pub method: i32,
    /// Scene incidence angle in degrees, required by method 1
    pub incidence_angle: Option<f64>,
    /// UTC hour of the weather model fields
    pub model_hour: u32,
}

impl Default for ApsParams {
    fn default() -> Self {
        Self {
            method: 1,
            incidence_angle: None,
            model_hour: 12,
        }
    }
}

/// How the line-of-sight projection is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApsMethod {
    IncidenceAngle,
    IncidenceMap,
}

impl TryFrom<i32> for ApsMethod {
    type Error = InsarError;

    fn try_from(code: i32) -> InsarResult<Self> {
        match code {
            1 => Ok(ApsMethod::IncidenceAngle),
            2 => Ok(ApsMethod::IncidenceMap),
            other => Err(InsarError::Aps(format!("APS method must be 1 or 2, got {}", other))),
        }
    }
}

/// Source of zenith tropospheric delays, e.g. a numerical weather model.
pub trait DelayModel {
    /// Zenith delay over `dem` at `epoch`, in the interferograms' phase unit.
    fn zenith_delay(&self, epoch: NaiveDateTime, dem: &Array2<f32>) -> InsarResult<Array2<f32>>;
}

/// Incidence angle map (degrees) from an elevation angle map (degrees).
pub fn incidence_from_elevation(elevation: &Array2<f32>) -> Array2<f32> {
    elevation.mapv(|e| 90.0 - e)
}

/// Remove the atmospheric delay from every interferogram not yet corrected.
///
/// All delays are computed before any interferogram is modified. Returns the
/// number of interferograms corrected.
pub fn remove_aps_delay<M: DelayModel + ?Sized>(
    ifgs: &mut [Interferogram],
    model: &M,
    params: &ApsParams,
    dem: &Array2<f32>,
    incidence_map: Option<&Array2<f32>>,
) -> InsarResult<usize> {
    let method = ApsMethod::try_from(params.method)?;
    let cos_inc = line_of_sight_factor(method, params, dem, incidence_map)?;

    let pending: Vec<usize> = (0..ifgs.len()).filter(|&i| !ifgs[i].is_aps_corrected()).collect();
    log::info!(
        "Removing APS delay from {} of {} interferograms ({:?})",
        pending.len(),
        ifgs.len(),
        method
    );

    let mut epochs = Vec::with_capacity(pending.len());
    for &i in &pending {
        let ifg = &ifgs[i];
        let pair = ifg.epochs.ok_or_else(|| {
            InsarError::Aps(format!("Interferogram {} has no acquisition dates", i))
        })?;
        if ifg.shape() != dem.dim() {
            return Err(InsarError::Aps(format!(
                "Interferogram {} has shape {:?}, DEM is {:?}",
                i,
                ifg.shape(),
                dem.dim()
            )));
        }
        epochs.push(pair);
    }

    let mut delays: HashMap<NaiveDate, Array2<f32>> = HashMap::new();
    for date in epochs.iter().flat_map(|&(a, b)| [a, b]) {
        if delays.contains_key(&date) {
            continue;
        }
        let time = date
            .and_hms_opt(params.model_hour, 0, 0)
            .ok_or_else(|| InsarError::Aps(format!("Invalid model hour {}", params.model_hour)))?;
        let delay = model.zenith_delay(time, dem)?;
        if delay.dim() != dem.dim() {
            return Err(InsarError::Aps(format!(
                "Delay model returned {:?} for {}, expected {:?}",
                delay.dim(),
                date,
                dem.dim()
            )));
        }
        log::debug!("Zenith delay computed for {}", date);
        delays.insert(date, delay);
    }

    for (&i, (first, second)) in pending.iter().zip(&epochs) {
        let ifg = &mut ifgs[i];
        Zip::from(&mut ifg.phase_data)
            .and(&delays[first])
            .and(&delays[second])
            .and(&cos_inc)
            .for_each(|ph, &d1, &d2, &c| *ph -= (d2 - d1) / c);
        ifg.metadata.insert(APS_ERROR_KEY.to_string(), APS_REMOVED.to_string());
    }

    log::info!("APS delay removed from {} interferograms", pending.len());
    Ok(pending.len())
}

/// Cosine of the incidence angle on the DEM grid
fn line_of_sight_factor(
    method: ApsMethod,
    params: &ApsParams,
    dem: &Array2<f32>,
    incidence_map: Option<&Array2<f32>>,
) -> InsarResult<Array2<f32>> {
    match method {
        ApsMethod::IncidenceAngle => {
            let angle = params.incidence_angle.ok_or_else(|| {
                InsarError::Aps("APS method 1 requires an incidence angle".to_string())
            })?;
            Ok(Array2::from_elem(dem.dim(), angle.to_radians().cos() as f32))
        }
        ApsMethod::IncidenceMap => {
            let map = incidence_map.ok_or_else(|| {
                InsarError::Aps("APS method 2 requires an incidence map".to_string())
            })?;
            if map.dim() != dem.dim() {
                return Err(InsarError::Aps(format!(
                    "Incidence map is {:?}, DEM is {:?}",
                    map.dim(),
                    dem.dim()
                )));
            }
            Ok(map.mapv(|deg| deg.to_radians().cos()))
        }
    }
}
