//! Selection of the measured series used by one optimisation phase.
//!
//! Window of time points per phase (pfd = passive filling duration,
//! n = number of measured points):
//!
//!   passive_inflation    [0, pfd)
//!   active_contraction   [pfd − 1, n)      start + 1 when unloading
//!   all                  [0, n)
//!
//! and end + 1 when unloading, since an unloaded reference adds a leading
//! zero-pressure point to every series.

use crate::targets::TargetSeries;
use crate::types::{CardiacError, CardiacResult, AHA_SEGMENTS, STRAIN_COMPONENTS};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PassiveInflation,
    ActiveContraction,
    All,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassiveInflation => "passive_inflation",
            Self::ActiveContraction => "active_contraction",
            Self::All => "all",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = CardiacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passive_inflation" => Ok(Self::PassiveInflation),
            "active_contraction" => Ok(Self::ActiveContraction),
            "all" => Ok(Self::All),
            other => Err(CardiacError::Configuration(format!("unknown phase '{other}'"))),
        }
    }
}

/// Measured patient series.  Only the pressure is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientData {
    pub pressure: Vec<f64>,
    #[serde(default)]
    pub rv_pressure: Option<Vec<f64>>,
    #[serde(default)]
    pub volume: Option<Vec<f64>>,
    #[serde(default)]
    pub rv_volume: Option<Vec<f64>>,
    /// Segment id (1..=17) → (circ, rad, long) strain per time point.
    #[serde(default)]
    pub strain: Option<BTreeMap<usize, Vec<[f64; 3]>>>,
    pub passive_filling_duration: usize,
}

impl PatientData {
    pub fn num_points(&self) -> usize {
        self.pressure.len()
    }
}

/// Target weights of one phase; a target is used when its weight is
/// positive or the phase is `all`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseWeights {
    pub volume: f64,
    pub rv_volume: f64,
    pub regional_strain: f64,
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self { volume: 1.0, rv_volume: 0.0, regional_strain: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementOptions {
    pub phase: Phase,
    /// Optimise from an unloaded (zero-pressure) reference geometry.
    pub unload: bool,
    /// Time point the reference geometry corresponds to; defaults to the
    /// last passive point.
    pub geometry_index: Option<usize>,
    pub weights: PhaseWeights,
}

impl Default for MeasurementOptions {
    fn default() -> Self {
        Self {
            phase: Phase::PassiveInflation,
            unload: false,
            geometry_index: None,
            weights: PhaseWeights::default(),
        }
    }
}

/// Cavity volumes of the reference geometry (u = 0).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceVolumes {
    pub lv: f64,
    pub rv: Option<f64>,
}

/// Series selected for one phase, with offsets applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub pressure: Vec<f64>,
    pub rv_pressure: Option<Vec<f64>>,
    pub volume: Option<Vec<f64>>,
    pub rv_volume: Option<Vec<f64>>,
    pub regional_strain: Option<BTreeMap<usize, Vec<[f64; 3]>>>,
    pub pressure_offset: f64,
    pub volume_offset: Option<f64>,
    pub rv_volume_offset: Option<f64>,
}

/// [start, end) of the phase window.
pub fn phase_window(
    phase: Phase,
    passive_filling_duration: usize,
    num_points: usize,
    unload: bool,
) -> CardiacResult<(usize, usize)> {
    if passive_filling_duration == 0 || passive_filling_duration > num_points {
        return Err(CardiacError::Shape(format!(
            "passive filling duration {passive_filling_duration} outside 1..={num_points}"
        )));
    }
    let (start, mut end) = match phase {
        Phase::PassiveInflation => (0, passive_filling_duration),
        Phase::ActiveContraction => {
            let start = passive_filling_duration - 1;
            (if unload { start + 1 } else { start }, num_points)
        }
        Phase::All => (0, num_points),
    };
    if unload {
        end += 1;
    }
    Ok((start, end))
}

fn slice<T: Clone>(name: &str, series: &[T], start: usize, end: usize) -> CardiacResult<Vec<T>> {
    series.get(start..end).map(<[T]>::to_vec).ok_or_else(|| {
        CardiacError::Shape(format!(
            "{name}: window [{start}, {end}) outside a series of length {}",
            series.len()
        ))
    })
}

fn check_length(name: &str, len: usize, num_points: usize) -> CardiacResult<()> {
    if len != num_points {
        return Err(CardiacError::Shape(format!(
            "{name} has {len} points, pressure has {num_points}"
        )));
    }
    Ok(())
}

/// Pressure relative to the reference: the first measured pressure, or 0
/// with a leading 0 when unloading.
fn offset_pressure(pressure: &[f64], unload: bool) -> (Vec<f64>, f64) {
    let mut p = pressure.to_vec();
    let reference = if unload {
        p.insert(0, 0.0);
        0.0
    } else {
        p.first().copied().unwrap_or(0.0)
    };
    (p.into_iter().map(|x| x - reference).collect(), reference)
}

/// Volume minus (measured − reference geometry) at the geometry index;
/// unloading prepends −1.
fn offset_volume(
    name: &str,
    measured: &[f64],
    reference_volume: f64,
    idx: usize,
    unload: bool,
) -> CardiacResult<(Vec<f64>, f64)> {
    let at_idx = *measured.get(idx).ok_or_else(|| {
        CardiacError::Shape(format!("{name}: geometry index {idx} outside {} points", measured.len()))
    })?;
    let offset = at_idx - reference_volume;
    info!("{name} offset = {offset} cm3 (measured {at_idx}, computed {reference_volume})");
    let mut v: Vec<f64> = measured.iter().map(|x| x - offset).collect();
    if unload {
        v.insert(0, -1.0);
    }
    Ok((v, offset))
}

pub fn get_measurements(
    patient: &PatientData,
    options: &MeasurementOptions,
    reference: &ReferenceVolumes,
) -> CardiacResult<Measurements> {
    let n = patient.num_points();
    if n == 0 {
        return Err(CardiacError::Shape("patient has no pressure measurements".into()));
    }
    let pfd = patient.passive_filling_duration;
    let (start, end) = phase_window(options.phase, pfd, n, options.unload)?;
    let all = options.phase == Phase::All;
    let w = options.weights;
    let idx = options.geometry_index.unwrap_or(pfd - 1);

    let mut out = Measurements::default();

    let (pressure, offset) = offset_pressure(&patient.pressure, options.unload);
    info!("LV pressure offset = {offset} kPa");
    out.pressure = slice("pressure", &pressure, start, end)?;
    out.pressure_offset = offset;

    if let Some(rvp) = &patient.rv_pressure {
        check_length("RV pressure", rvp.len(), n)?;
        let (rvp, offset) = offset_pressure(rvp, options.unload);
        info!("RV pressure offset = {offset} kPa");
        out.rv_pressure = Some(slice("RV pressure", &rvp, start, end)?);
    }

    if w.volume > 0.0 || all {
        let volume = patient.volume.as_ref().ok_or_else(|| {
            CardiacError::Shape("volume target requested but patient has no LV volume".into())
        })?;
        check_length("LV volume", volume.len(), n)?;
        let (v, offset) = offset_volume("LV volume", volume, reference.lv, idx, options.unload)?;
        out.volume = Some(slice("LV volume", &v, start, end)?);
        out.volume_offset = Some(offset);
    }

    if let (Some(rvv), true) = (&patient.rv_volume, w.rv_volume > 0.0 || all) {
        check_length("RV volume", rvv.len(), n)?;
        let rv_ref = reference.rv.ok_or_else(|| {
            CardiacError::Shape("RV volume target requested without an RV reference volume".into())
        })?;
        let (v, offset) = offset_volume("RV volume", rvv, rv_ref, idx, options.unload)?;
        out.rv_volume = Some(slice("RV volume", &v, start, end)?);
        out.rv_volume_offset = Some(offset);
    }

    if w.regional_strain > 0.0 || all {
        match &patient.strain {
            Some(strain) => {
                let mut selected = BTreeMap::new();
                for (&region, s) in strain {
                    check_length(&format!("strain in segment {region}"), s.len(), n)?;
                    let mut s = s.clone();
                    if options.unload {
                        s.insert(0, [0.0; 3]);
                    }
                    selected.insert(region, slice("strain", &s, start, end)?);
                }
                out.regional_strain = Some(selected);
            }
            None => warn!("patient has no strain measurements, strain will not be used"),
        }
    }

    Ok(out)
}

impl Measurements {
    pub fn num_points(&self) -> usize {
        self.pressure.len()
    }

    pub fn volume_series(&self) -> Option<TargetSeries> {
        self.volume.clone().map(TargetSeries::Volume)
    }

    pub fn rv_volume_series(&self) -> Option<TargetSeries> {
        self.rv_volume.clone().map(TargetSeries::Volume)
    }

    /// 17 × 3 snapshots.  Every AHA segment must be present.
    pub fn regional_strain_series(&self) -> CardiacResult<Option<TargetSeries>> {
        let Some(strain) = &self.regional_strain else {
            return Ok(None);
        };
        let n = self.num_points();
        let mut snapshots = vec![Array2::<f64>::zeros((AHA_SEGMENTS, STRAIN_COMPONENTS)); n];
        for segment in 1..=AHA_SEGMENTS {
            let series = strain.get(&segment).ok_or_else(|| {
                CardiacError::Shape(format!("no strain measurements for segment {segment}"))
            })?;
            check_length(&format!("strain in segment {segment}"), series.len(), n)?;
            for (t, values) in series.iter().enumerate() {
                for (k, &v) in values.iter().enumerate() {
                    snapshots[t][[segment - 1, k]] = v;
                }
            }
        }
        Ok(Some(TargetSeries::RegionalStrain(snapshots)))
    }
}
