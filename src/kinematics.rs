//! Strain invariants of the deformation gradient: pure tensor → ℝ math.
//!
//! All invariants are built on the right Cauchy–Green tensor C = FᵀF:
//!
//!   I1   = tr C
//!   I4a  = a₀ · C a₀        (a₀ ∈ {f₀, s₀, n₀})
//!   I8fs = f₀ · C s₀
//!
//! In the active-strain models the fiber is shortened by a multiplier
//! m(γ) and the material only sees the elastic part of the deformation,
//! which changes I1 and I4f into their elastic counterparts.

use crate::types::{geometric_dimension, CardiacError, CardiacResult, FiberFrame, Tensor, Vector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─────────────────────────────────────────────────────────────
//  Active model tag
// ─────────────────────────────────────────────────────────────

/// How activation enters the constitutive law.  Closed set, selected once
/// at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveModel {
    /// Activation adds a fiber tension term to the energy.
    ActiveStress,
    /// Fiber stretch multiplier m = 1 − γ.
    ActiveStrain,
    /// Fiber stretch multiplier m = 1 + γ.
    ActiveStrainRossi,
}

impl ActiveModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveStress => "active_stress",
            Self::ActiveStrain => "active_strain",
            Self::ActiveStrainRossi => "active_strain_rossi",
        }
    }

    /// Stretch multiplier m(γ) of the active-strain models, `None` for
    /// active stress.
    pub fn stretch_multiplier(&self, gamma: f64) -> Option<f64> {
        match self {
            Self::ActiveStress => None,
            Self::ActiveStrain => Some(1.0 - gamma),
            Self::ActiveStrainRossi => Some(1.0 + gamma),
        }
    }
}

impl fmt::Display for ActiveModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActiveModel {
    type Err = CardiacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active_stress" => Ok(Self::ActiveStress),
            "active_strain" => Ok(Self::ActiveStrain),
            "active_strain_rossi" => Ok(Self::ActiveStrainRossi),
            other => Err(CardiacError::Configuration(format!(
                "the active model '{other}' is not implemented"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Basic tensors
// ─────────────────────────────────────────────────────────────

/// Right Cauchy–Green tensor C = FᵀF.
pub fn right_cauchy_green(f: &Tensor) -> Tensor {
    f.transpose() * f
}

/// Left Cauchy–Green tensor B = FFᵀ.
pub fn left_cauchy_green(f: &Tensor) -> Tensor {
    f * f.transpose()
}

/// Isochoric Green–Lagrange strain E = ½(J^{-2/d} FᵀF − I).
pub fn isochoric_green_strain(f: &Tensor) -> CardiacResult<Tensor> {
    let d = geometric_dimension(f)?;
    let j = f.determinant();
    if j <= 0.0 {
        return Err(CardiacError::Shape(format!(
            "deformation gradient with non-positive determinant {j:.3e}"
        )));
    }
    let c = right_cauchy_green(f) * j.powf(-2.0 / d as f64);
    Ok((c - Tensor::identity(d, d)) * 0.5)
}

/// a · C b
#[inline]
fn c_form(c: &Tensor, a: &Vector, b: &Vector) -> f64 {
    a.dot(&(c * b))
}

// ─────────────────────────────────────────────────────────────
//  Invariants
// ─────────────────────────────────────────────────────────────

/// First isotropic invariant I1 = tr(FᵀF).
pub fn i1(f: &Tensor) -> f64 {
    right_cauchy_green(f).trace()
}

/// Quasi-invariant along a reference direction, a₀ · C a₀.
pub fn i4(f: &Tensor, a0: &Vector) -> f64 {
    c_form(&right_cauchy_green(f), a0, a0)
}

/// Coupling invariant a₀ · C b₀.
pub fn i8(f: &Tensor, a0: &Vector, b0: &Vector) -> f64 {
    c_form(&right_cauchy_green(f), a0, b0)
}

/// All raw invariants at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Invariants {
    pub i1: f64,
    pub i4f: f64,
    pub i4s: f64,
    pub i4n: f64,
    pub i8fs: f64,
}

impl Invariants {
    /// Compute the invariants of `f` in `frame`.  Missing sheet or normal
    /// directions give zero.
    pub fn compute(f: &Tensor, frame: &FiberFrame) -> CardiacResult<Self> {
        let d = geometric_dimension(f)?;
        check_direction(&frame.f0, d)?;
        let c = right_cauchy_green(f);
        let i4s = match &frame.s0 {
            Some(s0) => {
                check_direction(s0, d)?;
                c_form(&c, s0, s0)
            }
            None => 0.0,
        };
        let i4n = match &frame.n0 {
            Some(n0) => {
                check_direction(n0, d)?;
                c_form(&c, n0, n0)
            }
            None => 0.0,
        };
        let i8fs = frame.s0.as_ref().map_or(0.0, |s0| c_form(&c, &frame.f0, s0));
        Ok(Self {
            i1: c.trace(),
            i4f: c_form(&c, &frame.f0, &frame.f0),
            i4s,
            i4n,
            i8fs,
        })
    }
}

pub(crate) fn check_direction(v: &Vector, d: usize) -> CardiacResult<()> {
    if v.len() != d {
        return Err(CardiacError::Shape(format!(
            "direction of length {} in a {d}-dimensional frame",
            v.len()
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
//  Active-strain corrections
// ─────────────────────────────────────────────────────────────

/// Elastic first invariant:
///   Ie1 = m^(4−d) I1 + (1/m² − m^(4−d)) I4f
///
/// Returns `i1` unchanged for active stress.
pub fn elastic_i1(model: ActiveModel, i1: f64, i4f: f64, gamma: f64, dim: usize) -> f64 {
    match model.stretch_multiplier(gamma) {
        None => i1,
        Some(m) => {
            let mp = m.powi(4 - dim as i32);
            mp * i1 + (1.0 / (m * m) - mp) * i4f
        }
    }
}

/// Elastic fiber invariant I4fe = I4f / m².
pub fn elastic_i4f(model: ActiveModel, i4f: f64, gamma: f64) -> f64 {
    match model.stretch_multiplier(gamma) {
        None => i4f,
        Some(m) => i4f / (m * m),
    }
}

/// The (I1, I4f) pair the strain energy is evaluated at: raw for active
/// stress, elastic for the active-strain models.
pub fn energy_invariants(
    model: ActiveModel,
    f: &Tensor,
    f0: &Vector,
    gamma: f64,
) -> CardiacResult<(f64, f64)> {
    let d = geometric_dimension(f)?;
    check_direction(f0, d)?;
    let c = right_cauchy_green(f);
    let i1 = c.trace();
    let i4f = c_form(&c, f0, f0);
    Ok((elastic_i1(model, i1, i4f, gamma, d), elastic_i4f(model, i4f, gamma)))
}
