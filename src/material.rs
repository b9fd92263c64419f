//! Hyperelastic constitutive laws for passive and active myocardium.
//!
//! Each law is written as analytic functions of the invariants, no AD.
//! The isotropic and fiber terms take an [`Order`] selecting the value,
//! the first derivative or the second derivative w.r.t. their invariant:
//!
//!   W = W1(I1) + W4f(I4f) + Wactive(γ, I4f)
//!
//! Guccione is not invariant-based: its energy is an exponential of a
//! quadratic form in the isochoric Green strain, so it gets its own
//! energy and stress path.

use crate::kinematics::{self, ActiveModel};
use crate::types::{
    geometric_dimension, CardiacError, CardiacResult, FiberFrame, KinematicSnapshot, Tensor,
    Vector, DEFAULT_T_REF_ACTIVE_STRAIN, DEFAULT_T_REF_ACTIVE_STRESS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Below this the exponential coefficient is treated as zero and the
/// b → 0 limit of the exponential terms is used.
const DEGENERATE_EXPONENT: f64 = 1e-12;

// ─────────────────────────────────────────────────────────────
//  Derivative order and gating helpers
// ─────────────────────────────────────────────────────────────

/// Derivative order of an energy term w.r.t. its invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Value,
    First,
    Second,
}

impl TryFrom<u8> for Order {
    type Error = CardiacError;

    fn try_from(diff: u8) -> Result<Self, Self::Error> {
        match diff {
            0 => Ok(Self::Value),
            1 => Ok(Self::First),
            2 => Ok(Self::Second),
            d => Err(CardiacError::Configuration(format!(
                "derivative order {d} not supported (expected 0, 1 or 2)"
            ))),
        }
    }
}

/// max(x, 0) with the switch at x ≥ 0.
#[inline]
pub fn subplus(x: f64) -> f64 {
    if x >= 0.0 {
        x
    } else {
        0.0
    }
}

/// 1 for x ≥ 0, else 0.
#[inline]
pub fn heaviside(x: f64) -> f64 {
    if x >= 0.0 {
        1.0
    } else {
        0.0
    }
}

// ─────────────────────────────────────────────────────────────
//  Invariant-based laws
// ─────────────────────────────────────────────────────────────

/// Energy terms of a law written in the invariants I1 and I4f.
pub trait InvariantLaw {
    /// Isotropic contribution W1(I1).
    fn w1(&self, i1: f64, order: Order, dim: usize) -> f64;
    /// Fiber contribution W4(I4f).
    fn w4(&self, i4: f64, order: Order) -> f64;
}

/// Holzapfel–Ogden transversely isotropic law.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HolzapfelOgdenParameters {
    pub a: f64,
    pub b: f64,
    pub a_f: f64,
    pub b_f: f64,
}

impl Default for HolzapfelOgdenParameters {
    fn default() -> Self {
        Self { a: 2.28, b: 9.726, a_f: 1.685, b_f: 15.779 }
    }
}

impl InvariantLaw for HolzapfelOgdenParameters {
    /// W1 = a/(2b) (exp(b(I1 − 3)) − 1)
    fn w1(&self, i1: f64, order: Order, _dim: usize) -> f64 {
        let (a, b) = (self.a, self.b);
        if b.abs() < DEGENERATE_EXPONENT {
            return match order {
                Order::Value => a / 2.0 * (i1 - 3.0),
                Order::First => a / 2.0,
                Order::Second => 0.0,
            };
        }
        let e = (b * (i1 - 3.0)).exp();
        match order {
            Order::Value => a / (2.0 * b) * (e - 1.0),
            Order::First => a / 2.0 * e,
            Order::Second => a * b / 2.0 * e,
        }
    }

    /// W4 = a_f/(2b_f) H(I4 − 1) (exp(b_f(I4 − 1)²) − 1)
    ///
    /// Only fibers in tension contribute.  Continuous at I4 = 1 with a
    /// jump in the second derivative.
    fn w4(&self, i4: f64, order: Order) -> f64 {
        if i4 == 0.0 {
            return 0.0;
        }
        let (a, b) = (self.a_f, self.b_f);
        let x = i4 - 1.0;
        if b.abs() < DEGENERATE_EXPONENT {
            return match order {
                Order::Value => a / 2.0 * heaviside(x) * x * x,
                Order::First => a * subplus(x),
                Order::Second => a * heaviside(x),
            };
        }
        let e = (b * x * x).exp();
        match order {
            Order::Value => a / (2.0 * b) * heaviside(x) * (e - 1.0),
            Order::First => a * subplus(x) * e,
            Order::Second => a * heaviside(x) * (1.0 + 2.0 * b * x * x) * e,
        }
    }
}

/// Compressible-free neo-Hookean law; no fiber term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeoHookeanParameters {
    pub mu: f64,
}

impl Default for NeoHookeanParameters {
    fn default() -> Self {
        Self { mu: 0.385 }
    }
}

impl InvariantLaw for NeoHookeanParameters {
    fn w1(&self, i1: f64, order: Order, dim: usize) -> f64 {
        match order {
            Order::Value => 0.5 * self.mu * (i1 - dim as f64),
            Order::First => 0.5 * self.mu,
            Order::Second => 0.0,
        }
    }

    fn w4(&self, _i4: f64, _order: Order) -> f64 {
        0.0
    }
}

// ─────────────────────────────────────────────────────────────
//  Guccione
// ─────────────────────────────────────────────────────────────

/// Guccione law:  W = C/2 (exp(Q) − 1) with Q a quadratic form in the
/// isochoric Green strain expressed in the fiber frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuccioneParameters {
    pub c: f64,
    pub bf: f64,
    pub bt: f64,
    pub bfs: f64,
    /// Bulk modulus; `None` means incompressible.
    pub kappa: Option<f64>,
    /// Switches the active term on.  The active coefficient itself is the
    /// activation γ supplied at evaluation time.
    pub t_active: Option<f64>,
}

impl Default for GuccioneParameters {
    fn default() -> Self {
        Self { c: 2.0, bf: 8.0, bt: 2.0, bfs: 4.0, kappa: None, t_active: None }
    }
}

impl GuccioneParameters {
    pub fn is_isotropic(&self) -> bool {
        self.bt == 1.0 && self.bf == 1.0 && self.bfs == 1.0
    }

    pub fn is_incompressible(&self) -> bool {
        self.kappa.is_none()
    }

    /// Coefficient b_ij multiplying E_ij² in Q (fiber, sheet, normal order).
    fn coefficient(&self, i: usize, j: usize) -> f64 {
        match (i, j) {
            (0, 0) => self.bf,
            (0, _) | (_, 0) => self.bfs,
            _ => self.bt,
        }
    }

    /// Columns e1, e2, e3 of the local frame.
    fn frame_matrix(frame: &FiberFrame) -> CardiacResult<Tensor> {
        let (s0, n0) = match (&frame.s0, &frame.n0) {
            (Some(s0), Some(n0)) => (s0, n0),
            _ => {
                return Err(CardiacError::Shape(
                    "anisotropic Guccione needs fiber, sheet and normal directions".into(),
                ))
            }
        };
        for v in [&frame.f0, s0, n0] {
            kinematics::check_direction(v, 3)?;
        }
        Ok(Tensor::from_columns(&[frame.f0.clone(), s0.clone(), n0.clone()]))
    }

    /// Q and ∂Q/∂E for the isochoric strain `e`.
    fn quadratic_form(&self, e: &Tensor, frame: &FiberFrame) -> CardiacResult<(f64, Tensor)> {
        if self.is_isotropic() {
            return Ok((e.dot(e), e * 2.0));
        }
        let r = Self::frame_matrix(frame)?;
        let e_loc = r.transpose() * e * &r;
        let mut q = 0.0;
        let mut dq_loc = Tensor::zeros(3, 3);
        for i in 0..3 {
            for j in 0..3 {
                let bij = self.coefficient(i, j);
                q += bij * e_loc[(i, j)] * e_loc[(i, j)];
                dq_loc[(i, j)] = 2.0 * bij * e_loc[(i, j)];
            }
        }
        Ok((q, &r * dq_loc * r.transpose()))
    }

    pub fn strain_energy(&self, f: &Tensor, frame: &FiberFrame, gamma: f64) -> CardiacResult<f64> {
        require_3d(f, frame)?;
        let e = kinematics::isochoric_green_strain(f)?;
        let (q, _) = self.quadratic_form(&e, frame)?;
        let passive = self.c / 2.0 * (q.exp() - 1.0);
        let active = match self.t_active {
            Some(_) => {
                let c_iso = &e * 2.0 + Tensor::identity(3, 3);
                let i4 = frame.f0.dot(&(c_iso * &frame.f0));
                gamma / 2.0 * (i4 - 1.0)
            }
            None => 0.0,
        };
        Ok(passive + active)
    }

    /// Second Piola–Kirchhoff stress S = 2 ∂W/∂C, including the
    /// derivative of the isochoric scaling J^{-2/3}.
    pub fn second_piola_kirchhoff(
        &self,
        f: &Tensor,
        frame: &FiberFrame,
        gamma: f64,
    ) -> CardiacResult<Tensor> {
        require_3d(f, frame)?;
        let e = kinematics::isochoric_green_strain(f)?;
        let (q, dq) = self.quadratic_form(&e, frame)?;
        let mut s_bar = dq * (self.c / 2.0 * q.exp());
        if self.t_active.is_some() {
            s_bar += &frame.f0 * frame.f0.transpose() * gamma;
        }
        let c = kinematics::right_cauchy_green(f);
        let c_inv = c.clone().try_inverse().ok_or_else(|| {
            CardiacError::Shape("singular right Cauchy-Green tensor".into())
        })?;
        let j = f.determinant();
        let trace_term = s_bar.dot(&c) / 3.0;
        Ok((s_bar - c_inv * trace_term) * j.powf(-2.0 / 3.0))
    }
}

fn require_3d(f: &Tensor, frame: &FiberFrame) -> CardiacResult<()> {
    match geometric_dimension(f)? {
        3 => kinematics::check_direction(&frame.f0, 3),
        d => Err(CardiacError::Shape(format!(
            "Guccione law is only defined in 3D (got dimension {d})"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────
//  Material law selection
// ─────────────────────────────────────────────────────────────

/// Closed set of supported constitutive laws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    HolzapfelOgden,
    NeoHookean,
    Guccione,
}

impl MaterialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HolzapfelOgden => "holzapfel_ogden",
            Self::NeoHookean => "neo_hookean",
            Self::Guccione => "guccione",
        }
    }
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialKind {
    type Err = CardiacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "holzapfel_ogden" => Ok(Self::HolzapfelOgden),
            "neo_hookean" => Ok(Self::NeoHookean),
            "guccione" => Ok(Self::Guccione),
            other => Err(CardiacError::Configuration(format!(
                "unknown material model '{other}'"
            ))),
        }
    }
}

/// Parameters of one constitutive law, validated against a fixed schema.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaterialLaw {
    HolzapfelOgden(HolzapfelOgdenParameters),
    NeoHookean(NeoHookeanParameters),
    Guccione(GuccioneParameters),
}

impl MaterialLaw {
    pub fn default_for(kind: MaterialKind) -> Self {
        match kind {
            MaterialKind::HolzapfelOgden => Self::HolzapfelOgden(Default::default()),
            MaterialKind::NeoHookean => Self::NeoHookean(Default::default()),
            MaterialKind::Guccione => Self::Guccione(Default::default()),
        }
    }

    pub fn kind(&self) -> MaterialKind {
        match self {
            Self::HolzapfelOgden(_) => MaterialKind::HolzapfelOgden,
            Self::NeoHookean(_) => MaterialKind::NeoHookean,
            Self::Guccione(_) => MaterialKind::Guccione,
        }
    }

    /// Names accepted by [`get`](Self::get) / [`set`](Self::set).
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            Self::HolzapfelOgden(_) => &["a", "b", "a_f", "b_f"],
            Self::NeoHookean(_) => &["mu"],
            Self::Guccione(_) => &["C", "bf", "bt", "bfs", "kappa", "Tactive"],
        }
    }

    pub fn get(&self, name: &str) -> CardiacResult<f64> {
        let v = match (self, name) {
            (Self::HolzapfelOgden(p), "a") => p.a,
            (Self::HolzapfelOgden(p), "b") => p.b,
            (Self::HolzapfelOgden(p), "a_f") => p.a_f,
            (Self::HolzapfelOgden(p), "b_f") => p.b_f,
            (Self::NeoHookean(p), "mu") => p.mu,
            (Self::Guccione(p), "C") => p.c,
            (Self::Guccione(p), "bf") => p.bf,
            (Self::Guccione(p), "bt") => p.bt,
            (Self::Guccione(p), "bfs") => p.bfs,
            (Self::Guccione(p), "kappa") => p.kappa.unwrap_or(f64::NAN),
            (Self::Guccione(p), "Tactive") => p.t_active.unwrap_or(f64::NAN),
            _ => return Err(self.unknown(name)),
        };
        Ok(v)
    }

    /// Assign one named parameter.  Values must be finite and ≥ 0.
    pub fn set(&mut self, name: &str, value: f64) -> CardiacResult<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(CardiacError::Configuration(format!(
                "material parameter '{name}' must be finite and non-negative, got {value}"
            )));
        }
        let unknown = self.unknown(name);
        let slot = match (self, name) {
            (Self::HolzapfelOgden(p), "a") => &mut p.a,
            (Self::HolzapfelOgden(p), "b") => &mut p.b,
            (Self::HolzapfelOgden(p), "a_f") => &mut p.a_f,
            (Self::HolzapfelOgden(p), "b_f") => &mut p.b_f,
            (Self::NeoHookean(p), "mu") => &mut p.mu,
            (Self::Guccione(p), "C") => &mut p.c,
            (Self::Guccione(p), "bf") => &mut p.bf,
            (Self::Guccione(p), "bt") => &mut p.bt,
            (Self::Guccione(p), "bfs") => &mut p.bfs,
            (Self::Guccione(p), "kappa") => {
                p.kappa = Some(value);
                return Ok(());
            }
            (Self::Guccione(p), "Tactive") => {
                p.t_active = Some(value);
                return Ok(());
            }
            _ => return Err(unknown),
        };
        *slot = value;
        Ok(())
    }

    /// Defaults of `kind` overridden by the entries of `params`.
    pub fn from_map(kind: MaterialKind, params: &BTreeMap<String, f64>) -> CardiacResult<Self> {
        let mut law = Self::default_for(kind);
        for (name, &value) in params {
            law.set(name, value)?;
        }
        Ok(law)
    }

    pub fn validate(&self) -> CardiacResult<()> {
        for &name in self.parameter_names() {
            let v = self.get(name)?;
            // Unset optional Guccione parameters read back as NaN.
            if v.is_nan() && matches!(self, Self::Guccione(_)) && (name == "kappa" || name == "Tactive") {
                continue;
            }
            if !v.is_finite() || v < 0.0 {
                return Err(CardiacError::Configuration(format!(
                    "material parameter '{name}' must be finite and non-negative, got {v}"
                )));
            }
        }
        Ok(())
    }

    fn unknown(&self, name: &str) -> CardiacError {
        CardiacError::Configuration(format!(
            "'{name}' is not a parameter of {} (expected one of {:?})",
            self.kind(),
            self.parameter_names()
        ))
    }
}

// ─────────────────────────────────────────────────────────────
//  Material model
// ─────────────────────────────────────────────────────────────

/// A constitutive law together with its activation model.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialModel {
    law: MaterialLaw,
    active_model: ActiveModel,
    t_ref: f64,
}

impl MaterialModel {
    /// Build a model.  `t_ref` defaults to 300 for active stress and 1.0
    /// for the active-strain models.
    pub fn new(law: MaterialLaw, active_model: ActiveModel, t_ref: Option<f64>) -> CardiacResult<Self> {
        law.validate()?;
        let t_ref = t_ref.unwrap_or(match active_model {
            ActiveModel::ActiveStress => DEFAULT_T_REF_ACTIVE_STRESS,
            _ => DEFAULT_T_REF_ACTIVE_STRAIN,
        });
        if !t_ref.is_finite() {
            return Err(CardiacError::Configuration(format!("T_ref must be finite, got {t_ref}")));
        }
        Ok(Self { law, active_model, t_ref })
    }

    /// Build from string tags; unknown tags are configuration errors.
    pub fn from_tags(
        material: &str,
        active_model: &str,
        params: &BTreeMap<String, f64>,
        t_ref: Option<f64>,
    ) -> CardiacResult<Self> {
        let kind: MaterialKind = material.parse()?;
        let active: ActiveModel = active_model.parse()?;
        Self::new(MaterialLaw::from_map(kind, params)?, active, t_ref)
    }

    pub fn law(&self) -> &MaterialLaw {
        &self.law
    }

    pub fn active_model(&self) -> ActiveModel {
        self.active_model
    }

    pub fn t_ref(&self) -> f64 {
        self.t_ref
    }

    /// Update one parameter between forward solves.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> CardiacResult<()> {
        self.law.set(name, value)
    }

    pub fn log_parameters(&self) {
        info!(material = %self.law.kind(), active_model = %self.active_model, t_ref = self.t_ref, "material parameters");
        for &name in self.law.parameter_names() {
            if let Ok(v) = self.law.get(name) {
                if !v.is_nan() {
                    info!("\t{name}\t= {v:.3}");
                }
            }
        }
    }

    fn invariant_law(&self) -> Option<&dyn InvariantLaw> {
        match &self.law {
            MaterialLaw::HolzapfelOgden(p) => Some(p as &dyn InvariantLaw),
            MaterialLaw::NeoHookean(p) => Some(p as &dyn InvariantLaw),
            MaterialLaw::Guccione(_) => None,
        }
    }

    /// Isotropic term W1.  Guccione has no invariant split and yields 0.
    pub fn w1(&self, i1: f64, order: Order, dim: usize) -> f64 {
        self.invariant_law().map_or(0.0, |l| l.w1(i1, order, dim))
    }

    /// Fiber term W4.  Guccione has no invariant split and yields 0.
    pub fn w4(&self, i4: f64, order: Order) -> f64 {
        self.invariant_law().map_or(0.0, |l| l.w4(i4, order))
    }

    /// Active term.  Only the active-stress model stores energy in it:
    ///   Wactive = T_ref γ I4f
    pub fn wactive(&self, gamma: f64, i4f: f64, order: Order) -> f64 {
        match self.active_model {
            ActiveModel::ActiveStress => match order {
                Order::Value => self.t_ref * gamma * i4f,
                Order::First => self.t_ref * gamma,
                Order::Second => 0.0,
            },
            ActiveModel::ActiveStrain | ActiveModel::ActiveStrainRossi => 0.0,
        }
    }

    /// Strain-energy density at one point.
    pub fn strain_energy(&self, f: &Tensor, frame: &FiberFrame, gamma: f64) -> CardiacResult<f64> {
        if let MaterialLaw::Guccione(p) = &self.law {
            return p.strain_energy(f, frame, gamma);
        }
        let dim = geometric_dimension(f)?;
        let (i1, i4f) = kinematics::energy_invariants(self.active_model, f, &frame.f0, gamma)?;
        Ok(self.w1(i1, Order::Value, dim)
            + self.w4(i4f, Order::Value)
            + self.wactive(gamma, i4f, Order::Value))
    }

    /// Cauchy stress with hydrostatic pressure `p`:
    ///
    ///   σ = 2 w1 B + 2 w4f f⊗f + 2 wactive f⊗f − p I
    ///
    /// with f the normalised current fiber direction and w1, w4f
    /// evaluated at the raw invariants.
    pub fn cauchy_stress(&self, f: &Tensor, frame: &FiberFrame, gamma: f64, p: f64) -> CardiacResult<Tensor> {
        let dim = geometric_dimension(f)?;
        let id = Tensor::identity(dim, dim);
        if let MaterialLaw::Guccione(g) = &self.law {
            let s = g.second_piola_kirchhoff(f, frame, gamma)?;
            let j = f.determinant();
            return Ok(f * s * f.transpose() / j - id * p);
        }

        kinematics::check_direction(&frame.f0, dim)?;
        let b = kinematics::left_cauchy_green(f);
        let fiber: Vector = f * &frame.f0;
        let norm = fiber.norm();
        if norm == 0.0 {
            return Err(CardiacError::Shape("fiber direction maps to zero".into()));
        }
        let fiber = fiber / norm;
        let ff = &fiber * fiber.transpose();

        let i1 = kinematics::i1(f);
        let i4f = kinematics::i4(f, &frame.f0);
        let w1 = self.w1(i1, Order::First, dim);
        let w4f = self.w4(i4f, Order::First);
        let wactive = self.wactive(gamma, i4f, Order::First);

        Ok(b * (2.0 * w1) + &ff * (2.0 * w4f) + ff * (2.0 * wactive) - id * p)
    }

    /// Energy density at every domain point of a snapshot.
    pub fn strain_energy_field(
        &self,
        snapshot: &KinematicSnapshot,
        frames: &[FiberFrame],
        gamma: &[f64],
    ) -> CardiacResult<Vec<f64>> {
        let n = snapshot.grad_u.len();
        if frames.len() != n || gamma.len() != n {
            return Err(CardiacError::Shape(format!(
                "{n} deformation gradients, {} fiber frames, {} activation values",
                frames.len(),
                gamma.len()
            )));
        }
        (0..n)
            .map(|q| self.strain_energy(&snapshot.deformation_gradient(q), &frames[q], gamma[q]))
            .collect()
    }

    /// ∫ W dx using the domain quadrature weights.
    pub fn total_energy(
        &self,
        snapshot: &KinematicSnapshot,
        frames: &[FiberFrame],
        gamma: &[f64],
        weights: &[f64],
    ) -> CardiacResult<f64> {
        let w = self.strain_energy_field(snapshot, frames, gamma)?;
        if weights.len() != w.len() {
            return Err(CardiacError::Shape(format!(
                "{} quadrature weights for {} points",
                weights.len(),
                w.len()
            )));
        }
        Ok(w.iter().zip(weights).map(|(wi, qi)| wi * qi).sum())
    }
}
