//! Optimisation targets: misfit between measured and simulated observables.
//!
//! Every target owns a time series of measured snapshots and runs through
//! the same lifecycle once per forward-solve iteration:
//!
//!   Uninitialized ──set_target_functions──▶ FunctionsAllocated
//!   FunctionsAllocated ──next_target(it)──▶ TargetLoaded
//!   TargetLoaded ──assign_simulated + assign_functional──▶ Evaluated
//!   Evaluated ──save──▶ Saved ──next_target──▶ TargetLoaded …
//!
//! Observables are `Array2<f64>` snapshots (rows = entities, columns =
//! components):
//!
//!   Volume            1 × 1
//!   Regional strain   17 × 3   (AHA segment × circ/rad/long)
//!   Full strain       n_dofs × 3
//!   Displacement      n_dofs × dim
//!
//! The functional of a target is the misfit of the current pair divided by
//! the mesh volume where the observable is a field, so that it integrates
//! to the value of the misfit.

use crate::projection::L2Projection;
use crate::types::{
    CardiacError, CardiacResult, KinematicSnapshot, SurfaceQuadrature, Tensor, Vector,
    VolumeQuadrature, AHA_SEGMENTS, STRAIN_COMPONENTS,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────
//  Lifecycle
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    Uninitialized,
    FunctionsAllocated,
    TargetLoaded,
    Evaluated,
    Saved,
}

/// Measured series for one observable, one entry per time point.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSeries {
    /// Cavity volume per time point.
    Volume(Vec<f64>),
    /// 17 × 3 segment strains per time point.
    RegionalStrain(Vec<Array2<f64>>),
    /// Nodal field per time point.
    Field(Vec<Array2<f64>>),
}

impl TargetSeries {
    pub fn len(&self) -> usize {
        match self {
            Self::Volume(v) => v.len(),
            Self::RegionalStrain(v) | Self::Field(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot `n` as an observable array.
    pub fn snapshot(&self, n: usize) -> CardiacResult<Array2<f64>> {
        let out_of_range = || {
            CardiacError::Shape(format!("time index {n} out of a series of length {}", self.len()))
        };
        match self {
            Self::Volume(v) => {
                let x = *v.get(n).ok_or_else(out_of_range)?;
                Ok(Array2::from_elem((1, 1), x))
            }
            Self::RegionalStrain(v) | Self::Field(v) => v.get(n).cloned().ok_or_else(out_of_range),
        }
    }
}

/// Appended on every `save`; flattened row-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetResults {
    pub func_value: Vec<f64>,
    pub target: Vec<Vec<f64>>,
    pub simulated: Vec<Vec<f64>>,
}

/// State shared by every target: loaded data, the current pair, the
/// current functional and the results log.
#[derive(Debug, Clone)]
pub struct TargetCore {
    name: String,
    shape: (usize, usize),
    state: TargetState,
    data: Vec<Array2<f64>>,
    target: Option<Array2<f64>>,
    simulated: Option<Array2<f64>>,
    functional: Option<f64>,
    results: TargetResults,
}

impl TargetCore {
    pub fn new(name: impl Into<String>, shape: (usize, usize)) -> Self {
        Self {
            name: name.into(),
            shape,
            state: TargetState::Uninitialized,
            data: Vec::new(),
            target: None,
            simulated: None,
            functional: None,
            results: TargetResults::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn num_loaded(&self) -> usize {
        self.data.len()
    }

    pub fn target(&self) -> Option<&Array2<f64>> {
        self.target.as_ref()
    }

    pub fn simulated(&self) -> Option<&Array2<f64>> {
        self.simulated.as_ref()
    }

    pub fn functional(&self) -> Option<f64> {
        self.functional
    }

    pub fn results(&self) -> &TargetResults {
        &self.results
    }

    fn invalid(&self, operation: &'static str) -> CardiacError {
        CardiacError::InvalidState { name: self.name.clone(), operation, state: self.state }
    }

    fn check_shape(&self, what: &str, a: &Array2<f64>) -> CardiacResult<()> {
        if a.dim() != self.shape {
            return Err(CardiacError::Shape(format!(
                "{}: {what} has shape {:?}, expected {:?}",
                self.name,
                a.dim(),
                self.shape
            )));
        }
        Ok(())
    }

    fn allocate(&mut self) -> CardiacResult<()> {
        if self.state != TargetState::Uninitialized {
            return Err(self.invalid("set_target_functions"));
        }
        self.target = Some(Array2::zeros(self.shape));
        self.simulated = Some(Array2::zeros(self.shape));
        self.state = TargetState::FunctionsAllocated;
        Ok(())
    }

    fn push_data(&mut self, snapshot: Array2<f64>) -> CardiacResult<()> {
        if self.state == TargetState::Uninitialized {
            return Err(self.invalid("load_target_data"));
        }
        self.check_shape("target data", &snapshot)?;
        self.data.push(snapshot);
        Ok(())
    }

    fn assign_target(&mut self, it: usize) -> CardiacResult<()> {
        if self.state == TargetState::Uninitialized {
            return Err(self.invalid("next_target"));
        }
        let t = self.data.get(it).cloned().ok_or_else(|| {
            CardiacError::Shape(format!(
                "{}: no target data for time index {it} ({} loaded)",
                self.name,
                self.data.len()
            ))
        })?;
        self.target = Some(t);
        self.functional = None;
        self.state = TargetState::TargetLoaded;
        Ok(())
    }

    fn set_simulated(&mut self, simulated: Array2<f64>) -> CardiacResult<()> {
        match self.state {
            TargetState::TargetLoaded | TargetState::Evaluated | TargetState::Saved => {}
            _ => return Err(self.invalid("assign_simulated")),
        }
        self.check_shape("simulated observable", &simulated)?;
        self.simulated = Some(simulated);
        self.functional = None;
        self.state = TargetState::TargetLoaded;
        Ok(())
    }

    /// Current (target, simulated) pair; only valid after `assign_simulated`.
    fn pair(&self, operation: &'static str) -> CardiacResult<(&Array2<f64>, &Array2<f64>)> {
        match (self.state, &self.target, &self.simulated) {
            (TargetState::TargetLoaded | TargetState::Evaluated | TargetState::Saved, Some(t), Some(s)) => {
                Ok((t, s))
            }
            _ => Err(self.invalid(operation)),
        }
    }

    fn set_functional(&mut self, value: f64) {
        self.functional = Some(value);
        self.state = TargetState::Evaluated;
    }

    fn value(&self) -> CardiacResult<f64> {
        self.functional.ok_or_else(|| CardiacError::NotEvaluated(self.name.clone()))
    }

    fn save(&mut self) -> CardiacResult<()> {
        if self.state != TargetState::Evaluated {
            return Err(self.invalid("save"));
        }
        let value = self.value()?;
        let flat = |a: &Option<Array2<f64>>| -> Vec<f64> {
            a.as_ref().map(|a| a.iter().copied().collect()).unwrap_or_default()
        };
        self.results.func_value.push(value);
        self.results.target.push(flat(&self.target));
        self.results.simulated.push(flat(&self.simulated));
        self.state = TargetState::Saved;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Target trait
// ─────────────────────────────────────────────────────────────

/// A misfit accumulator.  Implementors supply how the observable is
/// computed from a kinematic snapshot and how the misfit is formed; the
/// lifecycle is shared.
pub trait OptimizationTarget {
    fn core(&self) -> &TargetCore;
    fn core_mut(&mut self) -> &mut TargetCore;

    /// Observable of a forward-solve snapshot.
    fn compute_simulated(&self, snapshot: &KinematicSnapshot) -> CardiacResult<Array2<f64>>;

    /// Scalar misfit of a (target, simulated) pair.
    fn misfit(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> f64;

    /// ∂misfit/∂simulated.
    fn misfit_gradient(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> Array2<f64>;

    /// Per-entity weights, if the target has any.
    fn weights(&self) -> Option<&Array2<f64>> {
        None
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn state(&self) -> TargetState {
        self.core().state()
    }

    fn set_target_functions(&mut self) -> CardiacResult<()> {
        self.core_mut().allocate()
    }

    /// Append snapshot `n` of `series` to the loaded data.
    fn load_target_data(&mut self, series: &TargetSeries, n: usize) -> CardiacResult<()> {
        let snapshot = series.snapshot(n)?;
        self.core_mut().push_data(snapshot)
    }

    /// Load every snapshot of `series`.
    fn load_series(&mut self, series: &TargetSeries) -> CardiacResult<()> {
        for n in 0..series.len() {
            self.load_target_data(series, n)?;
        }
        Ok(())
    }

    /// Make loaded snapshot `it` the current target.
    fn next_target(&mut self, it: usize) -> CardiacResult<()> {
        self.core_mut().assign_target(it)
    }

    fn assign_simulated(&mut self, snapshot: &KinematicSnapshot) -> CardiacResult<()> {
        let simulated = self.compute_simulated(snapshot)?;
        self.core_mut().set_simulated(simulated)
    }

    /// Assign an observable computed elsewhere.
    fn assign_observable(&mut self, simulated: Array2<f64>) -> CardiacResult<()> {
        self.core_mut().set_simulated(simulated)
    }

    fn assign_functional(&mut self) -> CardiacResult<()> {
        let value = {
            let (t, s) = self.core().pair("assign_functional")?;
            self.misfit(t, s)
        };
        self.core_mut().set_functional(value);
        Ok(())
    }

    /// Functional of the current iteration.  Fails with `NotEvaluated`
    /// unless `assign_functional` ran after the last target/simulated
    /// update.
    fn get_value(&self) -> CardiacResult<f64> {
        self.core().value()
    }

    /// ∂functional/∂simulated for the current pair.
    fn functional_gradient(&self) -> CardiacResult<Array2<f64>> {
        let (t, s) = self.core().pair("functional_gradient")?;
        Ok(self.misfit_gradient(t, s))
    }

    fn save(&mut self) -> CardiacResult<()> {
        self.core_mut().save()
    }

    fn results(&self) -> &TargetResults {
        self.core().results()
    }
}

/// (1/V) Σ_c d_cᵀ M d_c  with d = target − simulated.
fn projected_misfit(projection: &L2Projection, target: &Array2<f64>, simulated: &Array2<f64>) -> f64 {
    let d = target - simulated;
    let total: f64 = d
        .columns()
        .into_iter()
        .map(|c| projection.inner_product(&c.to_vec()))
        .sum();
    total / projection.volume()
}

/// −(2/V) M d  per column.
fn projected_misfit_gradient(
    projection: &L2Projection,
    target: &Array2<f64>,
    simulated: &Array2<f64>,
) -> Array2<f64> {
    let d = target - simulated;
    let scale = -2.0 / projection.volume();
    let mut out = Array2::zeros(d.dim());
    for (c, col) in d.columns().into_iter().enumerate() {
        for (i, v) in projection.apply_mass(&col.to_vec()).into_iter().enumerate() {
            out[[i, c]] = scale * v;
        }
    }
    out
}

/// Diagonal of the displacement gradient in a local basis:
/// (e_c·∇u e_c, e_r·∇u e_r, e_l·∇u e_l).
fn basis_diagonal(grad_u: &Tensor, basis: &[Vector; 3]) -> CardiacResult<[f64; STRAIN_COMPONENTS]> {
    let d = square_dimension(grad_u)?;
    let mut out = [0.0; STRAIN_COMPONENTS];
    for (k, e) in basis.iter().enumerate() {
        check_length("strain basis vector", e, d)?;
        out[k] = e.dot(&(grad_u * e));
    }
    Ok(out)
}

fn square_dimension(grad_u: &Tensor) -> CardiacResult<usize> {
    if grad_u.nrows() != grad_u.ncols() {
        return Err(CardiacError::Shape(format!(
            "displacement gradient is {}x{}, expected square",
            grad_u.nrows(),
            grad_u.ncols()
        )));
    }
    Ok(grad_u.nrows())
}

fn check_length(what: &str, v: &Vector, d: usize) -> CardiacResult<()> {
    if v.len() != d {
        return Err(CardiacError::Shape(format!(
            "{what} has length {}, displacement gradient is {d}x{d}",
            v.len()
        )));
    }
    Ok(())
}

fn check_points(what: &str, have: usize, want: usize) -> CardiacResult<()> {
    if have != want {
        return Err(CardiacError::Shape(format!(
            "{what}: snapshot has {have} points, quadrature has {want}"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
//  Volume
// ─────────────────────────────────────────────────────────────

/// Cavity volume behind one marked boundary.
///
/// Simulated volume by the divergence theorem on the deformed surface:
///
///   V = −⅓ ∫_Γ (X + u) · J F⁻ᵀ N dΓ
///
/// with N the reference normal pointing out of the myocardium.
#[derive(Debug, Clone)]
pub struct VolumeTarget {
    core: TargetCore,
    marker: String,
    surface: SurfaceQuadrature,
}

impl VolumeTarget {
    pub fn new(marker: impl Into<String>, surface: SurfaceQuadrature) -> CardiacResult<Self> {
        surface.validate()?;
        let marker = marker.into();
        Ok(Self { core: TargetCore::new(format!("Volume {marker}"), (1, 1)), marker, surface })
    }

    /// LV cavity (`ENDO_LV`).
    pub fn left_ventricle(surface: SurfaceQuadrature) -> CardiacResult<Self> {
        Self::new("ENDO_LV", surface)
    }

    /// RV cavity (`ENDO_RV`).
    pub fn right_ventricle(surface: SurfaceQuadrature) -> CardiacResult<Self> {
        Self::new("ENDO_RV", surface)
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn cavity_volume(&self, snapshot: &KinematicSnapshot) -> CardiacResult<f64> {
        let kin = snapshot.surface(&self.marker)?;
        let n = self.surface.len();
        check_points(self.core.name(), kin.grad_u.len(), n)?;
        check_points(self.core.name(), kin.u.len(), n)?;

        let mut vol = 0.0;
        for q in 0..n {
            let g = &kin.grad_u[q];
            let d = square_dimension(g)?;
            check_length("surface point", &self.surface.points[q], d)?;
            check_length("surface normal", &self.surface.normals[q], d)?;
            check_length("surface displacement", &kin.u[q], d)?;
            let f = Tensor::identity(d, d) + g;
            let j = f.determinant();
            let f_inv = f.try_inverse().ok_or_else(|| {
                CardiacError::Shape(format!("{}: singular deformation gradient at surface point {q}", self.core.name()))
            })?;
            let x = &self.surface.points[q] + &kin.u[q];
            let area_normal = f_inv.transpose() * &self.surface.normals[q] * j;
            vol += self.surface.weights[q] * (-1.0 / 3.0) * x.dot(&area_normal);
        }
        Ok(vol)
    }
}

impl OptimizationTarget for VolumeTarget {
    fn core(&self) -> &TargetCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TargetCore {
        &mut self.core
    }

    fn compute_simulated(&self, snapshot: &KinematicSnapshot) -> CardiacResult<Array2<f64>> {
        Ok(Array2::from_elem((1, 1), self.cavity_volume(snapshot)?))
    }

    /// ((target − simulated) / target)²
    fn misfit(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> f64 {
        let (t, s) = (target[[0, 0]], simulated[[0, 0]]);
        let r = (t - s) / t;
        r * r
    }

    fn misfit_gradient(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> Array2<f64> {
        let (t, s) = (target[[0, 0]], simulated[[0, 0]]);
        Array2::from_elem((1, 1), -2.0 * (t - s) / (t * t))
    }
}

// ─────────────────────────────────────────────────────────────
//  Regional strain
// ─────────────────────────────────────────────────────────────

/// Strain in the 17 AHA segments.
///
/// The simulated strain of a segment is the segment average of the
/// circumferential/radial/longitudinal diagonal of ∇u.  Each segment adds
/// its misfit integrated over the segment:
///
///   J = Σ_i |Ω_i| Σ_k (w_ik (s_ik − t_ik))²
#[derive(Debug, Clone)]
pub struct RegionalStrainTarget {
    core: TargetCore,
    quadrature: VolumeQuadrature,
    segment_volumes: Vec<f64>,
    weights: Array2<f64>,
}

impl RegionalStrainTarget {
    /// Unit weights on every segment and component.
    pub fn new(quadrature: VolumeQuadrature) -> CardiacResult<Self> {
        Self::with_weights(quadrature, Array2::ones((AHA_SEGMENTS, STRAIN_COMPONENTS)))
    }

    pub fn with_weights(quadrature: VolumeQuadrature, weights: Array2<f64>) -> CardiacResult<Self> {
        quadrature.validate()?;
        if weights.dim() != (AHA_SEGMENTS, STRAIN_COMPONENTS) {
            return Err(CardiacError::Shape(format!(
                "strain weights have shape {:?}, expected ({AHA_SEGMENTS}, {STRAIN_COMPONENTS})",
                weights.dim()
            )));
        }
        if let Some(&r) = quadrature.regions.iter().find(|&&r| r == 0 || r > AHA_SEGMENTS) {
            return Err(CardiacError::Shape(format!(
                "segment id {r} outside 1..={AHA_SEGMENTS}"
            )));
        }
        let segment_volumes = (1..=AHA_SEGMENTS).map(|s| quadrature.region_volume(s)).collect();
        Ok(Self {
            core: TargetCore::new("Regional Strain", (AHA_SEGMENTS, STRAIN_COMPONENTS)),
            quadrature,
            segment_volumes,
            weights,
        })
    }

    pub fn segment_volumes(&self) -> &[f64] {
        &self.segment_volumes
    }

    /// Value of segment `i` (0-based) alone for the current pair.
    pub fn segment_value(&self, i: usize) -> CardiacResult<f64> {
        let (t, s) = self.core.pair("segment_value")?;
        Ok(self.segment_misfit(i, t, s))
    }

    fn segment_misfit(&self, i: usize, target: &Array2<f64>, simulated: &Array2<f64>) -> f64 {
        let mut form = 0.0;
        for k in 0..STRAIN_COMPONENTS {
            let d = self.weights[[i, k]] * (simulated[[i, k]] - target[[i, k]]);
            form += d * d;
        }
        self.segment_volumes[i] * form
    }
}

impl OptimizationTarget for RegionalStrainTarget {
    fn core(&self) -> &TargetCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TargetCore {
        &mut self.core
    }

    fn weights(&self) -> Option<&Array2<f64>> {
        Some(&self.weights)
    }

    fn compute_simulated(&self, snapshot: &KinematicSnapshot) -> CardiacResult<Array2<f64>> {
        check_points(self.core.name(), snapshot.grad_u.len(), self.quadrature.len())?;
        let mut sums = Array2::zeros((AHA_SEGMENTS, STRAIN_COMPONENTS));
        for (q, g) in snapshot.grad_u.iter().enumerate() {
            let seg = self.quadrature.regions[q] - 1;
            let w = self.quadrature.weights[q];
            let diag = basis_diagonal(g, &self.quadrature.crl_basis[q])?;
            for k in 0..STRAIN_COMPONENTS {
                sums[[seg, k]] += w * diag[k];
            }
        }
        for (i, &v) in self.segment_volumes.iter().enumerate() {
            if v > 0.0 {
                sums.row_mut(i).mapv_inplace(|x| x / v);
            }
        }
        Ok(sums)
    }

    fn misfit(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> f64 {
        (0..AHA_SEGMENTS).map(|i| self.segment_misfit(i, target, simulated)).sum()
    }

    fn misfit_gradient(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> Array2<f64> {
        let mut g = Array2::zeros((AHA_SEGMENTS, STRAIN_COMPONENTS));
        for i in 0..AHA_SEGMENTS {
            for k in 0..STRAIN_COMPONENTS {
                let w = self.weights[[i, k]];
                g[[i, k]] = 2.0 * self.segment_volumes[i] * w * w * (simulated[[i, k]] - target[[i, k]]);
            }
        }
        g
    }
}

// ─────────────────────────────────────────────────────────────
//  Full strain and displacement fields
// ─────────────────────────────────────────────────────────────

/// Circumferential/radial/longitudinal strain over the whole domain,
/// projected onto the nodal space.
#[derive(Debug)]
pub struct FullStrainTarget {
    core: TargetCore,
    crl_basis: Vec<[Vector; 3]>,
    projection: L2Projection,
}

impl FullStrainTarget {
    pub fn new(crl_basis: Vec<[Vector; 3]>, projection: L2Projection) -> CardiacResult<Self> {
        check_points("Full Strain", crl_basis.len(), projection.n_points())?;
        Ok(Self {
            core: TargetCore::new("Full Strain", (projection.n_dofs(), STRAIN_COMPONENTS)),
            crl_basis,
            projection,
        })
    }
}

impl OptimizationTarget for FullStrainTarget {
    fn core(&self) -> &TargetCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TargetCore {
        &mut self.core
    }

    fn compute_simulated(&self, snapshot: &KinematicSnapshot) -> CardiacResult<Array2<f64>> {
        check_points(self.core.name(), snapshot.grad_u.len(), self.crl_basis.len())?;
        let mut values = Array2::zeros((self.crl_basis.len(), STRAIN_COMPONENTS));
        for (q, (g, basis)) in snapshot.grad_u.iter().zip(&self.crl_basis).enumerate() {
            for (k, d) in basis_diagonal(g, basis)?.into_iter().enumerate() {
                values[[q, k]] = d;
            }
        }
        self.projection.project_columns(&values)
    }

    fn misfit(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> f64 {
        projected_misfit(&self.projection, target, simulated)
    }

    fn misfit_gradient(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> Array2<f64> {
        projected_misfit_gradient(&self.projection, target, simulated)
    }
}

/// Raw displacement over the whole domain, projected onto the nodal space.
#[derive(Debug)]
pub struct DisplacementTarget {
    core: TargetCore,
    projection: L2Projection,
}

impl DisplacementTarget {
    pub fn new(dim: usize, projection: L2Projection) -> CardiacResult<Self> {
        if !(dim == 2 || dim == 3) {
            return Err(CardiacError::Shape(format!("displacement dimension {dim}, expected 2 or 3")));
        }
        Ok(Self { core: TargetCore::new("Displacement", (projection.n_dofs(), dim)), projection })
    }
}

impl OptimizationTarget for DisplacementTarget {
    fn core(&self) -> &TargetCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TargetCore {
        &mut self.core
    }

    fn compute_simulated(&self, snapshot: &KinematicSnapshot) -> CardiacResult<Array2<f64>> {
        check_points(self.core.name(), snapshot.u.len(), self.projection.n_points())?;
        let dim = self.core.shape().1;
        let mut values = Array2::zeros((snapshot.u.len(), dim));
        for (q, u) in snapshot.u.iter().enumerate() {
            if u.len() != dim {
                return Err(CardiacError::Shape(format!(
                    "displacement of length {} at point {q}, expected {dim}",
                    u.len()
                )));
            }
            for k in 0..dim {
                values[[q, k]] = u[k];
            }
        }
        self.projection.project_columns(&values)
    }

    fn misfit(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> f64 {
        projected_misfit(&self.projection, target, simulated)
    }

    fn misfit_gradient(&self, target: &Array2<f64>, simulated: &Array2<f64>) -> Array2<f64> {
        projected_misfit_gradient(&self.projection, target, simulated)
    }
}
