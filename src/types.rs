use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every function in the public Rust API returns `CardiacResult<T>`
/// instead of panicking.  Forward-solve crashes are normally absorbed
/// into the functional value by the optimizer; the variant exists for
/// callers that ask for a derivative at a crashed state.
#[derive(Debug, Error)]
pub enum CardiacError {
    /// Unknown tag or invalid parameter, detected at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The external nonlinear solver exceeded its iteration budget.
    #[error("forward solve crashed at iteration {iteration}")]
    ForwardSolveCrash { iteration: usize },

    /// NaN in an adjoint gradient.  Fatal: the run must abort.
    #[error("NaN in adjoint gradient calculation (component {component})")]
    NumericalCorruption { component: usize },

    /// Mismatched lengths or missing measurement data.
    #[error("shape error: {0}")]
    Shape(String),

    /// A target was driven through its lifecycle out of order.
    #[error("target '{name}': {operation} is not allowed in state {state:?}")]
    InvalidState {
        name: String,
        operation: &'static str,
        state: crate::targets::TargetState,
    },

    /// The functional was read before `assign_functional` ran this iteration.
    #[error("target '{0}' has no functional for the current iteration")]
    NotEvaluated(String),

    /// Sparse factorisation failure (singular mass matrix, etc.).
    #[error("linear algebra error: {0}")]
    Linalg(#[from] sprs::errors::LinalgError),

    /// Argmin solver returned an error.
    #[error("solver error: {0}")]
    Solver(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<argmin::core::Error> for CardiacError {
    fn from(e: argmin::core::Error) -> Self {
        Self::Solver(e.to_string())
    }
}

/// Convenience alias for `Result<T, CardiacError>`.
pub type CardiacResult<T> = Result<T, CardiacError>;

// ─────────────────────────────────────────────────────────────
//  Constants
// ─────────────────────────────────────────────────────────────

/// Number of segments in the AHA 17-segment model.
pub const AHA_SEGMENTS: usize = 17;

/// Circumferential, radial and longitudinal strain components.
pub const STRAIN_COMPONENTS: usize = 3;

pub const DEFAULT_T_REF_ACTIVE_STRESS: f64 = 300.0;
pub const DEFAULT_T_REF_ACTIVE_STRAIN: f64 = 1.0;

// ─────────────────────────────────────────────────────────────
//  Tensor aliases
// ─────────────────────────────────────────────────────────────

/// Pointwise second-order tensor (2×2 or 3×3).
pub type Tensor = DMatrix<f64>;
/// Pointwise vector (length 2 or 3).
pub type Vector = DVector<f64>;

/// Geometric dimension of a square tensor; only 2 and 3 are supported.
pub fn geometric_dimension(t: &Tensor) -> CardiacResult<usize> {
    let (r, c) = t.shape();
    if r != c || !(r == 2 || r == 3) {
        return Err(CardiacError::Shape(format!(
            "expected a 2x2 or 3x3 tensor, got {r}x{c}"
        )));
    }
    Ok(r)
}

/// Build a 3-vector, mostly for tests and host adapters.
pub fn vec3(x: f64, y: f64, z: f64) -> Vector {
    Vector::from_vec(vec![x, y, z])
}

// ─────────────────────────────────────────────────────────────
//  Microstructure
// ─────────────────────────────────────────────────────────────

/// Fiber, sheet and sheet-normal directions at one reference point.
///
/// Owned by the geometry; the material only reads it.  A missing sheet
/// or normal direction makes the corresponding invariants vanish.
#[derive(Debug, Clone, PartialEq)]
pub struct FiberFrame {
    pub f0: Vector,
    pub s0: Option<Vector>,
    pub n0: Option<Vector>,
}

impl FiberFrame {
    /// Fiber direction only (sheet and normal unknown).
    pub fn fiber_only(f0: Vector) -> Self {
        Self { f0, s0: None, n0: None }
    }

    /// Full orthonormal frame.
    pub fn new(f0: Vector, s0: Vector, n0: Vector) -> Self {
        Self { f0, s0: Some(s0), n0: Some(n0) }
    }

    /// Canonical frame aligned with the coordinate axes.
    pub fn cartesian(dim: usize) -> Self {
        let e = |i: usize| {
            let mut v = Vector::zeros(dim);
            v[i] = 1.0;
            v
        };
        if dim == 3 {
            Self::new(e(0), e(1), e(2))
        } else {
            Self { f0: e(0), s0: Some(e(1)), n0: None }
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Quadrature descriptions  (provided by the FEM host, read-only)
// ─────────────────────────────────────────────────────────────

/// Domain quadrature: one entry per quadrature point of the mesh.
#[derive(Debug, Clone)]
pub struct VolumeQuadrature {
    /// Integration weight (|K| · w_q) of each point.
    pub weights: Vec<f64>,
    /// AHA segment id (1..=17) of the cell owning each point.
    pub regions: Vec<usize>,
    /// Circumferential, radial and longitudinal unit vectors per point.
    pub crl_basis: Vec<[Vector; 3]>,
}

impl VolumeQuadrature {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// ∫ 1 dx over the whole domain.
    pub fn volume(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// ∫ 1 dx over the cells marked with `region`.
    pub fn region_volume(&self, region: usize) -> f64 {
        self.weights
            .iter()
            .zip(&self.regions)
            .filter(|(_, &r)| r == region)
            .map(|(w, _)| w)
            .sum()
    }

    pub fn validate(&self) -> CardiacResult<()> {
        let n = self.weights.len();
        if self.regions.len() != n || self.crl_basis.len() != n {
            return Err(CardiacError::Shape(format!(
                "volume quadrature: {} weights, {} region ids, {} basis frames",
                n,
                self.regions.len(),
                self.crl_basis.len()
            )));
        }
        Ok(())
    }
}

/// Quadrature of one marked boundary (e.g. the LV endocardium).
#[derive(Debug, Clone)]
pub struct SurfaceQuadrature {
    /// Reference coordinates X of each surface point.
    pub points: Vec<Vector>,
    /// Outward reference facet normals N.
    pub normals: Vec<Vector>,
    pub weights: Vec<f64>,
}

impl SurfaceQuadrature {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn validate(&self) -> CardiacResult<()> {
        let n = self.weights.len();
        if self.points.len() != n || self.normals.len() != n {
            return Err(CardiacError::Shape(format!(
                "surface quadrature: {} weights, {} points, {} normals",
                n,
                self.points.len(),
                self.normals.len()
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Kinematic snapshot  (one per physiological time point)
// ─────────────────────────────────────────────────────────────

/// Displacement data on one marked boundary.
#[derive(Debug, Clone, Default)]
pub struct SurfaceKinematics {
    pub grad_u: Vec<Tensor>,
    pub u: Vec<Vector>,
}

/// Immutable snapshot of the simulated kinematics returned by the
/// external forward solve.
#[derive(Debug, Clone, Default)]
pub struct KinematicSnapshot {
    /// ∇u at each domain quadrature point.
    pub grad_u: Vec<Tensor>,
    /// u at each domain quadrature point.
    pub u: Vec<Vector>,
    /// Boundary kinematics keyed by boundary marker name.
    pub surfaces: BTreeMap<String, SurfaceKinematics>,
}

impl KinematicSnapshot {
    /// Deformation gradient F = I + ∇u at domain point `q`.
    pub fn deformation_gradient(&self, q: usize) -> Tensor {
        let g = &self.grad_u[q];
        Tensor::identity(g.nrows(), g.ncols()) + g
    }

    pub fn surface(&self, marker: &str) -> CardiacResult<&SurfaceKinematics> {
        self.surfaces.get(marker).ok_or_else(|| {
            CardiacError::Shape(format!("snapshot has no kinematics for boundary '{marker}'"))
        })
    }
}
