//! L2 projection of quadrature-point values onto a nodal (CG_1) space.
//!
//! The host assembles two operators once per mesh:
//!
//!   M  (n_dofs × n_dofs)    mass matrix  ∫ φ_i φ_j dx
//!   L  (n_dofs × n_points)  load operator  L_iq = w_q φ_i(x_q)
//!
//! and projection solves  M x = L v.  M is symmetric positive definite, so
//! one LDLᵀ factorisation serves both the projection and its adjoint.

use crate::types::{CardiacError, CardiacResult};
use ndarray::Array2;
use sprs::{CsMat, FillInReduction, SymmetryCheck};
use sprs_ldl::{Ldl, LdlNumeric};

pub struct L2Projection {
    mass: CsMat<f64>,
    load: CsMat<f64>,
    factor: MassFactor,
}

/// sprs-ldl needs at least two rows, so a single dof is inverted directly.
enum MassFactor {
    Scalar(f64),
    Ldl(LdlNumeric<f64, usize>),
}

impl MassFactor {
    fn new(mass: &CsMat<f64>) -> CardiacResult<Self> {
        if mass.rows() != 1 {
            let ldl = Ldl::new()
                .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
                .check_symmetry(SymmetryCheck::DontCheckSymmetry)
                .numeric(mass.view())?;
            return Ok(Self::Ldl(ldl));
        }
        let m00 = mass.get(0, 0).copied().unwrap_or(0.0);
        if !(m00.is_finite() && m00 > 0.0) {
            return Err(CardiacError::Shape(format!(
                "1x1 mass matrix entry {m00} is not positive"
            )));
        }
        Ok(Self::Scalar(m00))
    }

    fn solve(&self, rhs: &[f64]) -> Vec<f64> {
        match self {
            Self::Scalar(m00) => rhs.iter().map(|r| r / m00).collect(),
            Self::Ldl(ldl) => ldl.solve(rhs),
        }
    }
}

impl std::fmt::Debug for L2Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L2Projection")
            .field("n_dofs", &self.n_dofs())
            .field("n_points", &self.n_points())
            .finish()
    }
}

/// y = A x  with A in any storage order.
fn spmv(a: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; a.rows()];
    for (&v, (i, j)) in a.iter() {
        y[i] += v * x[j];
    }
    y
}

/// y = Aᵀ x
fn spmv_transpose(a: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; a.cols()];
    for (&v, (i, j)) in a.iter() {
        y[j] += v * x[i];
    }
    y
}

impl L2Projection {
    pub fn new(mass: CsMat<f64>, load: CsMat<f64>) -> CardiacResult<Self> {
        if mass.rows() != mass.cols() {
            return Err(CardiacError::Shape(format!(
                "mass matrix is {}x{}, expected square",
                mass.rows(),
                mass.cols()
            )));
        }
        if mass.rows() == 0 {
            return Err(CardiacError::Shape("mass matrix is empty".into()));
        }
        if load.rows() != mass.rows() {
            return Err(CardiacError::Shape(format!(
                "load operator has {} rows, mass matrix has {}",
                load.rows(),
                mass.rows()
            )));
        }
        let mass = mass.to_csc();
        let factor = MassFactor::new(&mass)?;
        Ok(Self { mass, load, factor })
    }

    pub fn n_dofs(&self) -> usize {
        self.mass.rows()
    }

    pub fn n_points(&self) -> usize {
        self.load.cols()
    }

    pub fn mass(&self) -> &CsMat<f64> {
        &self.mass
    }

    /// Nodal coefficients x with M x = L v.
    pub fn project(&self, values: &[f64]) -> CardiacResult<Vec<f64>> {
        if values.len() != self.n_points() {
            return Err(CardiacError::Shape(format!(
                "{} quadrature values, projection expects {}",
                values.len(),
                self.n_points()
            )));
        }
        let rhs = spmv(&self.load, values);
        Ok(self.factor.solve(&rhs))
    }

    /// Project every column of a (points × components) array.
    pub fn project_columns(&self, values: &Array2<f64>) -> CardiacResult<Array2<f64>> {
        let (_, ncomp) = values.dim();
        let mut out = Array2::zeros((self.n_dofs(), ncomp));
        for c in 0..ncomp {
            let column: Vec<f64> = values.column(c).to_vec();
            let x = self.project(&column)?;
            for (i, xi) in x.into_iter().enumerate() {
                out[[i, c]] = xi;
            }
        }
        Ok(out)
    }

    /// Pull a gradient w.r.t. the nodal coefficients back to the quadrature
    /// values:  g_v = Lᵀ M⁻¹ g_x.
    pub fn adjoint(&self, grad_dofs: &[f64]) -> CardiacResult<Vec<f64>> {
        if grad_dofs.len() != self.n_dofs() {
            return Err(CardiacError::Shape(format!(
                "{} nodal gradient entries, projection has {} dofs",
                grad_dofs.len(),
                self.n_dofs()
            )));
        }
        let lambda = self.factor.solve(grad_dofs);
        Ok(spmv_transpose(&self.load, &lambda))
    }

    /// M d
    pub fn apply_mass(&self, d: &[f64]) -> Vec<f64> {
        spmv(&self.mass, d)
    }

    /// ∫ d_h² dx = dᵀ M d
    pub fn inner_product(&self, d: &[f64]) -> f64 {
        self.apply_mass(d).iter().zip(d).map(|(a, b)| a * b).sum()
    }

    /// ∫ 1 dx = 1ᵀ M 1
    pub fn volume(&self) -> f64 {
        self.mass.iter().map(|(&v, _)| v).sum()
    }
}
