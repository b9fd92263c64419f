//! Smoothness penalty on a control field.
//!
//!   CG_1      R(m) = ∫|∇m|² dx / V = mᵀ K m / V      (K = stiffness matrix)
//!   regional  R(m) = (1/n) Σ_k (m_k − m̄)²
//!   R_0       R(m) = 0
//!
//! The penalty enters the total functional as λ R(m).

use crate::control::ControlSpace;
use crate::types::{CardiacError, CardiacResult};
use serde::{Deserialize, Serialize};
use sprs::CsMat;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegularizationResults {
    pub func_value: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Regularization {
    space: ControlSpace,
    lambda: f64,
    mesh_volume: f64,
    stiffness: Option<CsMat<f64>>,
    value: f64,
    results: RegularizationResults,
}

impl Regularization {
    pub fn new(space: ControlSpace, lambda: f64, mesh_volume: f64) -> CardiacResult<Self> {
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(CardiacError::Configuration(format!(
                "regularization parameter must be finite and non-negative, got {lambda}"
            )));
        }
        if mesh_volume.is_nan() || mesh_volume <= 0.0 {
            return Err(CardiacError::Configuration(format!(
                "mesh volume must be positive, got {mesh_volume}"
            )));
        }
        Ok(Self {
            space,
            lambda,
            mesh_volume,
            stiffness: None,
            value: 0.0,
            results: RegularizationResults::default(),
        })
    }

    /// Parse the space from its tag (`CG_1`, `regional`, `R_0`).
    pub fn from_tag(space: &str, lambda: f64, mesh_volume: f64) -> CardiacResult<Self> {
        let space = space.parse::<ControlSpace>().map_err(|_| {
            CardiacError::Configuration(format!("unknown regularization space '{space}'"))
        })?;
        Self::new(space, lambda, mesh_volume)
    }

    /// Stiffness matrix K_ij = ∫ ∇φ_i · ∇φ_j dx of the nodal space.
    pub fn with_stiffness(mut self, stiffness: CsMat<f64>) -> CardiacResult<Self> {
        if stiffness.rows() != stiffness.cols() {
            return Err(CardiacError::Shape(format!(
                "stiffness matrix is {}x{}, expected square",
                stiffness.rows(),
                stiffness.cols()
            )));
        }
        self.stiffness = Some(stiffness);
        Ok(self)
    }

    pub fn space(&self) -> ControlSpace {
        self.space
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    fn stiffness_for(&self, m: &[f64]) -> CardiacResult<&CsMat<f64>> {
        let k = self.stiffness.as_ref().ok_or_else(|| {
            CardiacError::Configuration("CG_1 regularization needs a stiffness matrix".into())
        })?;
        if k.rows() != m.len() {
            return Err(CardiacError::Shape(format!(
                "control has {} nodal values, stiffness matrix has {} rows",
                m.len(),
                k.rows()
            )));
        }
        Ok(k)
    }

    /// K m
    fn apply_stiffness(k: &CsMat<f64>, m: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; k.rows()];
        for (&v, (i, j)) in k.iter() {
            y[i] += v * m[j];
        }
        y
    }

    /// R(m) without the factor λ.
    pub fn form(&self, m: &[f64]) -> CardiacResult<f64> {
        match self.space {
            ControlSpace::Real => Ok(0.0),
            ControlSpace::Nodal => {
                let k = self.stiffness_for(m)?;
                let km = Self::apply_stiffness(k, m);
                Ok(km.iter().zip(m).map(|(a, b)| a * b).sum::<f64>() / self.mesh_volume)
            }
            ControlSpace::Regional => {
                if m.is_empty() {
                    return Ok(0.0);
                }
                let n = m.len() as f64;
                let mean = m.iter().sum::<f64>() / n;
                Ok(m.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n)
            }
        }
    }

    /// λ R(m).  Records R(m) as the current value.
    pub fn get_functional(&mut self, m: &[f64]) -> CardiacResult<f64> {
        self.value = self.form(m)?;
        Ok(self.lambda * self.value)
    }

    /// ∂(λ R)/∂m
    pub fn gradient(&self, m: &[f64]) -> CardiacResult<Vec<f64>> {
        match self.space {
            ControlSpace::Real => Ok(vec![0.0; m.len()]),
            ControlSpace::Nodal => {
                let k = self.stiffness_for(m)?;
                let scale = 2.0 * self.lambda / self.mesh_volume;
                Ok(Self::apply_stiffness(k, m).into_iter().map(|v| scale * v).collect())
            }
            ControlSpace::Regional => {
                if m.is_empty() {
                    return Ok(Vec::new());
                }
                let n = m.len() as f64;
                let mean = m.iter().sum::<f64>() / n;
                Ok(m.iter().map(|x| 2.0 * self.lambda * (x - mean) / n).collect())
            }
        }
    }

    /// R(m) from the last `get_functional`, without λ.
    pub fn get_value(&self) -> f64 {
        self.value
    }

    pub fn save(&mut self) {
        self.results.func_value.push(self.value);
    }

    pub fn results(&self) -> &RegularizationResults {
        &self.results
    }
}
