//! Optimisation settings loaded from JSON.
//!
//! Model tags stay strings in the file so that an unknown tag surfaces as a
//! `Configuration` error from [`OptimizationSettings::validate`] rather than
//! a generic parse failure.

use crate::control::ControlSpace;
use crate::kinematics::ActiveModel;
use crate::material::{MaterialKind, MaterialLaw, MaterialModel};
use crate::measurements::MeasurementOptions;
use crate::optimizer::{Bounds, OptimizerOptions};
use crate::regularization::Regularization;
use crate::types::{CardiacError, CardiacResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizationSettings {
    pub material_model: String,
    pub active_model: String,
    /// Overrides of the law's default parameters.
    pub material_parameters: BTreeMap<String, f64>,
    /// Scaling of the activation; defaults by active model.
    pub t_ref: Option<f64>,
    pub control_space: String,
    /// Region groups to merge, e.g. `"1,2:3,4"`.
    pub merge_regions: Option<String>,
    pub regularization_space: String,
    pub regularization_lambda: f64,
    /// Multiplies the functional.
    pub scale: f64,
    /// Extra factor on the derivative (total factor scale · relax).
    pub relax: f64,
    pub max_iterations: u64,
    pub memory: usize,
    pub tolerance_grad: f64,
    pub tolerance_cost: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub barrier_weight: f64,
    pub barrier_sharpness: f64,
    pub measurements: MeasurementOptions,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        let opt = OptimizerOptions::default();
        Self {
            material_model: MaterialKind::HolzapfelOgden.as_str().into(),
            active_model: ActiveModel::ActiveStrain.as_str().into(),
            material_parameters: BTreeMap::new(),
            t_ref: None,
            control_space: ControlSpace::Regional.as_str().into(),
            merge_regions: None,
            regularization_space: ControlSpace::Regional.as_str().into(),
            regularization_lambda: 0.0,
            scale: 1.0,
            relax: 1.0,
            max_iterations: opt.max_iterations,
            memory: opt.memory,
            tolerance_grad: opt.tolerance_grad,
            tolerance_cost: opt.tolerance_cost,
            lower_bound: None,
            upper_bound: None,
            barrier_weight: opt.barrier_weight,
            barrier_sharpness: opt.barrier_sharpness,
            measurements: MeasurementOptions::default(),
        }
    }
}

fn positive(name: &str, v: f64) -> CardiacResult<()> {
    if !v.is_finite() || v <= 0.0 {
        return Err(CardiacError::Configuration(format!(
            "{name} must be finite and positive, got {v}"
        )));
    }
    Ok(())
}

impl OptimizationSettings {
    pub fn from_json_str(s: &str) -> CardiacResult<Self> {
        let settings: Self = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> CardiacResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_json_string(&self) -> CardiacResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> CardiacResult<()> {
        let kind: MaterialKind = self.material_model.parse()?;
        self.active_model.parse::<ActiveModel>()?;
        MaterialLaw::from_map(kind, &self.material_parameters)?;
        self.control_space.parse::<ControlSpace>()?;
        self.regularization_space.parse::<ControlSpace>().map_err(|_| {
            CardiacError::Configuration(format!(
                "unknown regularization space '{}'",
                self.regularization_space
            ))
        })?;
        if !self.regularization_lambda.is_finite() || self.regularization_lambda < 0.0 {
            return Err(CardiacError::Configuration(format!(
                "regularization_lambda must be finite and non-negative, got {}",
                self.regularization_lambda
            )));
        }
        positive("scale", self.scale)?;
        positive("relax", self.relax)?;
        positive("barrier_sharpness", self.barrier_sharpness)?;
        if self.memory == 0 {
            return Err(CardiacError::Configuration("memory must be at least 1".into()));
        }
        if let (Some(lo), Some(hi)) = (self.lower_bound, self.upper_bound) {
            if lo > hi {
                return Err(CardiacError::Configuration(format!(
                    "lower_bound {lo} above upper_bound {hi}"
                )));
            }
        }
        Ok(())
    }

    pub fn control_space(&self) -> CardiacResult<ControlSpace> {
        self.control_space.parse()
    }

    pub fn build_material(&self) -> CardiacResult<MaterialModel> {
        let model = MaterialModel::from_tags(
            &self.material_model,
            &self.active_model,
            &self.material_parameters,
            self.t_ref,
        )?;
        model.log_parameters();
        Ok(model)
    }

    pub fn build_regularization(&self, mesh_volume: f64) -> CardiacResult<Regularization> {
        let reg = Regularization::from_tag(&self.regularization_space, self.regularization_lambda, mesh_volume)?;
        info!(space = %reg.space(), lambda = reg.lambda(), "regularization");
        Ok(reg)
    }

    /// Options for a control of `n` degrees of freedom.
    pub fn optimizer_options(&self, n: usize) -> OptimizerOptions {
        let bounds = match (self.lower_bound, self.upper_bound) {
            (None, None) => None,
            (lo, hi) => Some(Bounds::uniform(
                n,
                lo.unwrap_or(f64::NEG_INFINITY),
                hi.unwrap_or(f64::INFINITY),
            )),
        };
        OptimizerOptions {
            max_iterations: self.max_iterations,
            memory: self.memory,
            tolerance_grad: self.tolerance_grad,
            tolerance_cost: self.tolerance_cost,
            bounds,
            barrier_weight: self.barrier_weight,
            barrier_sharpness: self.barrier_sharpness,
        }
    }
}
