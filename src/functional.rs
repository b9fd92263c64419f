//! Total functional over a time series:
//!
//!   J = Σ_t Σ_k w_k J_k(t)  +  λ R(m)
//!
//! Each time point drives every target through one pass of its lifecycle
//! (next_target → assign_simulated → assign_functional → save).

use crate::regularization::Regularization;
use crate::targets::OptimizationTarget;
use crate::types::{CardiacError, CardiacResult, KinematicSnapshot};
use std::collections::BTreeMap;
use tracing::debug;

/// Breakdown of one evaluation of the total functional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionalEvaluation {
    /// Weighted misfit plus λR.
    pub total: f64,
    /// Weighted misfit at each time point.
    pub per_time: Vec<f64>,
    /// Unweighted misfit of each target summed over time.
    pub per_target: BTreeMap<String, f64>,
    /// λR(m)
    pub regularization: f64,
}

struct WeightedTarget {
    weight: f64,
    target: Box<dyn OptimizationTarget>,
}

#[derive(Default)]
pub struct FunctionalAssembly {
    targets: Vec<WeightedTarget>,
    regularization: Option<Regularization>,
}

impl std::fmt::Debug for FunctionalAssembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<(&str, f64)> = self.targets.iter().map(|t| (t.target.name(), t.weight)).collect();
        f.debug_struct("FunctionalAssembly")
            .field("targets", &names)
            .field("regularization", &self.regularization)
            .finish()
    }
}

impl FunctionalAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_target(&mut self, weight: f64, target: Box<dyn OptimizationTarget>) -> CardiacResult<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(CardiacError::Configuration(format!(
                "weight of target '{}' must be finite and non-negative, got {weight}",
                target.name()
            )));
        }
        if self.targets.iter().any(|t| t.target.name() == target.name()) {
            return Err(CardiacError::Configuration(format!(
                "target '{}' added twice",
                target.name()
            )));
        }
        self.targets.push(WeightedTarget { weight, target });
        Ok(())
    }

    pub fn set_regularization(&mut self, regularization: Regularization) {
        self.regularization = Some(regularization);
    }

    pub fn regularization(&self) -> Option<&Regularization> {
        self.regularization.as_ref()
    }

    pub fn target(&self, name: &str) -> Option<&(dyn OptimizationTarget + 'static)> {
        self.targets.iter().find(|t| t.target.name() == name).map(|t| t.target.as_ref())
    }

    pub fn target_mut(&mut self, name: &str) -> Option<&mut (dyn OptimizationTarget + 'static)> {
        self.targets.iter_mut().find(|t| t.target.name() == name).map(|t| t.target.as_mut())
    }

    /// (name, weight) of every target in evaluation order.
    pub fn weights(&self) -> Vec<(String, f64)> {
        self.targets.iter().map(|t| (t.target.name().to_string(), t.weight)).collect()
    }

    pub fn targets(&self) -> impl Iterator<Item = &(dyn OptimizationTarget + 'static)> {
        self.targets.iter().map(|t| t.target.as_ref())
    }

    /// Number of time points every target has data for.
    pub fn num_time_points(&self) -> CardiacResult<usize> {
        let mut counts = self.targets.iter().map(|t| (t.target.name(), t.target.core().num_loaded()));
        let Some((_, n)) = counts.next() else {
            return Ok(0);
        };
        for (name, m) in counts {
            if m != n {
                return Err(CardiacError::Shape(format!(
                    "target '{name}' has {m} time points, expected {n}"
                )));
            }
        }
        Ok(n)
    }

    /// Weighted misfit at time point `it`.
    ///
    /// Nothing is saved unless every target evaluates, so the results logs
    /// keep equal lengths.
    pub fn evaluate_time_point(&mut self, it: usize, snapshot: &KinematicSnapshot) -> CardiacResult<f64> {
        let mut total = 0.0;
        for t in &mut self.targets {
            t.target.next_target(it)?;
            t.target.assign_simulated(snapshot)?;
            t.target.assign_functional()?;
            let value = t.target.get_value()?;
            debug!(target_name = t.target.name(), it, value, "target functional");
            total += t.weight * value;
        }
        for t in &mut self.targets {
            t.target.save()?;
        }
        Ok(total)
    }

    /// Evaluate the full series; `snapshots[t]` pairs with loaded target `t`.
    pub fn evaluate_series(
        &mut self,
        snapshots: &[KinematicSnapshot],
        control: &[f64],
    ) -> CardiacResult<FunctionalEvaluation> {
        let n = self.num_time_points()?;
        if snapshots.len() != n {
            return Err(CardiacError::Shape(format!(
                "{} simulated snapshots for {n} target time points",
                snapshots.len()
            )));
        }
        let mut eval = FunctionalEvaluation::default();
        for (it, snapshot) in snapshots.iter().enumerate() {
            let v = self.evaluate_time_point(it, snapshot)?;
            for t in &self.targets {
                *eval.per_target.entry(t.target.name().to_string()).or_insert(0.0) += t.target.get_value()?;
            }
            eval.per_time.push(v);
        }
        if let Some(reg) = &mut self.regularization {
            eval.regularization = reg.get_functional(control)?;
            reg.save();
        }
        eval.total = eval.per_time.iter().sum::<f64>() + eval.regularization;
        Ok(eval)
    }
}
