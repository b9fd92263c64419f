//! Reduced functional and L-BFGS driver via the `argmin` crate.
//!
//! The reduced functional hides the whole forward pipeline behind
//!
//!   evaluate(m)   → scale · J(m)
//!   derivative(m) → scale · relax · dJ/dm
//!
//! The forward solve and the adjoint are external ([`ForwardModel`]).  A
//! forward solve that crashes (nonlinear iteration budget exceeded) is
//! absorbed as J = +∞ so the outer search keeps going; a NaN gradient
//! aborts the run.
//!
//! Uses `Vec<f64>` as the argmin parameter type to avoid ndarray version
//! conflicts between our ndarray 0.16 and argmin-math's bundled ndarray.

use crate::tape::Tape;
use crate::types::{CardiacError, CardiacResult, KinematicSnapshot};
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::time::Instant;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────
//  Forward model contract
// ─────────────────────────────────────────────────────────────

/// What one forward run hands back.
#[derive(Debug, Clone, Default)]
pub struct ResultsBundle {
    /// Functional including regularization; the quantity differentiated.
    pub total_functional: f64,
    /// Misfit reported to the optimiser.
    pub func_value: f64,
    /// Flattened solver states, one per time point.
    pub states: Vec<Vec<f64>>,
    /// Kinematics, one snapshot per time point.
    pub displacements: Vec<KinematicSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct ForwardOutcome {
    pub results: ResultsBundle,
    /// The nonlinear solver exceeded its iteration budget.
    pub crashed: bool,
}

/// Forward solve and adjoint of the mechanics problem.  Blocking; may run
/// distributed work internally.
pub trait ForwardModel {
    /// Solve with control `control`, recording on `tape` while it is on.
    fn solve(&mut self, control: &[f64], tape: &Tape) -> CardiacResult<ForwardOutcome>;

    /// dJ/dm of the total functional of the last recorded solve.
    fn derivative(&mut self, control: &[f64], tape: &Tape) -> CardiacResult<Vec<f64>>;
}

// ─────────────────────────────────────────────────────────────
//  Reduced functional
// ─────────────────────────────────────────────────────────────

/// Diagnostics kept across calls.  Functional values are scaled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationHistory {
    pub func_values: Vec<f64>,
    pub controls: Vec<Vec<f64>>,
    pub forward_times: Vec<f64>,
    pub backward_times: Vec<f64>,
    pub grad_norm: Vec<f64>,
    pub grad_norm_scaled: Vec<f64>,
}

#[derive(Debug)]
struct LastForward {
    control: Vec<f64>,
    crashed: bool,
}

#[derive(Debug)]
pub struct ReducedFunctional<M: ForwardModel> {
    model: M,
    tape: Tape,
    scale: f64,
    relax: f64,
    initial_control: Vec<f64>,
    iteration: usize,
    crashes: usize,
    derivative_calls: usize,
    history: OptimizationHistory,
    initial_results: Option<ResultsBundle>,
    last_results: Option<ResultsBundle>,
    last: Option<LastForward>,
}

impl<M: ForwardModel> ReducedFunctional<M> {
    /// `scale` multiplies the functional; the derivative is multiplied by
    /// `scale · relax`.
    pub fn new(model: M, initial_control: Vec<f64>, scale: f64, relax: f64) -> CardiacResult<Self> {
        for (name, v) in [("scale", scale), ("relax", relax)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(CardiacError::Configuration(format!(
                    "{name} must be finite and positive, got {v}"
                )));
            }
        }
        Ok(Self {
            model,
            tape: Tape::new(),
            scale,
            relax,
            initial_control,
            iteration: 0,
            crashes: 0,
            derivative_calls: 0,
            history: OptimizationHistory::default(),
            initial_results: None,
            last_results: None,
            last: None,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn relax(&self) -> f64 {
        self.relax
    }

    pub fn initial_control(&self) -> &[f64] {
        &self.initial_control
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn crashes(&self) -> usize {
        self.crashes
    }

    pub fn derivative_calls(&self) -> usize {
        self.derivative_calls
    }

    pub fn history(&self) -> &OptimizationHistory {
        &self.history
    }

    /// Results of the first forward run.
    pub fn initial_results(&self) -> Option<&ResultsBundle> {
        self.initial_results.as_ref()
    }

    pub fn last_results(&self) -> Option<&ResultsBundle> {
        self.last_results.as_ref()
    }

    /// scale · J(control).  +∞ if the forward solve crashed.
    pub fn evaluate(&mut self, control: &[f64]) -> CardiacResult<f64> {
        self.iteration += 1;
        let control = control.to_vec();

        let start = Instant::now();
        let outcome = {
            let _session = self.tape.start();
            self.model.solve(&control, &self.tape)
        }?;
        let forward_time = start.elapsed().as_secs_f64();
        debug!(forward_time, "forward model evaluated");
        self.history.forward_times.push(forward_time);

        if self.initial_results.is_none() {
            info!(
                func_value = outcome.results.func_value,
                total_functional = outcome.results.total_functional,
                "initial forward run"
            );
            self.initial_results = Some(outcome.results.clone());
        }

        let func_value = if outcome.crashed {
            self.crashes += 1;
            warn!(iteration = self.iteration, crashes = self.crashes, "iteration limit exceeded, returning an infinite functional");
            f64::INFINITY
        } else {
            outcome.results.func_value
        };

        self.history.func_values.push(self.scale * func_value);
        self.history.controls.push(control.clone());
        info!(
            iteration = self.iteration,
            func_value,
            grad_norm = ?self.history.grad_norm_scaled.last(),
            "functional evaluated"
        );

        self.last = Some(LastForward { control, crashed: outcome.crashed });
        self.last_results = Some(outcome.results);
        Ok(self.scale * func_value)
    }

    /// scale · relax · dJ/dm at `control`.  Runs the forward model first if
    /// the last recorded solve was at a different control.
    pub fn derivative(&mut self, control: &[f64]) -> CardiacResult<Vec<f64>> {
        let recorded = matches!(&self.last, Some(last) if last.control == control);
        if !recorded {
            self.evaluate(control)?;
        }
        if self.last.as_ref().map_or(false, |last| last.crashed) {
            return Err(CardiacError::ForwardSolveCrash { iteration: self.iteration });
        }

        self.derivative_calls += 1;
        let start = Instant::now();
        let grad = self.model.derivative(control, &self.tape)?;
        let backward_time = start.elapsed().as_secs_f64();
        debug!(backward_time, "gradient evaluated");
        self.history.backward_times.push(backward_time);

        if let Some(component) = grad.iter().position(|g| g.is_nan()) {
            return Err(CardiacError::NumericalCorruption { component });
        }

        let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
        let factor = self.scale * self.relax;
        self.history.grad_norm.push(norm);
        self.history.grad_norm_scaled.push(norm * factor);
        debug!(grad_norm = norm, grad_norm_scaled = norm * factor, "|dJ|");

        Ok(grad.into_iter().map(|g| g * factor).collect())
    }

    /// Drop the most recent functional value, control and gradient norms.
    pub fn reset(&mut self) {
        self.history.func_values.pop();
        self.history.controls.pop();
        self.history.grad_norm.pop();
        self.history.grad_norm_scaled.pop();
    }
}

// ─────────────────────────────────────────────────────────────
//  Softplus barrier
// ─────────────────────────────────────────────────────────────

/// Numerically stable log(1 + exp(z)).
#[inline]
fn log1pexp(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Smooth one-sided barrier.
/// `k < 0` ⟹  penalise x < b  (min barrier).
/// `k > 0` ⟹  penalise x > b  (max barrier).
#[inline]
pub fn softplus(x: f64, b: f64, k: f64) -> f64 {
    log1pexp(-k * (b - x) - 1.0)
}

/// d/dx softplus = k · σ(z)  where z = −k(b−x)−1 and σ is the logistic fn.
#[inline]
pub fn softplus_grad(x: f64, b: f64, k: f64) -> f64 {
    let z = -k * (b - x) - 1.0;
    k / (1.0 + (-z).exp())
}

/// Box bounds on θ; infinite entries are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn unbounded(n: usize) -> Self {
        Self { lower: vec![f64::NEG_INFINITY; n], upper: vec![f64::INFINITY; n] }
    }

    pub fn uniform(n: usize, lower: f64, upper: f64) -> Self {
        Self { lower: vec![lower; n], upper: vec![upper; n] }
    }

    fn check(&self, n: usize) -> CardiacResult<()> {
        if self.lower.len() != n || self.upper.len() != n {
            return Err(CardiacError::Shape(format!(
                "bounds of length {}/{} for {n} parameters",
                self.lower.len(),
                self.upper.len()
            )));
        }
        if let Some(i) = (0..n).find(|&i| self.lower[i] > self.upper[i]) {
            return Err(CardiacError::Configuration(format!(
                "lower bound {} above upper bound {} for parameter {i}",
                self.lower[i], self.upper[i]
            )));
        }
        Ok(())
    }

    /// Σ softplus barriers over the finite bounds.
    pub fn penalty(&self, theta: &[f64], sharpness: f64) -> f64 {
        let mut loss = 0.0;
        for (i, &x) in theta.iter().enumerate() {
            if self.lower[i].is_finite() {
                loss += softplus(x, self.lower[i], -sharpness);
            }
            if self.upper[i].is_finite() {
                loss += softplus(x, self.upper[i], sharpness);
            }
        }
        loss
    }

    /// Accumulate `weight · ∂penalty/∂θ` into `grad`.
    pub fn penalty_grad(&self, grad: &mut [f64], theta: &[f64], sharpness: f64, weight: f64) {
        for (i, &x) in theta.iter().enumerate() {
            if self.lower[i].is_finite() {
                grad[i] += weight * softplus_grad(x, self.lower[i], -sharpness);
            }
            if self.upper[i].is_finite() {
                grad[i] += weight * softplus_grad(x, self.upper[i], sharpness);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  argmin problem wrapper
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerOptions {
    pub max_iterations: u64,
    /// L-BFGS correction pairs.
    pub memory: usize,
    pub tolerance_grad: f64,
    pub tolerance_cost: f64,
    /// Box bounds; `None` means unbounded.
    pub bounds: Option<Bounds>,
    pub barrier_weight: f64,
    pub barrier_sharpness: f64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            memory: 10,
            tolerance_grad: 1e-8,
            tolerance_cost: 1e-12,
            bounds: None,
            barrier_weight: 1.0,
            barrier_sharpness: 10.0,
        }
    }
}

/// Wraps the reduced functional so argmin can evaluate cost and gradient.
///
/// `RefCell` because argmin's `CostFunction` / `Gradient` take `&self`
/// while every evaluation appends to the functional's history.
///
/// **Evaluation cache**: argmin calls `cost(θ)` and `gradient(θ)`
/// separately.  The last `(θ, cost)` and `(θ, gradient)` are cached so each
/// unique θ costs one forward and one adjoint solve.
struct ReducedProblem<'a, M: ForwardModel> {
    functional: RefCell<&'a mut ReducedFunctional<M>>,
    options: &'a OptimizerOptions,
    bounds: Bounds,
    last_cost: RefCell<Option<(Vec<f64>, f64)>>,
    last_grad: RefCell<Option<(Vec<f64>, Vec<f64>)>>,
    /// Last finite gradient, reused when θ lands on a crashed forward solve.
    last_good_grad: RefCell<Option<Vec<f64>>>,
    /// First error that aborted the run, handed back to the caller as is.
    abort: &'a RefCell<Option<CardiacError>>,
}

impl<'a, M: ForwardModel> ReducedProblem<'a, M> {
    fn cached_cost(&self, theta: &[f64]) -> Option<f64> {
        match &*self.last_cost.borrow() {
            Some((t, v)) if t == theta => Some(*v),
            _ => None,
        }
    }

    fn cached_grad(&self, theta: &[f64]) -> Option<Vec<f64>> {
        match &*self.last_grad.borrow() {
            Some((t, g)) if t == theta => Some(g.clone()),
            _ => None,
        }
    }

    /// Keep the first typed error and give argmin a message to stop on.
    fn abort_with(&self, e: CardiacError) -> argmin::core::Error {
        let msg = e.to_string();
        let mut slot = self.abort.borrow_mut();
        if slot.is_none() {
            *slot = Some(e);
        }
        argmin::core::Error::msg(msg)
    }
}

impl<'a, M: ForwardModel> CostFunction for ReducedProblem<'a, M> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        if let Some(v) = self.cached_cost(theta) {
            return Ok(v);
        }
        let j = self
            .functional
            .borrow_mut()
            .evaluate(theta)
            .map_err(|e| self.abort_with(e))?;
        let v = j + self.options.barrier_weight * self.bounds.penalty(theta, self.options.barrier_sharpness);
        *self.last_cost.borrow_mut() = Some((theta.clone(), v));
        Ok(v)
    }
}

impl<'a, M: ForwardModel> Gradient for ReducedProblem<'a, M> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        if let Some(g) = self.cached_grad(theta) {
            return Ok(g);
        }
        let result = self.functional.borrow_mut().derivative(theta);
        let mut grad = match result {
            Ok(g) => {
                *self.last_good_grad.borrow_mut() = Some(g.clone());
                g
            }
            Err(CardiacError::ForwardSolveCrash { iteration }) => {
                warn!(iteration, "no gradient at a crashed forward solve, reusing the last one");
                self.last_good_grad
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| vec![0.0; theta.len()])
            }
            Err(e) => return Err(self.abort_with(e)),
        };
        self.bounds.penalty_grad(
            &mut grad,
            theta,
            self.options.barrier_sharpness,
            self.options.barrier_weight,
        );
        *self.last_grad.borrow_mut() = Some((theta.clone(), grad.clone()));
        Ok(grad)
    }
}

// ─────────────────────────────────────────────────────────────
//  Top-level optimisation entry point
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub control: Vec<f64>,
    /// Scaled functional (with barrier) at `control`.
    pub value: f64,
    pub iterations: u64,
    pub converged: bool,
    pub termination: String,
    pub crashes: usize,
}

/// Minimise the reduced functional with L-BFGS from its initial control.
pub fn optimize<M: ForwardModel>(
    functional: &mut ReducedFunctional<M>,
    options: &OptimizerOptions,
) -> CardiacResult<OptimizationResult> {
    let init_param = functional.initial_control().to_vec();
    let n = init_param.len();
    let bounds = options.bounds.clone().unwrap_or_else(|| Bounds::unbounded(n));
    bounds.check(n)?;

    let abort = RefCell::new(None);
    let problem = ReducedProblem {
        functional: RefCell::new(&mut *functional),
        options,
        bounds,
        last_cost: RefCell::new(None),
        last_grad: RefCell::new(None),
        last_good_grad: RefCell::new(None),
        abort: &abort,
    };

    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, options.memory)
        .with_tolerance_grad(options.tolerance_grad)?
        .with_tolerance_cost(options.tolerance_cost)?;

    let result = Executor::new(problem, solver)
        .configure(|config| {
            config
                .param(init_param)
                .max_iters(options.max_iterations)
                .target_cost(f64::NEG_INFINITY)
        })
        .run();
    let result = match result {
        Ok(result) => result,
        Err(e) => return Err(abort.borrow_mut().take().unwrap_or_else(|| e.into())),
    };

    let state = result.state();
    let control = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| CardiacError::Solver("L-BFGS returned no best parameters".into()))?;
    let termination = state
        .get_termination_reason()
        .map_or_else(|| "not terminated".to_string(), |r| format!("{r:?}"));
    let converged = matches!(
        state.get_termination_reason(),
        Some(TerminationReason::SolverConverged)
    );
    let value = state.get_best_cost();
    let iterations = state.get_iter();
    drop(result);

    info!(iterations, value, converged, %termination, crashes = functional.crashes(), "optimisation finished");

    Ok(OptimizationResult {
        control,
        value,
        iterations,
        converged,
        termination,
        crashes: functional.crashes(),
    })
}
