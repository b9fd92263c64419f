//! Integration tests: reduced functional, L-BFGS driver and data plumbing.
//!
//! The forward models here stand in for the external mechanics solve:
//! a plain quadratic with switchable failure modes, and a cube cavity
//! inflated by a scalar dilation so that the whole target → functional →
//! optimiser pipeline runs end to end.

use approx::assert_relative_eq;
use cardiac_inverse::config::OptimizationSettings;
use cardiac_inverse::control::ControlSpace;
use cardiac_inverse::functional::FunctionalAssembly;
use cardiac_inverse::measurements::*;
use cardiac_inverse::optimizer::*;
use cardiac_inverse::store::ResultStore;
use cardiac_inverse::tape::Tape;
use cardiac_inverse::targets::*;
use cardiac_inverse::types::*;
use std::collections::BTreeMap;

// ─────────────────────────────────────────────────────────────
//  Helpers (mock forward models)
// ─────────────────────────────────────────────────────────────

/// J(m) = Σ (m_i − t_i)²
#[derive(Default)]
struct Quadratic {
    optimum: Vec<f64>,
    crash: bool,
    fail: bool,
    nan_gradient: bool,
    recording_seen: Vec<bool>,
}

impl Quadratic {
    fn new(optimum: Vec<f64>) -> Self {
        Self { optimum, ..Default::default() }
    }

    fn value(&self, m: &[f64]) -> f64 {
        m.iter().zip(&self.optimum).map(|(a, b)| (a - b) * (a - b)).sum()
    }
}

impl ForwardModel for Quadratic {
    fn solve(&mut self, control: &[f64], tape: &Tape) -> CardiacResult<ForwardOutcome> {
        self.recording_seen.push(tape.is_recording());
        if self.fail {
            return Err(CardiacError::Shape("mesh went missing".into()));
        }
        let j = self.value(control);
        Ok(ForwardOutcome {
            results: ResultsBundle { total_functional: j, func_value: j, ..Default::default() },
            crashed: self.crash,
        })
    }

    fn derivative(&mut self, control: &[f64], _tape: &Tape) -> CardiacResult<Vec<f64>> {
        let mut g: Vec<f64> = control.iter().zip(&self.optimum).map(|(a, b)| 2.0 * (a - b)).collect();
        if self.nan_gradient {
            g[1] = f64::NAN;
        }
        Ok(g)
    }
}

/// Unit cube cavity dilated by u = εX with ε the single control.
fn unit_cube_cavity() -> SurfaceQuadrature {
    let mut points = Vec::new();
    let mut normals = Vec::new();
    for axis in 0..3 {
        for &side in &[0.0, 1.0] {
            let mut x = vec3(0.5, 0.5, 0.5);
            x[axis] = side;
            let mut n = vec3(0.0, 0.0, 0.0);
            n[axis] = if side == 1.0 { -1.0 } else { 1.0 };
            points.push(x);
            normals.push(n);
        }
    }
    SurfaceQuadrature { points, normals, weights: vec![1.0; 6] }
}

struct CubeInflation {
    surface: SurfaceQuadrature,
    assembly: FunctionalAssembly,
}

impl CubeInflation {
    fn new(measured_volume: f64) -> Self {
        let surface = unit_cube_cavity();
        let mut target = VolumeTarget::left_ventricle(surface.clone()).unwrap();
        target.set_target_functions().unwrap();
        target.load_series(&TargetSeries::Volume(vec![measured_volume])).unwrap();
        let mut assembly = FunctionalAssembly::new();
        assembly.add_target(1.0, Box::new(target)).unwrap();
        Self { surface, assembly }
    }

    fn snapshot(&self, eps: f64) -> KinematicSnapshot {
        let kin = SurfaceKinematics {
            grad_u: vec![Tensor::identity(3, 3) * eps; self.surface.len()],
            u: self.surface.points.iter().map(|x| x * eps).collect(),
        };
        let mut surfaces = BTreeMap::new();
        surfaces.insert("ENDO_LV".to_string(), kin);
        KinematicSnapshot { surfaces, ..Default::default() }
    }
}

impl ForwardModel for CubeInflation {
    fn solve(&mut self, control: &[f64], _tape: &Tape) -> CardiacResult<ForwardOutcome> {
        let snapshot = self.snapshot(control[0]);
        let eval = self.assembly.evaluate_series(std::slice::from_ref(&snapshot), control)?;
        Ok(ForwardOutcome {
            results: ResultsBundle {
                total_functional: eval.total,
                func_value: eval.total,
                states: Vec::new(),
                displacements: vec![snapshot],
            },
            crashed: false,
        })
    }

    /// dJ/dε = ∂J/∂V · dV/dε  with  V = (1 + ε)³.
    fn derivative(&mut self, control: &[f64], _tape: &Tape) -> CardiacResult<Vec<f64>> {
        let target = self
            .assembly
            .target("Volume ENDO_LV")
            .ok_or_else(|| CardiacError::Shape("volume target missing".into()))?;
        let dj_dv = target.functional_gradient()?[[0, 0]];
        Ok(vec![dj_dv * 3.0 * (1.0 + control[0]).powi(2)])
    }
}

// ─────────────────────────────────────────────────────────────
//  Reduced functional
// ─────────────────────────────────────────────────────────────

#[test]
fn evaluation_records_on_the_tape_and_restores_it() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 2.0]), vec![0.0, 0.0], 2.0, 1.0).unwrap();
    assert!(!rf.tape().is_recording());
    let j = rf.evaluate(&[0.0, 0.0]).unwrap();
    assert_relative_eq!(j, 2.0 * 5.0);
    assert_eq!(rf.model().recording_seen, vec![true]);
    assert!(!rf.tape().is_recording());
    assert_eq!(rf.iteration(), 1);
    assert_eq!(rf.history().func_values, vec![10.0]);
    assert_eq!(rf.history().controls, vec![vec![0.0, 0.0]]);
    assert!(rf.initial_results().is_some());
}

#[test]
fn failed_solve_stops_recording() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 2.0]), vec![0.0, 0.0], 1.0, 1.0).unwrap();
    rf.model_mut().fail = true;
    assert!(matches!(rf.evaluate(&[0.5, 0.5]), Err(CardiacError::Shape(_))));
    assert!(!rf.tape().is_recording());
    assert_eq!(rf.tape().sessions_started(), 1);
}

#[test]
fn crashed_solve_yields_an_infinite_functional() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 2.0]), vec![0.0, 0.0], 1.0, 1.0).unwrap();
    rf.model_mut().crash = true;
    let j = rf.evaluate(&[3.0, 3.0]).unwrap();
    assert!(j.is_infinite() && j > 0.0);
    assert_eq!(rf.crashes(), 1);
    assert_eq!(rf.history().func_values.last().copied(), Some(f64::INFINITY));
    assert!(matches!(
        rf.derivative(&[3.0, 3.0]),
        Err(CardiacError::ForwardSolveCrash { iteration: 1 })
    ));

    rf.model_mut().crash = false;
    assert_relative_eq!(rf.evaluate(&[1.0, 2.0]).unwrap(), 0.0);
    assert_eq!(rf.crashes(), 1);
}

#[test]
fn nan_gradient_aborts() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 2.0]), vec![0.0, 0.0], 1.0, 1.0).unwrap();
    rf.model_mut().nan_gradient = true;
    assert!(matches!(
        rf.derivative(&[0.0, 0.0]),
        Err(CardiacError::NumericalCorruption { component: 1 })
    ));
}

#[test]
fn derivative_is_scaled_and_reuses_the_last_solve() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 2.0]), vec![0.0, 0.0], 2.0, 0.25).unwrap();
    rf.evaluate(&[0.0, 0.0]).unwrap();
    let g = rf.derivative(&[0.0, 0.0]).unwrap();
    assert_relative_eq!(g[0], -2.0 * 0.5);
    assert_relative_eq!(g[1], -4.0 * 0.5);
    assert_eq!(rf.iteration(), 1, "derivative at the recorded control must not re-solve");

    rf.derivative(&[1.0, 1.0]).unwrap();
    assert_eq!(rf.iteration(), 2);
    assert_eq!(rf.derivative_calls(), 2);

    let h = rf.history();
    assert_relative_eq!(h.grad_norm[0], 20f64.sqrt(), max_relative = 1e-14);
    assert_relative_eq!(h.grad_norm_scaled[0], 0.5 * 20f64.sqrt(), max_relative = 1e-14);
}

#[test]
fn reset_drops_the_latest_entries() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 2.0]), vec![0.0, 0.0], 1.0, 1.0).unwrap();
    rf.evaluate(&[0.0, 0.0]).unwrap();
    rf.derivative(&[0.0, 0.0]).unwrap();
    rf.derivative(&[0.5, 0.5]).unwrap();
    assert_eq!(rf.history().func_values.len(), 2);
    rf.reset();
    assert_eq!(rf.history().func_values, vec![5.0]);
    assert_eq!(rf.history().controls.len(), 1);
    assert_eq!(rf.history().grad_norm.len(), 1);
    assert_eq!(rf.history().grad_norm_scaled.len(), 1);
}

#[test]
fn invalid_scaling_is_rejected() {
    assert!(ReducedFunctional::new(Quadratic::new(vec![0.0]), vec![0.0], 0.0, 1.0).is_err());
    assert!(ReducedFunctional::new(Quadratic::new(vec![0.0]), vec![0.0], 1.0, f64::NAN).is_err());
}

// ─────────────────────────────────────────────────────────────
//  Optimisation
// ─────────────────────────────────────────────────────────────

#[test]
fn lbfgs_recovers_the_minimum_of_a_quadratic() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.5, -0.5]), vec![0.0, 0.0], 1.0, 1.0).unwrap();
    let options = OptimizerOptions { max_iterations: 50, ..Default::default() };
    let result = optimize(&mut rf, &options).unwrap();
    eprintln!("quadratic: {result:?}");
    assert!((result.control[0] - 1.5).abs() < 1e-5, "{:?}", result.control);
    assert!((result.control[1] + 0.5).abs() < 1e-5, "{:?}", result.control);
    assert!(result.value < 1e-9);
    assert_eq!(result.crashes, 0);
    assert!(rf.iteration() > 1);
}

#[test]
fn barrier_keeps_the_control_inside_its_bounds() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.5, -0.5]), vec![0.5, 0.5], 1.0, 1.0).unwrap();
    let options = OptimizerOptions {
        max_iterations: 100,
        bounds: Some(Bounds::uniform(2, 0.0, 1.0)),
        ..Default::default()
    };
    let result = optimize(&mut rf, &options).unwrap();
    eprintln!("bounded: {result:?}");
    assert!(result.control[0] > 0.5 && result.control[0] < 1.0, "{:?}", result.control);
    assert!(result.control[1] > 0.0 && result.control[1] < 0.5, "{:?}", result.control);
}

#[test]
fn mismatched_bounds_are_rejected() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 1.0]), vec![0.0, 0.0], 1.0, 1.0).unwrap();
    let options = OptimizerOptions { bounds: Some(Bounds::uniform(3, 0.0, 1.0)), ..Default::default() };
    assert!(matches!(optimize(&mut rf, &options), Err(CardiacError::Shape(_))));
}

#[test]
fn optimize_returns_the_error_that_stopped_the_run() {
    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 2.0]), vec![0.0, 0.0], 1.0, 1.0).unwrap();
    rf.model_mut().nan_gradient = true;
    assert!(matches!(
        optimize(&mut rf, &OptimizerOptions::default()),
        Err(CardiacError::NumericalCorruption { component: 1 })
    ));

    let mut rf = ReducedFunctional::new(Quadratic::new(vec![1.0, 2.0]), vec![0.0, 0.0], 1.0, 1.0).unwrap();
    rf.model_mut().fail = true;
    assert!(matches!(optimize(&mut rf, &OptimizerOptions::default()), Err(CardiacError::Shape(_))));
}

#[test]
fn cube_inflation_recovers_the_measured_volume() {
    let measured = 1.2f64;
    let mut rf = ReducedFunctional::new(CubeInflation::new(measured), vec![0.0], 1.0, 1.0).unwrap();
    let j0 = rf.evaluate(&[0.0]).unwrap();
    assert_relative_eq!(j0, ((1.2 - 1.0) / 1.2f64).powi(2), max_relative = 1e-10);

    let options = OptimizerOptions { max_iterations: 50, tolerance_grad: 1e-12, ..Default::default() };
    let result = optimize(&mut rf, &options).unwrap();
    eprintln!("cube inflation: {result:?}");
    let expected = measured.powf(1.0 / 3.0) - 1.0;
    assert!((result.control[0] - expected).abs() < 1e-4, "ε = {}, expected {expected}", result.control[0]);
    assert!(result.value < j0);

    let last = rf.last_results().unwrap();
    assert_eq!(last.displacements.len(), 1);
    let target = rf.model().assembly.target("Volume ENDO_LV").unwrap();
    assert_eq!(target.results().func_value.len(), rf.iteration());
}

// ─────────────────────────────────────────────────────────────
//  Settings
// ─────────────────────────────────────────────────────────────

#[test]
fn settings_build_the_configured_models() {
    let json = r#"{
        "material_model": "neo_hookean",
        "active_model": "active_stress",
        "material_parameters": { "mu": 0.5 },
        "regularization_space": "CG_1",
        "regularization_lambda": 0.1,
        "lower_bound": 0.0
    }"#;
    let settings = OptimizationSettings::from_json_str(json).unwrap();
    let material = settings.build_material().unwrap();
    assert_eq!(material.t_ref(), 300.0);
    assert_eq!(material.law().get("mu").unwrap(), 0.5);

    let reg = settings.build_regularization(2.0).unwrap();
    assert_eq!(reg.space(), ControlSpace::Nodal);
    assert_eq!(reg.lambda(), 0.1);

    let options = settings.optimizer_options(3);
    let bounds = options.bounds.unwrap();
    assert_eq!(bounds.lower, vec![0.0; 3]);
    assert!(bounds.upper.iter().all(|u| u.is_infinite()));

    let round_trip = OptimizationSettings::from_json_str(&settings.to_json_string().unwrap()).unwrap();
    assert_eq!(round_trip, settings);
}

#[test]
fn defaults_are_valid() {
    let settings = OptimizationSettings::default();
    settings.validate().unwrap();
    assert_eq!(settings.control_space().unwrap(), ControlSpace::Regional);
    assert_eq!(settings.build_material().unwrap().t_ref(), 1.0);
    assert!(settings.optimizer_options(4).bounds.is_none());
}

#[test]
fn bad_settings_are_rejected() {
    assert!(matches!(
        OptimizationSettings::from_json_str(r#"{ "active_model": "active_tension" }"#),
        Err(CardiacError::Configuration(_))
    ));
    match OptimizationSettings::from_json_str(r#"{ "regularization_space": "DG_0" }"#) {
        Err(CardiacError::Configuration(msg)) => assert!(msg.contains("unknown regularization space"), "{msg}"),
        other => panic!("expected a configuration error, got {other:?}"),
    }
    assert!(matches!(
        OptimizationSettings::from_json_str(r#"{ "scale": 0.0 }"#),
        Err(CardiacError::Configuration(_))
    ));
    assert!(matches!(
        OptimizationSettings::from_json_str(r#"{ "material_parameters": { "zeta": 1.0 } }"#),
        Err(CardiacError::Configuration(_))
    ));
    assert!(matches!(
        OptimizationSettings::from_json_str(r#"{ "lower_bound": 2.0, "upper_bound": 1.0 }"#),
        Err(CardiacError::Configuration(_))
    ));
    assert!(matches!(
        OptimizationSettings::from_json_str(r#"{ "gamma_space": "CG_1" }"#),
        Err(CardiacError::Serialization(_))
    ));
}

// ─────────────────────────────────────────────────────────────
//  Result store
// ─────────────────────────────────────────────────────────────

#[test]
fn store_round_trips_non_finite_values() {
    let mut store = ResultStore::new();
    store.write("passive/history/func_values", &[1.0, f64::INFINITY, f64::NAN, f64::NEG_INFINITY]).unwrap();
    let json = store.to_json_string().unwrap();
    assert!(json.contains("\"inf\""));

    let back = ResultStore::from_json_str(&json).unwrap();
    let values = back.read("passive/history/func_values").unwrap();
    assert_eq!(values[0], 1.0);
    assert_eq!(values[1], f64::INFINITY);
    assert!(values[2].is_nan());
    assert_eq!(values[3], f64::NEG_INFINITY);
}

#[test]
fn store_groups_can_be_replaced() {
    let mut store = ResultStore::new();
    let results = TargetResults {
        func_value: vec![0.1, 0.05],
        target: vec![vec![1.0], vec![1.2]],
        simulated: vec![vec![0.9], vec![1.1]],
    };
    store.write_target_results("passive", "Volume ENDO_LV", &results, None).unwrap();
    store.write_control("passive", &[0.3, 0.4]).unwrap();
    let history = OptimizationHistory { func_values: vec![1.0, 0.5], ..Default::default() };
    store.write_history("passive", &history).unwrap();

    assert!(store.contains("passive/Volume ENDO_LV/simulated/1"));
    assert_eq!(store.read("passive/optimal_control"), Some(&[0.3, 0.4][..]));
    assert!(store.contains_group("passive/history"));
    assert!(matches!(store.write("passive/history", &[1.0]), Err(CardiacError::Configuration(_))));

    let under = store.paths_under("passive/Volume ENDO_LV");
    assert_eq!(under.len(), 5);

    let removed = store.delete_group("passive").unwrap();
    assert!(removed > 0);
    assert!(store.is_empty());
}

#[test]
fn store_persists_to_disk() {
    let path = std::env::temp_dir().join(format!("cardiac_inverse_store_{}.json", std::process::id()));
    let mut store = ResultStore::new();
    store.write("a/b", &[1.0, 2.0]).unwrap();
    store.save(&path).unwrap();
    let loaded = ResultStore::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, store);
}

// ─────────────────────────────────────────────────────────────
//  Measurements
// ─────────────────────────────────────────────────────────────

fn patient() -> PatientData {
    PatientData {
        pressure: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        volume: Some(vec![100.0, 110.0, 120.0, 130.0, 140.0, 150.0]),
        passive_filling_duration: 3,
        ..Default::default()
    }
}

#[test]
fn phase_windows() {
    assert_eq!(phase_window(Phase::PassiveInflation, 3, 6, false).unwrap(), (0, 3));
    assert_eq!(phase_window(Phase::ActiveContraction, 3, 6, false).unwrap(), (2, 6));
    assert_eq!(phase_window(Phase::All, 3, 6, false).unwrap(), (0, 6));
    assert_eq!(phase_window(Phase::PassiveInflation, 3, 6, true).unwrap(), (0, 4));
    assert_eq!(phase_window(Phase::ActiveContraction, 3, 6, true).unwrap(), (3, 7));
    assert!(phase_window(Phase::All, 0, 6, false).is_err());
    assert!("diastole".parse::<Phase>().is_err());
}

#[test]
fn passive_measurements_are_offset_to_the_reference() {
    let reference = ReferenceVolumes { lv: 95.0, rv: None };
    let m = get_measurements(&patient(), &MeasurementOptions::default(), &reference).unwrap();
    assert_eq!(m.pressure, vec![0.0, 1.0, 2.0]);
    assert_eq!(m.pressure_offset, 1.0);
    assert_eq!(m.volume, Some(vec![75.0, 85.0, 95.0]));
    assert_eq!(m.volume_offset, Some(25.0));
    assert_eq!(m.volume_series(), Some(TargetSeries::Volume(vec![75.0, 85.0, 95.0])));
}

#[test]
fn unloaded_measurements_gain_a_leading_point() {
    let reference = ReferenceVolumes { lv: 95.0, rv: None };
    let options = MeasurementOptions { unload: true, ..Default::default() };
    let m = get_measurements(&patient(), &options, &reference).unwrap();
    assert_eq!(m.pressure, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(m.volume, Some(vec![-1.0, 75.0, 85.0, 95.0]));

    let active = MeasurementOptions { phase: Phase::ActiveContraction, ..Default::default() };
    let m = get_measurements(&patient(), &active, &reference).unwrap();
    assert_eq!(m.pressure, vec![2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn missing_volume_is_a_shape_error() {
    let mut p = patient();
    p.volume = None;
    let reference = ReferenceVolumes::default();
    assert!(matches!(
        get_measurements(&p, &MeasurementOptions::default(), &reference),
        Err(CardiacError::Shape(_))
    ));
}

#[test]
fn regional_strain_needs_every_segment() {
    let mut p = patient();
    let mut strain = BTreeMap::new();
    for segment in 1..=AHA_SEGMENTS {
        let s = 0.01 * segment as f64;
        strain.insert(segment, vec![[s, -s, 0.5 * s]; 6]);
    }
    p.strain = Some(strain.clone());
    let options = MeasurementOptions {
        weights: PhaseWeights { volume: 0.0, rv_volume: 0.0, regional_strain: 1.0 },
        ..Default::default()
    };
    let reference = ReferenceVolumes::default();
    let m = get_measurements(&p, &options, &reference).unwrap();
    assert!(m.volume.is_none());
    match m.regional_strain_series().unwrap() {
        Some(TargetSeries::RegionalStrain(snapshots)) => {
            assert_eq!(snapshots.len(), 3);
            assert_relative_eq!(snapshots[2][[16, 0]], 0.17, max_relative = 1e-14);
            assert_relative_eq!(snapshots[0][[4, 1]], -0.05, max_relative = 1e-14);
        }
        other => panic!("unexpected strain series {other:?}"),
    }

    strain.remove(&7);
    p.strain = Some(strain);
    let m = get_measurements(&p, &options, &reference).unwrap();
    assert!(matches!(m.regional_strain_series(), Err(CardiacError::Shape(_))));
}
