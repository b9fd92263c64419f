//! Constitutive laws, invariants and material configuration.

use approx::assert_relative_eq;
use cardiac_inverse::kinematics::{self, ActiveModel, Invariants};
use cardiac_inverse::material::*;
use cardiac_inverse::types::*;
use std::collections::BTreeMap;

fn fiber_stretch(eps: f64) -> Tensor {
    let mut f = Tensor::identity(3, 3);
    f[(0, 0)] += eps;
    f
}

fn params(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
}

// ─────────────────────────────────────────────────────────────
//  Fiber gating
// ─────────────────────────────────────────────────────────────

#[test]
fn compressed_fibers_store_no_energy() {
    let law = HolzapfelOgdenParameters::default();
    for &i4 in &[0.0, 0.3, 0.5, 0.9, 0.999_999, 1.0] {
        assert_eq!(law.w4(i4, Order::Value), 0.0, "W4({i4})");
        assert_eq!(law.w4(i4, Order::First), 0.0, "W4'({i4})");
    }
    assert!(law.w4(1.0 + 1e-6, Order::Value) > 0.0);
}

#[test]
fn fiber_energy_increases_in_tension() {
    let law = HolzapfelOgdenParameters::default();
    let mut previous = law.w4(1.0, Order::Value);
    for k in 1..=20 {
        let i4 = 1.0 + 0.05 * k as f64;
        let w = law.w4(i4, Order::Value);
        assert!(w > previous, "W4 not increasing at I4 = {i4}");
        previous = w;
    }
}

#[test]
fn isotropic_energy_vanishes_in_the_reference_state() {
    let ho = HolzapfelOgdenParameters::default();
    assert_eq!(ho.w1(3.0, Order::Value, 3), 0.0);
    assert_relative_eq!(ho.w1(3.0, Order::First, 3), ho.a / 2.0);

    let nh = NeoHookeanParameters::default();
    assert_eq!(nh.w1(3.0, Order::Value, 3), 0.0);
    assert_eq!(nh.w1(2.0, Order::Value, 2), 0.0);
    assert_eq!(nh.w4(1.5, Order::Value), 0.0);
}

#[test]
fn derivative_order_from_integer() {
    assert_eq!(Order::try_from(0).unwrap(), Order::Value);
    assert_eq!(Order::try_from(2).unwrap(), Order::Second);
    assert!(matches!(Order::try_from(3), Err(CardiacError::Configuration(_))));
}

// ─────────────────────────────────────────────────────────────
//  Active models
// ─────────────────────────────────────────────────────────────

#[test]
fn unknown_active_model_is_rejected() {
    let err = "active_tension".parse::<ActiveModel>().unwrap_err();
    match err {
        CardiacError::Configuration(msg) => {
            assert!(msg.contains("active_tension"), "{msg}");
            assert!(msg.contains("not implemented"), "{msg}");
        }
        other => panic!("expected a configuration error, got {other:?}"),
    }
    assert!(MaterialModel::from_tags("holzapfel_ogden", "active_tension", &BTreeMap::new(), None).is_err());
}

#[test]
fn t_ref_defaults_by_active_model() {
    let law = MaterialLaw::default_for(MaterialKind::HolzapfelOgden);
    let stress = MaterialModel::new(law, ActiveModel::ActiveStress, None).unwrap();
    assert_eq!(stress.t_ref(), 300.0);
    let strain = MaterialModel::new(law, ActiveModel::ActiveStrain, None).unwrap();
    assert_eq!(strain.t_ref(), 1.0);
    let explicit = MaterialModel::new(law, ActiveModel::ActiveStress, Some(100.0)).unwrap();
    assert_eq!(explicit.t_ref(), 100.0);
}

#[test]
fn active_stress_term_scales_with_t_ref() {
    let law = MaterialLaw::default_for(MaterialKind::NeoHookean);
    let model = MaterialModel::new(law, ActiveModel::ActiveStress, Some(100.0)).unwrap();
    assert_relative_eq!(model.wactive(0.2, 1.1, Order::Value), 22.0, epsilon = 1e-12);
    assert_relative_eq!(model.wactive(0.2, 1.1, Order::First), 20.0, epsilon = 1e-12);
    assert_eq!(model.wactive(0.2, 1.1, Order::Second), 0.0);

    let strain = MaterialModel::new(law, ActiveModel::ActiveStrain, None).unwrap();
    assert_eq!(strain.wactive(0.2, 1.1, Order::Value), 0.0);
}

#[test]
fn inactive_stress_model_reduces_to_the_passive_energy() {
    let eps = 0.01;
    let f = fiber_stretch(eps);
    let frame = FiberFrame::cartesian(3);
    let law = MaterialLaw::default_for(MaterialKind::NeoHookean);
    let model = MaterialModel::new(law, ActiveModel::ActiveStress, Some(100.0)).unwrap();

    let w = model.strain_energy(&f, &frame, 0.0).unwrap();
    let i1 = (1.0 + eps) * (1.0 + eps) + 2.0;
    assert_relative_eq!(w, 0.5 * 0.385 * (i1 - 3.0), max_relative = 1e-12);

    let ho = MaterialModel::new(
        MaterialLaw::default_for(MaterialKind::HolzapfelOgden),
        ActiveModel::ActiveStress,
        Some(100.0),
    )
    .unwrap();
    let i4 = (1.0 + eps) * (1.0 + eps);
    let passive = ho.w1(i1, Order::Value, 3) + ho.w4(i4, Order::Value);
    assert_relative_eq!(ho.strain_energy(&f, &frame, 0.0).unwrap(), passive, max_relative = 1e-12);
}

#[test]
fn active_strain_uses_elastic_invariants() {
    let gamma = 0.1;
    let m: f64 = 1.0 - gamma;
    let ie1 = kinematics::elastic_i1(ActiveModel::ActiveStrain, 3.0, 1.0, gamma, 3);
    assert_relative_eq!(ie1, m * 3.0 + (1.0 / (m * m) - m), max_relative = 1e-14);
    let ie4 = kinematics::elastic_i4f(ActiveModel::ActiveStrain, 1.0, gamma);
    assert_relative_eq!(ie4, 1.0 / (m * m), max_relative = 1e-14);

    let rossi = kinematics::elastic_i4f(ActiveModel::ActiveStrainRossi, 1.0, gamma);
    assert_relative_eq!(rossi, 1.0 / (1.1 * 1.1), max_relative = 1e-14);

    // In 2D the isotropic part is not rescaled: m^(4−2) = m².
    let ie1_2d = kinematics::elastic_i1(ActiveModel::ActiveStrain, 2.0, 1.0, gamma, 2);
    assert_relative_eq!(ie1_2d, m * m * 2.0 + (1.0 / (m * m) - m * m), max_relative = 1e-14);

    // Active stress leaves the invariants untouched.
    assert_eq!(kinematics::elastic_i1(ActiveModel::ActiveStress, 3.2, 1.1, gamma, 3), 3.2);
    assert_eq!(kinematics::elastic_i4f(ActiveModel::ActiveStress, 1.1, gamma), 1.1);
}

#[test]
fn zero_activation_strain_matches_raw_invariants() {
    let f = Tensor::from_row_slice(3, 3, &[1.05, 0.02, 0.0, 0.01, 0.97, 0.03, 0.0, 0.02, 1.01]);
    let f0 = vec3(1.0, 0.0, 0.0);
    let (i1, i4f) = kinematics::energy_invariants(ActiveModel::ActiveStrain, &f, &f0, 0.0).unwrap();
    assert_relative_eq!(i1, kinematics::i1(&f), max_relative = 1e-14);
    assert_relative_eq!(i4f, kinematics::i4(&f, &f0), max_relative = 1e-14);
}

// ─────────────────────────────────────────────────────────────
//  Invariants
// ─────────────────────────────────────────────────────────────

#[test]
fn invariants_of_a_fiber_stretch() {
    let f = fiber_stretch(0.1);
    let inv = Invariants::compute(&f, &FiberFrame::cartesian(3)).unwrap();
    assert_relative_eq!(inv.i1, 1.21 + 2.0, max_relative = 1e-14);
    assert_relative_eq!(inv.i4f, 1.21, max_relative = 1e-14);
    assert_relative_eq!(inv.i4s, 1.0, max_relative = 1e-14);
    assert_relative_eq!(inv.i4n, 1.0, max_relative = 1e-14);
    assert_eq!(inv.i8fs, 0.0);
}

#[test]
fn missing_sheet_directions_give_zero_invariants() {
    let f = fiber_stretch(0.1);
    let inv = Invariants::compute(&f, &FiberFrame::fiber_only(vec3(1.0, 0.0, 0.0))).unwrap();
    assert_eq!(inv.i4s, 0.0);
    assert_eq!(inv.i4n, 0.0);
    assert_eq!(inv.i8fs, 0.0);
}

#[test]
fn one_dimensional_tensors_are_rejected() {
    let f = Tensor::identity(1, 1);
    assert!(matches!(
        Invariants::compute(&f, &FiberFrame::fiber_only(Vector::from_vec(vec![1.0]))),
        Err(CardiacError::Shape(_))
    ));
}

// ─────────────────────────────────────────────────────────────
//  Stress
// ─────────────────────────────────────────────────────────────

#[test]
fn neo_hookean_cauchy_stress() {
    let f = Tensor::from_row_slice(3, 3, &[1.1, 0.05, 0.0, 0.0, 0.95, 0.02, 0.01, 0.0, 1.0]);
    let frame = FiberFrame::cartesian(3);
    let model = MaterialModel::new(
        MaterialLaw::NeoHookean(NeoHookeanParameters { mu: 0.5 }),
        ActiveModel::ActiveStrain,
        None,
    )
    .unwrap();
    let p = 0.3;
    let sigma = model.cauchy_stress(&f, &frame, 0.0, p).unwrap();
    let expected = kinematics::left_cauchy_green(&f) * 0.5 - Tensor::identity(3, 3) * p;
    for i in 0..3 {
        for j in 0..3 {
            assert_relative_eq!(sigma[(i, j)], expected[(i, j)], epsilon = 1e-13);
        }
    }
}

#[test]
fn guccione_stress_is_symmetric_and_vanishes_at_rest() {
    let frame = FiberFrame::cartesian(3);
    let model = MaterialModel::new(
        MaterialLaw::default_for(MaterialKind::Guccione),
        ActiveModel::ActiveStress,
        None,
    )
    .unwrap();
    let rest = model.cauchy_stress(&Tensor::identity(3, 3), &frame, 0.0, 0.0).unwrap();
    assert!(rest.amax() < 1e-14, "stress at rest: {rest}");

    let f = Tensor::from_row_slice(3, 3, &[1.08, 0.03, 0.01, 0.02, 0.96, 0.04, 0.0, 0.01, 1.02]);
    let sigma = model.cauchy_stress(&f, &frame, 0.0, 0.0).unwrap();
    assert!((&sigma - sigma.transpose()).amax() < 1e-12);
}

#[test]
fn guccione_requires_three_dimensions_and_a_full_frame() {
    let g = GuccioneParameters::default();
    let f2 = Tensor::identity(2, 2);
    assert!(matches!(
        g.strain_energy(&f2, &FiberFrame::cartesian(2), 0.0),
        Err(CardiacError::Shape(_))
    ));
    let f3 = fiber_stretch(0.05);
    assert!(matches!(
        g.strain_energy(&f3, &FiberFrame::fiber_only(vec3(1.0, 0.0, 0.0)), 0.0),
        Err(CardiacError::Shape(_))
    ));
    let iso = GuccioneParameters { bf: 1.0, bt: 1.0, bfs: 1.0, ..Default::default() };
    assert!(iso.strain_energy(&f3, &FiberFrame::fiber_only(vec3(1.0, 0.0, 0.0)), 0.0).is_ok());
}

#[test]
fn mismatched_frame_lengths_are_shape_errors() {
    let model = MaterialModel::new(
        MaterialLaw::NeoHookean(NeoHookeanParameters { mu: 0.5 }),
        ActiveModel::ActiveStrain,
        None,
    )
    .unwrap();
    let planar_fiber = FiberFrame::fiber_only(Vector::from_vec(vec![1.0, 0.0]));
    assert!(matches!(
        model.cauchy_stress(&Tensor::identity(3, 3), &planar_fiber, 0.0, 0.0),
        Err(CardiacError::Shape(_))
    ));

    let short_sheet = FiberFrame::new(
        vec3(1.0, 0.0, 0.0),
        Vector::from_vec(vec![0.0, 1.0]),
        vec3(0.0, 0.0, 1.0),
    );
    let g = GuccioneParameters::default();
    assert!(matches!(g.strain_energy(&fiber_stretch(0.05), &short_sheet, 0.0), Err(CardiacError::Shape(_))));
    let iso_active = GuccioneParameters { bf: 1.0, bt: 1.0, bfs: 1.0, t_active: Some(1.0), ..Default::default() };
    assert!(matches!(
        iso_active.second_piola_kirchhoff(&fiber_stretch(0.05), &planar_fiber, 0.3),
        Err(CardiacError::Shape(_))
    ));
    let guccione = MaterialModel::new(MaterialLaw::Guccione(g), ActiveModel::ActiveStress, None).unwrap();
    assert!(matches!(
        guccione.cauchy_stress(&fiber_stretch(0.05), &short_sheet, 0.0, 0.0),
        Err(CardiacError::Shape(_))
    ));
}

#[test]
fn energy_is_integrated_over_quadrature_points() {
    let eps = 0.02;
    let snapshot = KinematicSnapshot {
        grad_u: vec![fiber_stretch(eps) - Tensor::identity(3, 3); 2],
        u: vec![vec3(0.0, 0.0, 0.0); 2],
        ..Default::default()
    };
    let frames = vec![FiberFrame::cartesian(3); 2];
    let model = MaterialModel::new(
        MaterialLaw::NeoHookean(NeoHookeanParameters { mu: 1.0 }),
        ActiveModel::ActiveStress,
        None,
    )
    .unwrap();
    let w = 0.5 * ((1.0 + eps) * (1.0 + eps) - 1.0);
    let field = model.strain_energy_field(&snapshot, &frames, &[0.0, 0.0]).unwrap();
    assert_relative_eq!(field[0], w, max_relative = 1e-12);
    let total = model.total_energy(&snapshot, &frames, &[0.0, 0.0], &[0.25, 0.75]).unwrap();
    assert_relative_eq!(total, w, max_relative = 1e-12);
    assert!(model.total_energy(&snapshot, &frames, &[0.0], &[1.0, 1.0]).is_err());
}

// ─────────────────────────────────────────────────────────────
//  Parameter schema
// ─────────────────────────────────────────────────────────────

#[test]
fn material_parameters_follow_the_schema() {
    let law = MaterialLaw::from_map(MaterialKind::HolzapfelOgden, &params(&[("a", 1.0), ("b_f", 10.0)])).unwrap();
    assert_eq!(law.get("a").unwrap(), 1.0);
    assert_eq!(law.get("b").unwrap(), 9.726);
    assert_eq!(law.get("b_f").unwrap(), 10.0);

    assert!(matches!(
        MaterialLaw::from_map(MaterialKind::HolzapfelOgden, &params(&[("mu", 1.0)])),
        Err(CardiacError::Configuration(_))
    ));
    assert!(matches!(
        MaterialLaw::from_map(MaterialKind::NeoHookean, &params(&[("mu", -0.1)])),
        Err(CardiacError::Configuration(_))
    ));
    assert!("fung".parse::<MaterialKind>().is_err());
}

#[test]
fn optional_guccione_parameters_read_back_as_nan_until_set() {
    let mut law = MaterialLaw::default_for(MaterialKind::Guccione);
    assert!(law.get("kappa").unwrap().is_nan());
    assert!(law.validate().is_ok());
    law.set("Tactive", 1.0).unwrap();
    assert_eq!(law.get("Tactive").unwrap(), 1.0);
    match law {
        MaterialLaw::Guccione(p) => assert_eq!(p.t_active, Some(1.0)),
        _ => unreachable!(),
    }
}
