//! Dense output from a hand-loaded history.

use approx::assert_relative_eq;
use nalgebra::DVector;

use crate::Error;

use super::bdf_solver;

/// Loads a solver as if it had just completed a step of size `h` at order 2
/// with history rows [a, b, c], i.e. the interpolant
/// `y(tn + s*h) = a + b*s + c*s^2`.
fn loaded_solver(a: f64, b: f64, c: f64, h: f64, tn: f64) -> super::TestSolver {
    let mut v = bdf_solver();
    v.q = 2;
    v.qu = 2;
    v.h = h;
    v.hu = h;
    v.tn = tn;
    v.nst = 5;
    v.zn[0][0] = a;
    v.zn[1][0] = b;
    v.zn[2][0] = c;
    v
}

#[test]
fn value_and_derivatives_match_the_polynomial() {
    let (a, b, c, h, tn) = (1.25, -0.5, 0.125, 0.1, 2.0);
    let v = loaded_solver(a, b, c, h, tn);
    let mut dky = DVector::zeros(1);

    // at s = 0 the value is zn[0]
    v.get_dky(tn, 0, &mut dky).unwrap();
    assert_relative_eq!(dky[0], a, max_relative = 1e-14);

    // halfway back into the last step, s = -0.5
    let t = tn - 0.5 * h;
    v.get_dky(t, 0, &mut dky).unwrap();
    assert_relative_eq!(dky[0], a - 0.5 * b + 0.25 * c, max_relative = 1e-13);

    // first derivative: (b + 2*c*s)/h
    v.get_dky(t, 1, &mut dky).unwrap();
    assert_relative_eq!(dky[0], (b + 2.0 * c * (-0.5)) / h, max_relative = 1e-13);

    // second derivative: 2*c/h^2
    v.get_dky(t, 2, &mut dky).unwrap();
    assert_relative_eq!(dky[0], 2.0 * c / (h * h), max_relative = 1e-13);
}

#[test]
fn rejects_k_beyond_last_order() {
    let v = loaded_solver(1.0, 1.0, 1.0, 0.1, 0.0);
    let mut dky = DVector::zeros(1);
    match v.get_dky(0.0, 3, &mut dky) {
        Err(Error::BadK { k: 3, qu: 2 }) => {}
        other => panic!("expected BadK, got {:?}", other),
    }
}

#[test]
fn rejects_t_outside_the_last_step() {
    let v = loaded_solver(1.0, 1.0, 1.0, 0.1, 2.0);
    let mut dky = DVector::zeros(1);
    // far before tn - hu
    assert!(matches!(
        v.get_dky(1.5, 0, &mut dky),
        Err(Error::BadT { .. })
    ));
    // past tn
    assert!(matches!(
        v.get_dky(2.5, 0, &mut dky),
        Err(Error::BadT { .. })
    ));
}
