//! Coefficient engine values at constant step size, checked against hand
//! derivations of the classic fixed-step formulas.

use approx::assert_relative_eq;

use super::{adams_solver, bdf_solver};

#[test]
fn bdf_order_one_is_backward_euler() {
    let mut v = bdf_solver();
    v.q = 1;
    v.h = 0.1;
    v.tau[1] = 0.1;
    v.set_coefficients();

    assert_eq!(v.l[0], 1.0);
    assert_eq!(v.l[1], 1.0);
    // gamma = h / l[1]
    assert_relative_eq!(v.nlp.lp.gamma, 0.1);
    // local error constant of backward Euler
    assert_relative_eq!(v.tq[2], 0.5);
    assert_relative_eq!(v.tq[4], v.nlscoef / 0.5);
}

#[test]
fn bdf_order_two_constant_h() {
    let mut v = bdf_solver();
    v.q = 2;
    v.qwait = 3;
    v.h = 0.1;
    v.tau[1] = 0.1;
    v.tau[2] = 0.1;
    v.set_coefficients();

    // corrector polynomial (1 + x)(1 + x/2) = 1 + 1.5x + 0.5x^2
    assert_relative_eq!(v.l[0], 1.0);
    assert_relative_eq!(v.l[1], 1.5);
    assert_relative_eq!(v.l[2], 0.5);
    // leading coefficient 2h/3
    assert_relative_eq!(v.nlp.lp.gamma, 0.1 * 2.0 / 3.0, max_relative = 1e-14);
    // error constant 2/9 at constant step size
    assert_relative_eq!(v.tq[2], 2.0 / 9.0, max_relative = 1e-14);
}

#[test]
fn adams_order_one() {
    let mut v = adams_solver();
    v.q = 1;
    v.h = 0.2;
    v.tau[1] = 0.2;
    v.set_coefficients();

    assert_eq!(v.l[0], 1.0);
    assert_eq!(v.l[1], 1.0);
    assert_relative_eq!(v.tq[2], 0.5);
    assert_relative_eq!(v.tq[3], 1.0 / 12.0);
}

#[test]
fn adams_order_two_constant_h_is_trapezoid() {
    let mut v = adams_solver();
    v.q = 2;
    v.qwait = 3;
    v.h = 0.2;
    v.tau[1] = 0.2;
    v.tau[2] = 0.2;
    v.set_coefficients();

    // l(x) has l[1] = 2, so gamma = h/2: the trapezoid corrector
    assert_relative_eq!(v.l[0], 1.0);
    assert_relative_eq!(v.l[1], 2.0);
    assert_relative_eq!(v.l[2], 1.0);
    assert_relative_eq!(v.nlp.lp.gamma, 0.1);
    assert_relative_eq!(v.tq[2], 1.0 / 6.0, max_relative = 1e-14);
}

#[test]
fn gamma_ratio_tracks_gamma_changes() {
    let mut v = bdf_solver();
    v.q = 1;
    v.h = 0.1;
    v.tau[1] = 0.1;
    v.set_coefficients();
    let gamma0 = v.nlp.lp.gamma;

    // pretend a step happened, then halve h
    v.nst = 1;
    v.h = 0.05;
    v.set_coefficients();
    assert_relative_eq!(v.nlp.lp.gamma, gamma0 / 2.0);
    assert_relative_eq!(v.nlp.lp.gamrat, 0.5);
}
