//! Predictor / restore round trips on the Nordsieck history.

use approx::assert_relative_eq;
use nalgebra::DVector;

use super::bdf_solver;

#[test]
fn restore_undoes_predict() {
    let mut v = bdf_solver();
    v.q = 3;
    v.h = 0.25;
    v.tn = 1.0;
    for (j, row) in v.zn.iter_mut().enumerate().take(4) {
        row[0] = 0.1 * (j as f64 + 1.0) * (1.0 + 0.3 * (j as f64)).sin();
    }
    let before: Vec<DVector<f64>> = v.zn.clone();
    let saved_t = v.tn;

    // apply the predictor recurrence, then undo it
    v.tn += v.h;
    for k in 1..=v.q {
        for j in (k..=v.q).rev() {
            v.pascal_row(j, 1.0);
        }
    }
    assert_ne!(v.zn[0], before[0]);

    v.restore(saved_t);
    for j in 0..=v.q {
        assert_relative_eq!(v.zn[j], before[j], max_relative = 1e-13);
    }
    assert_eq!(v.tn, saved_t);
}

#[test]
fn rescale_scales_rows_geometrically() {
    let mut v = bdf_solver();
    v.q = 2;
    v.h = 0.5;
    v.hscale = 0.5;
    v.eta = 0.25;
    v.zn[1][0] = 2.0;
    v.zn[2][0] = 4.0;

    v.rescale();

    assert_eq!(v.zn[1][0], 2.0 * 0.25);
    assert_eq!(v.zn[2][0], 4.0 * 0.25 * 0.25);
    assert_eq!(v.h, 0.5 * 0.25);
    assert_eq!(v.hscale, v.h);
    assert_eq!(v.hprime, v.h);
}
