//! Non-stiff integration with the Adams family and functional iteration.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use vode::{
    CallbackError, Jac, Method, QuadRhs, Rhs, SensParams, SensRhs, SolveStatus, Task, TolControl,
    Vode,
};

/// y' = y*cos(t), y(0) = 1, with exact solution exp(sin(t)).
#[derive(Debug)]
struct CosineGrowth;

impl Rhs<f64> for CosineGrowth {
    fn rhs(&self, t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        ydot[0] = y[0] * t.cos();
        Ok(())
    }
}

impl Jac<f64> for CosineGrowth {
    fn jac(
        &self,
        t: f64,
        _y: &DVector<f64>,
        _fy: &DVector<f64>,
        j: &mut DMatrix<f64>,
    ) -> Result<(), CallbackError> {
        j[(0, 0)] = t.cos();
        Ok(())
    }
}

impl QuadRhs<f64> for CosineGrowth {}
impl SensRhs<f64> for CosineGrowth {}
impl SensParams<f64> for CosineGrowth {}

fn cosine_solver() -> Vode<f64, CosineGrowth, linear::Dense, nonlinear::FixedPoint<f64>> {
    let y0 = DVector::from_vec(vec![1.0]);
    Vode::new(
        CosineGrowth,
        linear::Dense::new(1),
        TolControl::new_ss(1e-6, 1e-10),
        Method::Adams,
        0.0,
        &y0,
    )
    .unwrap()
}

#[test]
fn reaches_tout_with_controlled_error() {
    let mut v = cosine_solver();
    v.set_max_num_steps(5000);

    let mut tret = 0.0;
    let status = v.solve(5.0, &mut tret, Task::Normal).unwrap();
    assert_eq!(status, SolveStatus::Success);
    assert_eq!(tret, 5.0);

    let exact = 5.0f64.sin().exp();
    assert!(
        (v.y()[0] - exact).abs() < 5e-5,
        "y(5) = {} vs exact {}",
        v.y()[0],
        exact
    );

    let stats = v.stats();
    assert!(stats.nst > 10);
    assert!(stats.nfe > stats.nst);
    assert_eq!(stats.nsetups, 0, "functional iteration never sets up");
}

#[test]
fn one_step_mode_advances_monotonically() {
    let mut v = cosine_solver();
    v.set_max_num_steps(5000);

    let mut tret = 0.0;
    let mut last = 0.0;
    for _ in 0..25 {
        let status = v.solve(5.0, &mut tret, Task::OneStep).unwrap();
        assert_eq!(status, SolveStatus::Success);
        assert!(tret > last, "time must advance every one-step call");
        last = tret;
    }
    assert_relative_eq!(v.y()[0], last.sin().exp(), max_relative = 1e-3);
}

#[test]
fn interpolated_output_is_consistent_with_the_history() {
    let mut v = cosine_solver();
    v.set_max_num_steps(5000);

    let mut tret = 0.0;
    v.solve(3.0, &mut tret, Task::Normal).unwrap();

    let stats = v.stats();
    let t_mid = stats.tcur - 0.5 * stats.hu;
    let mut y_mid = DVector::zeros(1);
    let mut dy_mid = DVector::zeros(1);
    v.get_dky(t_mid, 0, &mut y_mid).unwrap();
    v.get_dky(t_mid, 1, &mut dy_mid).unwrap();

    // value and derivative of the interpolant track the exact flow
    assert_relative_eq!(y_mid[0], t_mid.sin().exp(), max_relative = 1e-4);
    assert_relative_eq!(
        dy_mid[0],
        t_mid.cos() * t_mid.sin().exp(),
        max_relative = 1e-2
    );
}

#[test]
fn order_ramp_raises_the_order_and_doubles_the_step() {
    let mut v = cosine_solver();
    v.set_max_num_steps(5000);

    let mut tret = 0.0;
    // a handful of one-step calls through the startup ramp
    let mut h_first = None;
    for _ in 0..6 {
        v.solve(5.0, &mut tret, Task::OneStep).unwrap();
        let stats = v.stats();
        if h_first.is_none() {
            h_first = Some(stats.hu);
        }
        assert!(stats.qcur >= stats.qu);
    }
    let stats = v.stats();
    assert!(stats.qu > 1, "order should have been raised during startup");
    assert!(
        stats.hu.abs() > 2.0 * h_first.unwrap().abs(),
        "step size should have grown during startup"
    );
}
