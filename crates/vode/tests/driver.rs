//! Driver-level behavior: tstop, re-initialization round trips, work caps
//! and recovery from transient right-hand-side failures.

use std::cell::Cell;

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use vode::{
    CallbackError, Error, Jac, Method, QuadRhs, Rhs, SensParams, SensRhs, SolveStatus, Task,
    TolControl, Vode,
};

/// y' = 1 integrates to y = t.
#[derive(Debug)]
struct UnitSlope;

impl Rhs<f64> for UnitSlope {
    fn rhs(&self, _t: f64, _y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        ydot[0] = 1.0;
        Ok(())
    }
}

impl Jac<f64> for UnitSlope {
    fn jac(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _fy: &DVector<f64>,
        j: &mut DMatrix<f64>,
    ) -> Result<(), CallbackError> {
        j[(0, 0)] = 0.0;
        Ok(())
    }
}

impl QuadRhs<f64> for UnitSlope {}
impl SensRhs<f64> for UnitSlope {}
impl SensParams<f64> for UnitSlope {}

/// Exponential decay whose rhs reports a recoverable failure for a fixed
/// number of calls once `t` passes 0.5.
#[derive(Debug)]
struct FlakyDecay {
    failures_left: Cell<u32>,
}

impl Rhs<f64> for FlakyDecay {
    fn rhs(&self, t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        if t > 0.5 && self.failures_left.get() > 0 {
            self.failures_left.set(self.failures_left.get() - 1);
            return Err(CallbackError::Recoverable);
        }
        ydot[0] = -y[0];
        Ok(())
    }
}

impl Jac<f64> for FlakyDecay {
    fn jac(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _fy: &DVector<f64>,
        j: &mut DMatrix<f64>,
    ) -> Result<(), CallbackError> {
        j[(0, 0)] = -1.0;
        Ok(())
    }
}

impl QuadRhs<f64> for FlakyDecay {}
impl SensRhs<f64> for FlakyDecay {}
impl SensParams<f64> for FlakyDecay {}

fn unit_slope_solver() -> Vode<f64, UnitSlope, linear::Dense, nonlinear::Newton<f64>> {
    let y0 = DVector::from_vec(vec![0.0]);
    Vode::new(
        UnitSlope,
        linear::Dense::new(1),
        TolControl::new_ss(1e-8, 1e-12),
        Method::Bdf,
        0.0,
        &y0,
    )
    .unwrap()
}

#[test]
fn tstop_is_hit_exactly_and_reported() {
    let mut v = unit_slope_solver();
    v.set_max_num_steps(10000);
    v.set_stop_time(0.37).unwrap();

    let mut tret = 0.0;
    let status = v.solve(1.0, &mut tret, Task::Normal).unwrap();
    assert_eq!(status, SolveStatus::TStop);
    assert!(
        (tret - 0.37).abs() <= 1e-9,
        "stop time missed: tret = {}",
        tret
    );
    assert_relative_eq!(v.y()[0], 0.37, max_relative = 1e-8);

    // the stop time is consumed; the next call continues to tout
    let status = v.solve(1.0, &mut tret, Task::Normal).unwrap();
    assert_eq!(status, SolveStatus::Success);
    assert_eq!(tret, 1.0);
    assert_relative_eq!(v.y()[0], 1.0, max_relative = 1e-8);
}

#[test]
fn tstop_behind_the_current_time_is_rejected() {
    let mut v = unit_slope_solver();
    v.set_max_num_steps(10000);
    let mut tret = 0.0;
    v.solve(0.5, &mut tret, Task::Normal).unwrap();

    assert!(matches!(
        v.set_stop_time(0.1),
        Err(Error::BadTstop { .. })
    ));
}

#[test]
fn work_cap_returns_too_much_work() {
    let mut v = unit_slope_solver();
    v.set_max_num_steps(3);

    let mut tret = 0.0;
    match v.solve(1.0e6, &mut tret, Task::Normal) {
        Err(Error::TooMuchWork { mxstep: 3, .. }) => {}
        other => panic!("expected TooMuchWork, got {:?}", other),
    }
    // the state at the cap is still queryable
    assert!(tret > 0.0);
    assert_relative_eq!(v.y()[0], tret, max_relative = 1e-8);
}

#[test]
fn recovers_from_transient_rhs_failures() {
    let run = |failures: u32| -> (f64, usize, usize) {
        let y0 = DVector::from_vec(vec![1.0]);
        let mut v: Vode<f64, FlakyDecay, linear::Dense, nonlinear::Newton<f64>> = Vode::new(
            FlakyDecay {
                failures_left: Cell::new(failures),
            },
            linear::Dense::new(1),
            TolControl::new_ss(1e-8, 1e-12),
            Method::Bdf,
            0.0,
            &y0,
        )
        .unwrap();
        v.set_max_num_steps(20000);
        let mut tret = 0.0;
        v.solve(1.0, &mut tret, Task::Normal).unwrap();
        let stats = v.stats();
        (v.y()[0], stats.ncfn, stats.nst)
    };

    let (clean, clean_ncfn, _) = run(0);
    let (flaky, flaky_ncfn, _) = run(4);

    assert_eq!(clean_ncfn, 0);
    assert!(flaky_ncfn >= 1, "failures must be counted");
    assert_relative_eq!(clean, (-1.0f64).exp(), max_relative = 1e-6);
    // the transient failures must not change the answer beyond tolerance
    assert_relative_eq!(flaky, clean, max_relative = 1e-5);
}

#[test]
fn reinit_reproduces_the_counter_trajectory() {
    let y0 = DVector::from_vec(vec![1.0]);
    let mut v: Vode<f64, FlakyDecay, linear::Dense, nonlinear::Newton<f64>> = Vode::new(
        FlakyDecay {
            failures_left: Cell::new(0),
        },
        linear::Dense::new(1),
        TolControl::new_ss(1e-8, 1e-12),
        Method::Bdf,
        0.0,
        &y0,
    )
    .unwrap();
    v.set_max_num_steps(20000);

    let mut tret = 0.0;
    v.solve(1.0, &mut tret, Task::Normal).unwrap();
    let first = v.stats();
    let y_first = v.y().clone();

    v.re_init(0.0, &y0).unwrap();
    let mut tret2 = 0.0;
    v.solve(1.0, &mut tret2, Task::Normal).unwrap();
    let second = v.stats();

    assert_eq!(first.nst, second.nst);
    assert_eq!(first.nfe, second.nfe);
    assert_eq!(first.netf, second.netf);
    assert_eq!(first.qu, second.qu);
    assert_eq!(v.y()[0], y_first[0]);
}
