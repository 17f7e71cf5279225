//! Stiff integration with BDF, Newton iteration and the dense solver.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use vode::{
    CallbackError, Jac, Method, QuadRhs, Rhs, SensParams, SensRhs, SolveStatus, Task, TolControl,
    Vode,
};

/// y' = -100*(y - cos(t)) - sin(t), y(0) = 1, with exact solution cos(t).
#[derive(Debug)]
struct StiffRelax;

impl Rhs<f64> for StiffRelax {
    fn rhs(&self, t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        ydot[0] = -100.0 * (y[0] - t.cos()) - t.sin();
        Ok(())
    }
}

impl Jac<f64> for StiffRelax {
    fn jac(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _fy: &DVector<f64>,
        j: &mut DMatrix<f64>,
    ) -> Result<(), CallbackError> {
        j[(0, 0)] = -100.0;
        Ok(())
    }
}

impl QuadRhs<f64> for StiffRelax {}
impl SensRhs<f64> for StiffRelax {}
impl SensParams<f64> for StiffRelax {}

/// Van der Pol in Lienard form with mu = 1000:
/// y0' = y1, y1' = mu*((1 - y0^2)*y1) - y0.
#[derive(Debug)]
struct VanDerPol {
    mu: f64,
}

impl Rhs<f64> for VanDerPol {
    fn rhs(&self, _t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        ydot[0] = y[1];
        ydot[1] = self.mu * (1.0 - y[0] * y[0]) * y[1] - y[0];
        Ok(())
    }
}

impl Jac<f64> for VanDerPol {
    fn jac(
        &self,
        _t: f64,
        y: &DVector<f64>,
        _fy: &DVector<f64>,
        j: &mut DMatrix<f64>,
    ) -> Result<(), CallbackError> {
        j[(0, 0)] = 0.0;
        j[(0, 1)] = 1.0;
        j[(1, 0)] = -2.0 * self.mu * y[0] * y[1] - 1.0;
        j[(1, 1)] = self.mu * (1.0 - y[0] * y[0]);
        Ok(())
    }
}

impl QuadRhs<f64> for VanDerPol {}
impl SensRhs<f64> for VanDerPol {}
impl SensParams<f64> for VanDerPol {}

#[test]
fn stiff_relaxation_tracks_the_slow_manifold() {
    let y0 = DVector::from_vec(vec![1.0]);
    let mut v: Vode<f64, StiffRelax, linear::Dense, nonlinear::Newton<f64>> = Vode::new(
        StiffRelax,
        linear::Dense::new(1),
        TolControl::new_ss(1e-6, 1e-8),
        Method::Bdf,
        0.0,
        &y0,
    )
    .unwrap();
    v.set_max_num_steps(20000);

    let mut tret = 0.0;
    let status = v.solve(2.0, &mut tret, Task::Normal).unwrap();
    assert_eq!(status, SolveStatus::Success);
    assert_relative_eq!(v.y()[0], 2.0f64.cos(), max_relative = 1e-3);

    let stats = v.stats();
    assert!(stats.nje > 0, "Newton must have evaluated the Jacobian");
    assert!(stats.nsetups > 0);
    // with an analytic Jacobian the corrector settles in very few iterations
    let avg_nni = stats.nni as f64 / stats.nst as f64;
    assert!(
        avg_nni <= 2.5,
        "average corrector iterations per step was {}",
        avg_nni
    );
}

#[test]
fn interpolated_derivative_matches_the_flow() {
    let y0 = DVector::from_vec(vec![1.0]);
    let mut v: Vode<f64, StiffRelax, linear::Dense, nonlinear::Newton<f64>> = Vode::new(
        StiffRelax,
        linear::Dense::new(1),
        TolControl::new_ss(1e-8, 1e-10),
        Method::Bdf,
        0.0,
        &y0,
    )
    .unwrap();
    v.set_max_num_steps(20000);

    let mut tret = 0.0;
    v.solve(1.0, &mut tret, Task::Normal).unwrap();

    let stats = v.stats();
    let t_mid = stats.tcur - 0.5 * stats.hu;
    let mut dy = DVector::zeros(1);
    v.get_dky(t_mid, 1, &mut dy).unwrap();
    // on the slow manifold y ~ cos(t), y' ~ -sin(t)
    assert!(
        (dy[0] + t_mid.sin()).abs() < 1e-3,
        "interpolated derivative {} vs {}",
        dy[0],
        -t_mid.sin()
    );
}

#[test]
fn van_der_pol_relaxation_oscillation() {
    let y0 = DVector::from_vec(vec![2.0, 0.0]);
    let mut v: Vode<f64, VanDerPol, linear::Dense, nonlinear::Newton<f64>> = Vode::new(
        VanDerPol { mu: 1000.0 },
        linear::Dense::new(2),
        TolControl::new_sv(1e-4, DVector::from_vec(vec![1e-6, 1e-6])),
        Method::Bdf,
        0.0,
        &y0,
    )
    .unwrap();
    v.set_max_num_steps(100_000);

    let mut tret = 0.0;
    let status = v.solve(3000.0, &mut tret, Task::Normal).unwrap();
    assert_eq!(status, SolveStatus::Success);

    // the limit cycle keeps the position in a narrow band
    assert!(v.y()[0].abs() < 2.5, "y0 = {}", v.y()[0]);

    let stats = v.stats();
    assert!(
        stats.nst > 200 && stats.nst < 20000,
        "step count {} out of the expected band",
        stats.nst
    );
    assert!(
        stats.netf < 100,
        "error test failures {} out of the expected band",
        stats.netf
    );
    assert!(stats.qu >= 2, "BDF should run above order 1 on the cycle");
}
