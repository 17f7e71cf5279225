//! Quadrature integration alongside exponential decay.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use vode::{
    CallbackError, Error, ErrorControl, Jac, Method, QuadRhs, Rhs, SensParams, SensRhs, Task,
    TolControl, Vode,
};

/// y' = -y with the quadrature yQ' = y, so yQ(t) = 1 - exp(-t).
#[derive(Debug)]
struct DecayWithArea {
    /// when set, the quadrature integrand is wildly oscillatory instead
    wild: bool,
}

impl Rhs<f64> for DecayWithArea {
    fn rhs(&self, _t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        ydot[0] = -y[0];
        Ok(())
    }
}

impl Jac<f64> for DecayWithArea {
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

impl QuadRhs<f64> for DecayWithArea {
    fn quad_rhs(
        &self,
        t: f64,
        y: &DVector<f64>,
        qdot: &mut DVector<f64>,
    ) -> Result<(), CallbackError> {
        qdot[0] = if self.wild {
            1.0e6 * (1.0e3 * t).cos()
        } else {
            y[0]
        };
        Ok(())
    }
}

impl SensRhs<f64> for DecayWithArea {}
impl SensParams<f64> for DecayWithArea {}

type Solver = Vode<f64, DecayWithArea, linear::Dense, nonlinear::Newton<f64>>;

fn solver(wild: bool) -> Solver {
    let y0 = DVector::from_vec(vec![1.0]);
    let mut v: Solver = Vode::new(
        DecayWithArea { wild },
        linear::Dense::new(1),
        TolControl::new_ss(1e-8, 1e-10),
        Method::Bdf,
        0.0,
        &y0,
    )
    .unwrap();
    v.set_max_num_steps(20000);
    v.quad_init(&DVector::zeros(1)).unwrap();
    v
}

#[test]
fn quadrature_accumulates_the_integral() {
    let mut v = solver(false);
    v.set_quad_err_con(
        ErrorControl::Full,
        Some(TolControl::new_ss(1e-8, 1e-10)),
    )
    .unwrap();

    let mut tret = 0.0;
    v.solve(2.0, &mut tret, Task::Normal).unwrap();

    let exact = 1.0 - (-2.0f64).exp();
    assert_relative_eq!(v.yq().unwrap()[0], exact, max_relative = 1e-5);

    let stats = v.stats();
    let quad = stats.quad.expect("quadrature stats present");
    assert!(quad.nfqe > 0);
}

#[test]
fn partial_error_control_ignores_quadrature_error() {
    // a deliberately unresolvable integrand must not break the step control
    let mut v = solver(true);

    let mut tret = 0.0;
    v.solve(1.0, &mut tret, Task::Normal).unwrap();

    let stats = v.stats();
    let quad = stats.quad.expect("quadrature stats present");
    assert_eq!(
        quad.netfq, 0,
        "quadrature error must stay out of the error test"
    );
    // the states remain accurate regardless
    assert_relative_eq!(v.y()[0], (-1.0f64).exp(), max_relative = 1e-6);
}

#[test]
fn full_error_control_requires_tolerances() {
    let mut v = solver(false);
    assert!(matches!(
        v.set_quad_err_con(ErrorControl::Full, None),
        Err(Error::IllegalInput { .. })
    ));
}

#[test]
fn quadrature_dense_output() {
    let mut v = solver(false);
    let mut tret = 0.0;
    v.solve(2.0, &mut tret, Task::Normal).unwrap();

    let stats = v.stats();
    let t_mid = stats.tcur - 0.5 * stats.hu;
    let mut yq = DVector::zeros(1);
    v.get_quad_dky(t_mid, 0, &mut yq).unwrap();
    assert_relative_eq!(yq[0], 1.0 - (-t_mid).exp(), max_relative = 1e-4);

    // the quadrature derivative reproduces the integrand
    let mut dq = DVector::zeros(1);
    v.get_quad_dky(t_mid, 1, &mut dq).unwrap();
    assert_relative_eq!(dq[0], (-t_mid).exp(), max_relative = 1e-3);
}
