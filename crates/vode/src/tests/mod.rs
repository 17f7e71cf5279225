//! Unit tests for the step machinery against hand-computed values.

mod coeffs;
mod dky;
mod history;

use nalgebra::{DMatrix, DVector};

use crate::{
    CallbackError, Jac, QuadRhs, Rhs, SensParams, SensRhs, TolControl, Vode,
};

/// `y' = -y`, the workhorse test problem.
#[derive(Debug, Clone)]
pub(crate) struct ExpDecay;

impl Rhs<f64> for ExpDecay {
    fn rhs(&self, _t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        ydot[0] = -y[0];
        Ok(())
    }
}

impl Jac<f64> for ExpDecay {
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

impl QuadRhs<f64> for ExpDecay {}
impl SensRhs<f64> for ExpDecay {}
impl SensParams<f64> for ExpDecay {}

pub(crate) type TestSolver =
    Vode<f64, ExpDecay, linear::Dense, nonlinear::Newton<f64>>;

pub(crate) fn bdf_solver() -> TestSolver {
    let y0 = DVector::from_vec(vec![1.0]);
    Vode::new(
        ExpDecay,
        linear::Dense::new(1),
        TolControl::new_ss(1e-6, 1e-9),
        crate::Method::Bdf,
        0.0,
        &y0,
    )
    .unwrap()
}

pub(crate) fn adams_solver() -> TestSolver {
    let y0 = DVector::from_vec(vec![1.0]);
    Vode::new(
        ExpDecay,
        linear::Dense::new(1),
        TolControl::new_ss(1e-6, 1e-9),
        crate::Method::Adams,
        0.0,
        &y0,
    )
    .unwrap()
}
