//! Problem-specification traits and the scalar-constants trait.

use nalgebra::{DMatrix, DVector, RealField, Scalar};
use num_traits::NumCast;

/// Failure reported by a user callback. `Recoverable` asks the integrator to
/// retry the step with adjusted inputs; `Fatal` aborts the integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackError {
    Recoverable,
    Fatal,
}

/// Right-hand side of the ODE system `y' = f(t, y)`.
pub trait Rhs<T: VodeReal> {
    fn rhs(&self, t: T, y: &DVector<T>, ydot: &mut DVector<T>) -> Result<(), CallbackError>;
}

/// System Jacobian `J = df/dy`, used by the Newton corrector to form the
/// iteration matrix `I - gamma*J`.
///
/// The default implementation approximates `J` column-wise with forward
/// difference quotients on [`Rhs::rhs`]; supply an analytic Jacobian for
/// stiff problems where setup cost matters.
pub trait Jac<T: VodeReal>: Rhs<T> {
    fn jac(
        &self,
        t: T,
        y: &DVector<T>,
        fy: &DVector<T>,
        j: &mut DMatrix<T>,
    ) -> Result<(), CallbackError> {
        let n = y.len();
        let srur = T::from(f64::EPSILON).unwrap().sqrt();
        let mut yj = y.clone_owned();
        let mut ftemp = DVector::<T>::zeros(n);

        for col in 0..n {
            let ysaved = yj[col];
            let inc = srur * ysaved.abs().max(T::one());
            yj[col] = ysaved + inc;
            self.rhs(t, &yj, &mut ftemp)?;
            yj[col] = ysaved;

            let inc_inv = inc.recip();
            for row in 0..n {
                j[(row, col)] = (ftemp[row] - fy[row]) * inc_inv;
            }
        }
        Ok(())
    }
}

/// Right-hand side of the quadrature equations `yQ' = f_Q(t, y)`.
///
/// Only called after quadrature integration is initialized; the default
/// rejects the call.
pub trait QuadRhs<T: VodeReal> {
    fn quad_rhs(
        &self,
        _t: T,
        _y: &DVector<T>,
        _qdot: &mut DVector<T>,
    ) -> Result<(), CallbackError> {
        Err(CallbackError::Fatal)
    }
}

/// Right-hand sides of the sensitivity systems
/// `s_i' = (df/dy) s_i + df/dp_i`.
///
/// Override `sens_rhs` for the batch (all-at-once) form or `sens_rhs1` for
/// the one-at-a-time form, matching the kind declared at `sens_init`; the
/// defaults reject the call. Neither is used with difference-quotient
/// sensitivities.
pub trait SensRhs<T: VodeReal> {
    /// Fills `ysdot[i]` for every sensitivity at once.
    fn sens_rhs(
        &self,
        _t: T,
        _y: &DVector<T>,
        _ydot: &DVector<T>,
        _ys: &[DVector<T>],
        _ysdot: &mut [DVector<T>],
    ) -> Result<(), CallbackError> {
        Err(CallbackError::Fatal)
    }

    /// Fills `ysdot` for the single sensitivity `is`.
    fn sens_rhs1(
        &self,
        _t: T,
        _y: &DVector<T>,
        _ydot: &DVector<T>,
        _is: usize,
        _ys: &DVector<T>,
        _ysdot: &mut DVector<T>,
    ) -> Result<(), CallbackError> {
        Err(CallbackError::Fatal)
    }
}

/// Access to the problem parameters perturbed by the difference-quotient
/// sensitivity right-hand side. Problems using analytic sensitivities can
/// leave the defaults in place; the DQ path requires real implementations so
/// that `rhs` observes the perturbed parameter.
pub trait SensParams<T: VodeReal> {
    fn param(&self, _which: usize) -> T {
        T::zero()
    }

    fn set_param(&mut self, _which: usize, _value: T) {}
}

/// Composite problem trait the integrator is generic over.
pub trait OdeProblem<T: VodeReal>:
    Rhs<T> + Jac<T> + QuadRhs<T> + SensRhs<T> + SensParams<T>
{
}

impl<Q, T: VodeReal> OdeProblem<T> for Q where
    Q: Rhs<T> + Jac<T> + QuadRhs<T> + SensRhs<T> + SensParams<T>
{
}

/// Scalar type the integrator operates on.
pub trait VodeReal: Scalar + RealField + NumCast + Copy + std::fmt::LowerExp {
    fn half() -> Self;
    fn quarter() -> Self;
    fn two() -> Self;
    fn four() -> Self;
    fn ten() -> Self;
    fn twelve() -> Self;
    fn hundred() -> Self;
    fn pt1() -> Self;
    fn pt9() -> Self;
    fn pt001() -> Self;
    fn pt0001() -> Self;
    fn epsilon() -> Self;
}

impl VodeReal for f64 {
    fn half() -> Self {
        0.5
    }
    fn quarter() -> Self {
        0.25
    }
    fn two() -> Self {
        2.0
    }
    fn four() -> Self {
        4.0
    }
    fn ten() -> Self {
        10.0
    }
    fn twelve() -> Self {
        12.0
    }
    fn hundred() -> Self {
        100.0
    }
    fn pt1() -> Self {
        0.1
    }
    fn pt9() -> Self {
        0.9
    }
    fn pt001() -> Self {
        0.001
    }
    fn pt0001() -> Self {
        0.0001
    }
    fn epsilon() -> Self {
        f64::EPSILON
    }
}
