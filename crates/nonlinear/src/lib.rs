//! Nonlinear solver layer for the per-step corrector equation.
//!
//! The integrator formulates each step's corrector as an [`NLProblem`] and
//! hands it to an [`NLSolver`]. Two solvers are provided: a modified
//! [`Newton`] iteration driving the linear solver hooks, and a derivative
//! free [`FixedPoint`] iteration for non-stiff functional correction.

mod fixed_point;
mod newton;
pub mod norm_wrms;
mod traits;

pub use fixed_point::FixedPoint;
pub use newton::Newton;
pub use traits::{NLProblem, NLSolver, NLSolverType};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The iteration failed to converge within the allowed iterations, or
    /// diverged. The step may be retried with a reduced step size.
    #[error("corrector failed to converge, recovery possible")]
    ConvergenceRecover,

    /// The problem's system function raised a recoverable error.
    #[error("corrector system function raised a recoverable error")]
    SysRecover,

    /// The problem's system function failed unrecoverably.
    #[error("corrector system function failed")]
    SysFail,

    /// The linear setup hook raised a recoverable error.
    #[error("linear solver setup raised a recoverable error")]
    SetupRecover,

    /// The linear setup hook failed unrecoverably.
    #[error("linear solver setup failed")]
    SetupFail,

    /// The linear solve hook raised a recoverable error.
    #[error("linear solver solve raised a recoverable error")]
    SolveRecover,

    /// The linear solve hook failed unrecoverably.
    #[error("linear solver solve failed")]
    SolveFail,
}

impl Error {
    /// Whether the integrator may retry the step after this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConvergenceRecover
                | Error::SysRecover
                | Error::SetupRecover
                | Error::SolveRecover
        )
    }
}
