//! Interfaces between a nonlinear solver and the problem it iterates on.

use nalgebra::{DVector, RealField};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NLSolverType {
    /// Root-finding iteration that drives the linear solver hooks.
    RootFind,
    /// Derivative-free fixed-point iteration; never calls setup/solve.
    FixedPoint,
}

/// A nonlinear system `res(ycor) = 0` together with the hooks the solver
/// needs: residual evaluation, linear setup/solve, and the convergence test.
///
/// The problem owns all state the hooks share (current iterate, cached
/// Jacobian data, convergence-rate estimate); the solver only owns its
/// iteration bookkeeping.
pub trait NLProblem<T>
where
    T: RealField + Copy,
{
    /// Evaluates the nonlinear residual at the correction `ycor`, storing it
    /// in `res`.
    fn sys(&mut self, ycor: &DVector<T>, res: &mut DVector<T>) -> Result<(), Error>;

    /// Prepares the linear solver for subsequent [`NLProblem::solve`] calls;
    /// `jbad` signals that cached Jacobian data is suspected stale. Returns
    /// whether Jacobian data is current after the call.
    fn setup(&mut self, ycor: &DVector<T>, res: &DVector<T>, jbad: bool) -> Result<bool, Error>;

    /// Solves the linearized correction equation; `delta` holds the negated
    /// residual on entry and the update on exit.
    fn solve(&mut self, ycor: &DVector<T>, delta: &mut DVector<T>) -> Result<(), Error>;

    /// Convergence test over the latest update `del`. Returns `Ok(true)` on
    /// convergence, `Ok(false)` to continue iterating, and
    /// `Err(Error::ConvergenceRecover)` on divergence.
    fn ctest<NLS>(
        &mut self,
        solver: &NLS,
        ycor: &DVector<T>,
        del: &DVector<T>,
        tol: T,
        ewt: &DVector<T>,
    ) -> Result<bool, Error>
    where
        NLS: NLSolver<T>;
}

/// Iteration strategy for solving an [`NLProblem`].
pub trait NLSolver<T>
where
    T: RealField + Copy,
{
    /// Creates a solver for systems of dimension `size`, allowing at most
    /// `maxiters` iterations per solve attempt.
    fn new(size: usize, maxiters: usize) -> Self;

    fn get_type(&self) -> NLSolverType;

    /// Iterates from the initial correction `y0` until the problem's
    /// convergence test passes, leaving the converged correction in `ycor`.
    ///
    /// `w` carries the error weights the convergence test may use and `tol`
    /// its tolerance. `call_lsetup` requests a linear setup before the first
    /// iteration (ignored by solvers that never set up).
    fn solve<NLP>(
        &mut self,
        problem: &mut NLP,
        y0: &DVector<T>,
        ycor: &mut DVector<T>,
        w: &DVector<T>,
        tol: T,
        call_lsetup: bool,
    ) -> Result<(), Error>
    where
        NLP: NLProblem<T>;

    /// Iteration count within the current solve attempt.
    fn get_cur_iter(&self) -> usize;

    /// Total iterations across all solve attempts.
    fn get_num_iters(&self) -> usize;

    /// Total convergence failures across all solve attempts.
    fn get_num_conv_fails(&self) -> usize;
}
