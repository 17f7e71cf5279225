//! Linear solver interface for the integrator's Newton corrections.
//!
//! The integrator drives a solver through the [`LSolver`] capability pair
//! (`setup` factors the iteration matrix, `solve` applies the factorization).
//! A direct dense solver is provided as the reference implementation;
//! iterative and banded variants plug in through the same trait.

mod dense;

pub use dense::Dense;

use nalgebra::{DMatrix, DVector, RealField};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A zero pivot was encountered during LU factorization. The column is
    /// numbered from one. A changed step size changes the iteration matrix,
    /// so the caller may retry.
    #[error("singular iteration matrix (zero pivot in column {col})")]
    SingularMatrix { col: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LSolverType {
    Direct,
    Iterative,
    MatrixIterative,
}

/// Capability interface every pluggable linear solver implements.
///
/// `setup` may be called frequently (full Newton) or rarely (modified
/// Newton); `solve` must be callable any number of times after a successful
/// `setup`. Solver memory is released by dropping the value.
pub trait LSolver<T: RealField + Copy> {
    fn get_type(&self) -> LSolverType;

    /// Prepares the solver for subsequent calls to [`LSolver::solve`] based
    /// on the iteration matrix `mat_a`. Direct solvers factor `mat_a` in
    /// place.
    fn setup(&mut self, mat_a: &mut DMatrix<T>) -> Result<(), Error>;

    /// Solves `A x = b`.
    ///
    /// Direct solvers ignore `tol`; iterative solvers treat it as the
    /// weighted residual tolerance for the inner iteration.
    fn solve(
        &self,
        mat_a: &DMatrix<T>,
        x: &mut DVector<T>,
        b: &DVector<T>,
        tol: T,
    ) -> Result<(), Error>;

    /// Inner iterations performed by the last `solve` call.
    fn num_iters(&self) -> usize {
        0
    }

    /// Final residual norm of the last `solve` call.
    fn res_norm(&self) -> T {
        T::zero()
    }
}
