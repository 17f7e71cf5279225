//! Interface between the corrector and the pluggable linear solver.
//!
//! Owns the user problem, the iteration matrix `M = I - gamma*J`, a saved
//! copy of the Jacobian for reuse across steps, and the `gamma` bookkeeping
//! that decides when cached data has drifted too far.

use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::{
    constants::{DGMAX, MSBJ},
    traits::{CallbackError, OdeProblem, VodeReal},
    Method,
};

/// Context the corrector hands to the linear setup describing the failure
/// that preceded it, used to decide whether the cached Jacobian is suspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConvFail {
    /// First attempt of this step, or the previous step failed only its
    /// error test.
    NoFailures,
    /// The previous corrector did not converge and the Jacobian data was
    /// stale.
    BadJ,
    /// The previous corrector did not converge with current Jacobian data.
    Other,
}

#[derive(Debug)]
pub(crate) struct LProblem<T, P, LS>
where
    T: VodeReal,
{
    pub problem: P,
    ls: LS,
    /// iteration matrix; holds the factorization after setup
    mat: DMatrix<T>,
    /// saved Jacobian df/dy from the last evaluation
    saved_j: DMatrix<T>,
    /// solve scratch
    x: DVector<T>,

    pub lmm: Method,
    pub gamma: T,
    pub gammap: T,
    pub gamrat: T,
    /// whether the saved Jacobian matches the current iterate
    pub jcur: bool,

    /// step number at the last Jacobian evaluation
    nstlj: usize,
    /// number of Jacobian evaluations
    pub nje: usize,
    /// number of linear setup calls
    pub nsetups: usize,
}

impl<T, P, LS> LProblem<T, P, LS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
{
    pub fn new(problem: P, ls: LS, lmm: Method, n: usize) -> Self {
        LProblem {
            problem,
            ls,
            mat: DMatrix::zeros(n, n),
            saved_j: DMatrix::zeros(n, n),
            x: DVector::zeros(n),
            lmm,
            gamma: T::one(),
            gammap: T::one(),
            gamrat: T::one(),
            jcur: false,
            nstlj: 0,
            nje: 0,
            nsetups: 0,
        }
    }

    pub fn re_init(&mut self) {
        self.gamma = T::one();
        self.gammap = T::one();
        self.gamrat = T::one();
        self.jcur = false;
        self.nstlj = 0;
        self.nje = 0;
        self.nsetups = 0;
    }

    /// Prepares the iteration matrix for subsequent solves.
    ///
    /// The saved Jacobian is reused unless this is the first step, `MSBJ`
    /// steps have passed since the last evaluation, the convfail hint blames
    /// the data while `gamma` is nearly unchanged, or the previous failure
    /// happened with current data. Reports through `jcur` whether Jacobian
    /// data is current afterwards, so the caller can avoid setup loops.
    pub fn setup(
        &mut self,
        t: T,
        nst: usize,
        convfail: ConvFail,
        ypred: &DVector<T>,
        fpred: &DVector<T>,
    ) -> Result<(), nonlinear::Error> {
        self.nsetups += 1;

        let jbad = nst == 0
            || nst >= self.nstlj + MSBJ
            || (convfail == ConvFail::BadJ && (self.gamrat - T::one()).abs() < T::from(DGMAX).unwrap())
            || convfail == ConvFail::Other;

        if jbad {
            trace!("lsetup: evaluating jacobian at nst={}", nst);
            self.nje += 1;
            self.nstlj = nst;
            self.jcur = true;
            self.saved_j.fill(T::zero());
            self.problem
                .jac(t, ypred, fpred, &mut self.saved_j)
                .map_err(|e| match e {
                    CallbackError::Recoverable => nonlinear::Error::SetupRecover,
                    CallbackError::Fatal => nonlinear::Error::SetupFail,
                })?;
        } else {
            self.jcur = false;
        }

        // M = I - gamma*J
        self.mat.copy_from(&self.saved_j);
        self.mat *= -self.gamma;
        for i in 0..self.mat.nrows() {
            self.mat[(i, i)] += T::one();
        }

        self.ls.setup(&mut self.mat).map_err(|e| {
            // a singular iteration matrix is retryable at a different gamma
            trace!("lsetup: factorization failed ({e})");
            nonlinear::Error::SetupRecover
        })
    }

    /// Solves `M x = b`, overwriting `b` with the correction. When the BDF
    /// iteration matrix was built at a stale `gamma`, the correction is
    /// scaled by `2/(1 + gamrat)` to compensate.
    pub fn solve(&mut self, b: &mut DVector<T>) -> Result<(), nonlinear::Error> {
        self.ls
            .solve(&self.mat, &mut self.x, b, T::zero())
            .map_err(|_| nonlinear::Error::SolveRecover)?;
        b.copy_from(&self.x);

        if self.lmm == Method::Bdf && self.gamrat != T::one() {
            *b *= T::two() / (T::one() + self.gamrat);
        }
        Ok(())
    }

    /// Per-sensitivity solve route; the same iteration matrix serves every
    /// sensitivity block.
    pub fn solve_sens(&mut self, b: &mut DVector<T>, _is: usize) -> Result<(), nonlinear::Error> {
        self.solve(b)
    }
}
