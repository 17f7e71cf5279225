//! Modified Newton iteration over an [`NLProblem`].

use log::trace;
use nalgebra::{DVector, RealField};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{Error, NLProblem, NLSolver, NLSolverType};

/// Newton iteration with deferred Jacobian refresh.
///
/// On a recoverable convergence failure with stale Jacobian data the solve
/// is reattempted once from the predictor with a forced linear setup
/// (`jbad = true`); a failure with current data is reported to the caller.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct Newton<T> {
    /// Newton update vector
    delta: DVector<T>,
    /// Jacobian status, current = `true` / stale = `false`
    jcur: bool,
    /// current number of iterations in a solve attempt
    curiter: usize,
    /// maximum number of iterations in a solve attempt
    maxiters: usize,
    /// total number of iterations across all solves
    niters: usize,
    /// total number of convergence failures across all solves
    nconvfails: usize,
}

impl<T> NLSolver<T> for Newton<T>
where
    T: RealField + Copy,
{
    fn new(size: usize, maxiters: usize) -> Self {
        Newton {
            delta: DVector::zeros(size),
            jcur: false,
            curiter: 0,
            maxiters,
            niters: 0,
            nconvfails: 0,
        }
    }

    fn get_type(&self) -> NLSolverType {
        NLSolverType::RootFind
    }

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
        NLP: NLProblem<T>,
    {
        let mut jbad = false;
        let mut call_lsetup = call_lsetup;

        // Outer loop: one pass per linear-setup attempt.
        loop {
            // residual at the initial correction
            problem.sys(y0, &mut self.delta)?;

            if call_lsetup {
                self.jcur = problem.setup(y0, &self.delta, jbad)?;
            }

            self.curiter = 0;
            ycor.copy_from(y0);

            // Newton iteration proper.
            let result = loop {
                self.niters += 1;

                // negated residual is the linear system right-hand side
                self.delta.neg_mut();

                if let Err(e) = problem.solve(ycor, &mut self.delta) {
                    break Err(e);
                }
                *ycor += &self.delta;

                match problem.ctest(self, ycor, &self.delta, tol, w) {
                    Err(e) => break Err(e),
                    Ok(true) => {
                        self.jcur = false;
                        break Ok(());
                    }
                    Ok(false) => {
                        self.curiter += 1;
                        if self.curiter >= self.maxiters {
                            break Err(Error::ConvergenceRecover);
                        }
                        // next residual, at the updated iterate
                        if let Err(e) = problem.sys(ycor, &mut self.delta) {
                            break Err(e);
                        }
                    }
                }
            };

            match result {
                Ok(()) => return Ok(()),
                // Retry once with a fresh Jacobian if the failed attempt ran
                // on stale data.
                Err(Error::ConvergenceRecover) if !self.jcur => {
                    trace!("newton: reattempting solve with forced setup");
                    self.nconvfails += 1;
                    call_lsetup = true;
                    jbad = true;
                    continue;
                }
                Err(e) => {
                    self.nconvfails += 1;
                    return Err(e);
                }
            }
        }
    }

    fn get_cur_iter(&self) -> usize {
        self.curiter
    }

    fn get_num_iters(&self) -> usize {
        self.niters
    }

    fn get_num_conv_fails(&self) -> usize {
        self.nconvfails
    }
}
