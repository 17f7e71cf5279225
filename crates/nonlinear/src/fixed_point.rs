//! Fixed-point (functional) iteration over an [`NLProblem`].

use nalgebra::{DVector, RealField};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{Error, NLProblem, NLSolver, NLSolverType};

/// Derivative-free iteration `ycor <- ycor - res(ycor)`.
///
/// Suited to non-stiff correctors whose residual is a contraction; the
/// linear setup/solve hooks are never called.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct FixedPoint<T> {
    delta: DVector<T>,
    curiter: usize,
    maxiters: usize,
    niters: usize,
    nconvfails: usize,
}

impl<T> NLSolver<T> for FixedPoint<T>
where
    T: RealField + Copy,
{
    fn new(size: usize, maxiters: usize) -> Self {
        FixedPoint {
            delta: DVector::zeros(size),
            curiter: 0,
            maxiters,
            niters: 0,
            nconvfails: 0,
        }
    }

    fn get_type(&self) -> NLSolverType {
        NLSolverType::FixedPoint
    }

    fn solve<NLP>(
        &mut self,
        problem: &mut NLP,
        y0: &DVector<T>,
        ycor: &mut DVector<T>,
        w: &DVector<T>,
        tol: T,
        _call_lsetup: bool,
    ) -> Result<(), Error>
    where
        NLP: NLProblem<T>,
    {
        ycor.copy_from(y0);
        self.curiter = 0;

        loop {
            self.niters += 1;

            problem.sys(ycor, &mut self.delta)?;
            self.delta.neg_mut();
            *ycor += &self.delta;

            match problem.ctest(self, ycor, &self.delta, tol, w) {
                Err(e) => {
                    self.nconvfails += 1;
                    return Err(e);
                }
                Ok(true) => return Ok(()),
                Ok(false) => {
                    self.curiter += 1;
                    if self.curiter >= self.maxiters {
                        self.nconvfails += 1;
                        return Err(Error::ConvergenceRecover);
                    }
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

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    use crate::norm_wrms::NormWRMS;

    use super::*;

    /// Contraction with fixed point at the origin shifted by c:
    /// g(y) = 0.1*y + c, expressed as res(y) = y - g(y).
    #[derive(Debug)]
    struct Contraction {
        c: DVector<f64>,
    }

    impl NLProblem<f64> for Contraction {
        fn sys(&mut self, ycor: &DVector<f64>, res: &mut DVector<f64>) -> Result<(), Error> {
            res.copy_from(ycor);
            *res *= 0.9;
            *res -= &self.c;
            Ok(())
        }

        fn setup(
            &mut self,
            _ycor: &DVector<f64>,
            _res: &DVector<f64>,
            _jbad: bool,
        ) -> Result<bool, Error> {
            unreachable!("fixed-point iteration never sets up")
        }

        fn solve(&mut self, _ycor: &DVector<f64>, _delta: &mut DVector<f64>) -> Result<(), Error> {
            unreachable!("fixed-point iteration never solves")
        }

        fn ctest<NLS>(
            &mut self,
            _solver: &NLS,
            _ycor: &DVector<f64>,
            del: &DVector<f64>,
            tol: f64,
            ewt: &DVector<f64>,
        ) -> Result<bool, Error>
        where
            NLS: NLSolver<f64>,
        {
            Ok(del.norm_wrms(ewt) <= tol)
        }
    }

    #[test]
    fn converges_to_fixed_point() {
        // res(y) = 0.9*y - c has root y = c/0.9
        let mut p = Contraction {
            c: dvector![0.9, 1.8],
        };
        let y0 = dvector![0.0, 0.0];
        let mut y = DVector::zeros(2);
        let w = dvector![1.0, 1.0];

        let mut fp: FixedPoint<f64> = FixedPoint::new(2, 200);
        fp.solve(&mut p, &y0, &mut y, &w, 1e-12, false)
            .expect("contraction should converge");

        assert_relative_eq!(y, dvector![1.0, 2.0], max_relative = 1e-9);
    }

    #[test]
    fn iteration_cap_is_a_recoverable_failure() {
        let mut p = Contraction {
            c: dvector![1.0, 1.0],
        };
        let y0 = dvector![0.0, 0.0];
        let mut y = DVector::zeros(2);
        let w = dvector![1.0, 1.0];

        let mut fp: FixedPoint<f64> = FixedPoint::new(2, 2);
        let err = fp.solve(&mut p, &y0, &mut y, &w, 1e-15, false).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(fp.get_num_conv_fails(), 1);
    }
}
