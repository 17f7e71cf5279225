//! Top-level driver: iterate internal steps until the target, with
//! interpolated output, tstop handling and the per-call work caps.

use log::warn;

use crate::{
    dky_eval,
    traits::{CallbackError, OdeProblem, VodeReal},
    Error, ErrorControl, SolveStatus, Task, Vode,
};

impl<T, P, LS, NLS> Vode<T, P, LS, NLS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
    NLS: nonlinear::NLSolver<T>,
{
    /// Integrates toward `tout`.
    ///
    /// In [`Task::Normal`] mode internal steps are taken until `tout` is
    /// passed, then the solution is interpolated to `tout`; in
    /// [`Task::OneStep`] a single internal step is taken. The time actually
    /// reached is written to `tret` and the solution is available from
    /// [`Vode::y`] (with quadrature and sensitivity counterparts).
    pub fn solve(&mut self, tout: T, tret: &mut T, itask: Task) -> Result<SolveStatus, Error> {
        if self.nst == 0 {
            self.first_call_setup(tout)?;
        } else if let Some(status) = self.stop_test1(tout, tret, itask)? {
            return Ok(status);
        }

        let mut nstloc = 0usize;
        loop {
            // refresh the error weights from the current solution
            if self.nst > 0 && !self.reset_weights() {
                let t = self.tn;
                self.return_solution_at(t);
                *tret = self.tn;
                return Err(Error::BadErrorWeight {
                    t: Self::f64_of(self.tn),
                });
            }

            if nstloc >= self.mxstep {
                let t = self.tn;
                self.return_solution_at(t);
                *tret = self.tn;
                self.tretlast = self.tn;
                return Err(Error::TooMuchWork {
                    t: Self::f64_of(self.tn),
                    mxstep: self.mxstep,
                });
            }

            // requested accuracy vs. machine precision at the current size
            let nrm = self.wrms_norm(&self.zn[0]);
            self.tolsf = self.uround * nrm;
            if self.tolsf > T::one() {
                self.tolsf *= T::ten();
                let t = self.tn;
                self.return_solution_at(t);
                *tret = self.tn;
                self.tretlast = self.tn;
                return Err(Error::TooMuchAccuracy {
                    t: Self::f64_of(self.tn),
                });
            }

            // rate-limited warning when h underflows the time resolution
            if self.tn + self.h == self.tn {
                self.nhnil += 1;
                if self.mxhnil >= 0 && self.nhnil <= self.mxhnil {
                    warn!(
                        "internal t = {:.5e} and h = {:.5e} are such that t + h == t on the next step",
                        self.tn, self.h
                    );
                    if self.nhnil == self.mxhnil {
                        warn!("the above warning will not be issued again");
                    }
                }
            }

            match self.step() {
                Ok(()) => {}
                Err(e) => {
                    // leave the last successful state behind for post-mortem
                    let t = self.tn;
                    self.return_solution_at(t);
                    *tret = self.tn;
                    self.tretlast = self.tn;
                    return Err(e);
                }
            }
            nstloc += 1;

            if let Some(status) = self.stop_test2(tout, tret, itask)? {
                return Ok(status);
            }
        }
    }

    /// First-call work: weights, the derivative row, the trial step size,
    /// and direction/tstop validation.
    fn first_call_setup(&mut self, tout: T) -> Result<(), Error> {
        if !self.reset_weights() {
            return Err(Error::IllegalInput {
                msg: "some initial ewt component is nonpositive".into(),
            });
        }

        let tdist = (tout - self.tn).abs();
        if tdist == T::zero() {
            return Err(Error::TooClose);
        }
        let troundoff = T::two() * self.uround * (self.tn.abs() + tout.abs());
        if tdist < troundoff {
            return Err(Error::TooClose);
        }

        // load the first-derivative history rows (scaled by h below)
        {
            let (zn0, zn1) = {
                let (a, b) = self.zn.split_at_mut(1);
                (&a[0], &mut b[0])
            };
            self.nlp.lp.problem.rhs(self.tn, zn0, zn1).map_err(|e| match e {
                CallbackError::Recoverable => Error::RepeatedRhsFuncErr {
                    t: Self::f64_of(self.tn),
                },
                CallbackError::Fatal => Error::RhsFuncFailure {
                    t: Self::f64_of(self.tn),
                },
            })?;
        }
        self.nlp.nfe += 1;

        if self.quad.is_some() {
            let quad = self.quad.as_mut().expect("quadrature substate present");
            self.nlp
                .lp
                .problem
                .quad_rhs(self.tn, &self.zn[0], &mut quad.znq[1])
                .map_err(|_| Error::QuadRhsFuncFailure {
                    t: Self::f64_of(self.tn),
                })?;
            quad.nfqe += 1;
        }

        if self.sens.is_some() {
            {
                let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
                sw.ydot.copy_from(&self.zn[1]);
                sw.state_ewt.copy_from(&self.ewt);
                let sens = self.sens.as_ref().expect("sensitivity substate");
                for is in 0..sens.ns {
                    sw.ys[is].copy_from(&sens.zns[0][is]);
                }
            }
            self.nlp.y.copy_from(&self.zn[0]);
            self.nlp
                .eval_sens_rhs(false, None)
                .map_err(|_| Error::SensRhsFuncFailure {
                    t: Self::f64_of(self.tn),
                })?;
            let sens = self.sens.as_mut().expect("sensitivity substate");
            let sw = self.nlp.sens.as_ref().expect("sensitivity work present");
            for is in 0..sens.ns {
                sens.zns[1][is].copy_from(&sw.fs[is]);
            }
        }

        // trial step size
        let mut h = self.hin;
        if h != T::zero() && (tout - self.tn) * h < T::zero() {
            return Err(Error::IllegalInput {
                msg: "h0 does not point toward tout".into(),
            });
        }
        if h == T::zero() {
            let ypnorm = self.wrms_norm(&self.zn[1]);
            h = T::half() / ypnorm.max(tdist.recip());
            if tout < self.tn {
                h = -h;
            }
        }

        let rh = h.abs() * self.hmax_inv;
        if rh > T::one() {
            h /= rh;
        }
        if h.abs() < self.hmin {
            h = h.signum() * self.hmin;
        }

        if let Some(tstop) = self.tstop {
            if (tstop - self.tn) * h <= T::zero() {
                return Err(Error::BadTstop {
                    tstop: Self::f64_of(tstop),
                    t: Self::f64_of(self.tn),
                });
            }
            if (self.tn + h - tstop) * h > T::zero() {
                h = (tstop - self.tn) * (T::one() - T::four() * self.uround);
            }
        }

        self.h = h;
        self.h0u = h;
        self.hscale = h;
        self.hprime = h;

        self.zn[1] *= h;
        if let Some(quad) = self.quad.as_mut() {
            quad.znq[1] *= h;
        }
        if let Some(sens) = self.sens.as_mut() {
            for zs in sens.zns[1].iter_mut() {
                *zs *= h;
            }
        }

        Ok(())
    }

    /// Reloads every error-weight vector; false when a weight degenerates.
    fn reset_weights(&mut self) -> bool {
        if !self.tol.ewt_set(&self.zn[0], &mut self.ewt) {
            return false;
        }
        if let Some(quad) = self.quad.as_mut() {
            if quad.errconq == ErrorControl::Full {
                let tol = quad.tol.as_ref().expect("quadrature tolerances present");
                if !tol.ewt_set(&quad.znq[0], &mut quad.ewtq) {
                    return false;
                }
            }
        }
        self.sens_ewt_set()
    }

    /// Stop conditions checked before taking any step.
    fn stop_test1(
        &mut self,
        tout: T,
        tret: &mut T,
        itask: Task,
    ) -> Result<Option<SolveStatus>, Error> {
        if let Some(tstop) = self.tstop {
            if (self.tn - tstop) * self.h > T::zero() {
                return Err(Error::BadTstop {
                    tstop: Self::f64_of(tstop),
                    t: Self::f64_of(self.tn),
                });
            }
        }

        match itask {
            Task::Normal => {
                if (self.tn - tout) * self.h >= T::zero() {
                    self.return_solution_at(tout);
                    self.tretlast = tout;
                    *tret = tout;
                    return Ok(Some(SolveStatus::Success));
                }
                Ok(self.tstop_check(tret))
            }
            Task::OneStep => {
                if (self.tn - self.tretlast) * self.h > T::zero() {
                    let t = self.tn;
                    self.return_solution_at(t);
                    self.tretlast = self.tn;
                    *tret = self.tn;
                    return Ok(Some(SolveStatus::Success));
                }
                Ok(self.tstop_check(tret))
            }
        }
    }

    /// Stop conditions checked after a successful step.
    fn stop_test2(
        &mut self,
        tout: T,
        tret: &mut T,
        itask: Task,
    ) -> Result<Option<SolveStatus>, Error> {
        match itask {
            Task::Normal => {
                if (self.tn - tout) * self.h >= T::zero() {
                    self.return_solution_at(tout);
                    self.tretlast = tout;
                    *tret = tout;
                    return Ok(Some(SolveStatus::Success));
                }
                Ok(self.tstop_check(tret))
            }
            Task::OneStep => {
                if let Some(status) = self.tstop_check(tret) {
                    return Ok(Some(status));
                }
                let t = self.tn;
                self.return_solution_at(t);
                self.tretlast = self.tn;
                *tret = self.tn;
                Ok(Some(SolveStatus::Success))
            }
        }
    }

    /// Detects arrival at tstop (within roundoff fuzz) and otherwise clips
    /// the next step so it cannot pass it.
    fn tstop_check(&mut self, tret: &mut T) -> Option<SolveStatus> {
        let tstop = self.tstop?;
        let troundoff = T::hundred() * self.uround * (self.tn.abs() + self.h.abs());

        if (self.tn - tstop).abs() <= troundoff {
            self.return_solution_at(tstop);
            self.tretlast = tstop;
            *tret = tstop;
            self.tstop = None;
            return Some(SolveStatus::TStop);
        }

        if (self.tn + self.hprime - tstop) * self.h > T::zero() {
            self.hprime = (tstop - self.tn) * (T::one() - T::four() * self.uround);
            self.eta = self.hprime / self.h;
        }
        None
    }

    /// Interpolates states, quadratures and sensitivities to `t` for a
    /// driver return. Inside the step interval by construction.
    fn return_solution_at(&mut self, t: T) {
        if self.nst == 0 {
            self.nlp.y.copy_from(&self.zn[0]);
            return;
        }

        dky_eval(&self.zn, self.qu, 0, t, self.tn, self.h, &mut self.tempv);
        self.nlp.y.copy_from(&self.tempv);

        let s = (t - self.tn) / self.h;
        if let Some(quad) = self.quad.as_mut() {
            quad.yq.copy_from(&quad.znq[self.qu]);
            for j in (0..self.qu).rev() {
                quad.yq *= s;
                quad.yq += &quad.znq[j];
            }
        }
        if let Some(sens) = self.sens.as_ref() {
            let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
            for is in 0..sens.ns {
                sw.ys[is].copy_from(&sens.zns[self.qu][is]);
                for j in (0..self.qu).rev() {
                    sw.ys[is] *= s;
                    sw.ys[is] += &sens.zns[j][is];
                }
            }
        }
    }
}
