//! One internal step: predict, correct, test, and pick what comes next.
//!
//! The attempt loop couples the coefficient engine, the predictor, the
//! nonlinear corrector and the local error test. Recoverable failures
//! restore the history exactly, reduce the step through the failure ladder
//! and re-enter the loop; unrecoverable ones surface as [`Error`] values
//! with the state left consistent for post-mortem interpolation.

use log::trace;
use nalgebra::DVector;
use nonlinear::{norm_wrms::NormWRMS, NLSolver, NLSolverType};

use crate::{
    constants::*,
    ls::ConvFail,
    nls::CorrectorMode,
    sens::SensMethod,
    traits::{CallbackError, OdeProblem, VodeReal},
    Error, ErrorControl, Vode,
};

/// Recoverable failure classes funneled into the common retry path.
enum Recoverable<T> {
    /// corrector did not converge (or linear setup/solve asked for a retry)
    Conv,
    /// a right-hand side reported a recoverable error
    Rhs,
    /// inequality constraints violated; eta already chosen
    Constraint(T),
}

impl<T, P, LS, NLS> Vode<T, P, LS, NLS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
    NLS: NLSolver<T>,
{
    /// Takes one internal step, retrying as the failure handler allows.
    pub(crate) fn step(&mut self) -> Result<(), Error> {
        let saved_t = self.tn;
        let mut ncf = 0usize;
        let mut nef = 0usize;
        let mut force_setup = false;
        let mut dsm;

        if self.nst > 0 && self.hprime != self.h {
            self.adjust_params();
        }

        self.nlp.convfail = ConvFail::NoFailures;

        loop {
            self.predict();
            self.set_coefficients();
            self.load_predictions();

            // --- state corrector (stacked with sensitivities when
            // SIMULTANEOUS) ---
            let corr = self.corrector_state(force_setup);
            if let Err(e) = corr {
                let kind = self.classify_nl_failure(e, false)?;
                self.handle_recoverable(kind, saved_t, &mut ncf, false)?;
                force_setup = true;
                continue;
            }

            // --- inequality constraints ---
            if self.constraints.is_some() {
                match self.check_constraints()? {
                    None => {}
                    Some(eta) => {
                        self.handle_recoverable(
                            Recoverable::Constraint(eta),
                            saved_t,
                            &mut ncf,
                            false,
                        )?;
                        force_setup = true;
                        continue;
                    }
                }
            }

            // --- local error test on the states (and simultaneous
            // sensitivities under full error control) ---
            dsm = self.acnrm * self.tq[2];
            if dsm > T::one() {
                self.error_test_fail(dsm, saved_t, &mut nef)?;
                force_setup = true;
                continue;
            }

            // --- quadrature advance ---
            if self.quad.is_some() {
                match self.quad_correct() {
                    Err(CallbackError::Fatal) => {
                        self.restore(saved_t);
                        return Err(Error::QuadRhsFuncFailure {
                            t: Self::f64_of(self.tn),
                        });
                    }
                    Err(CallbackError::Recoverable) => {
                        self.handle_recoverable(Recoverable::Rhs, saved_t, &mut ncf, false)
                            .map_err(|_| Error::QuadRhsFuncFailure {
                                t: Self::f64_of(saved_t),
                            })?;
                        force_setup = true;
                        continue;
                    }
                    Ok(()) => {}
                }

                let quad = self.quad.as_ref().expect("quadrature substate present");
                if quad.errconq == ErrorControl::Full {
                    let acnrmq = quad.acorq.norm_wrms(&quad.ewtq);
                    let combined = self.acnrm.max(acnrmq);
                    dsm = combined * self.tq[2];
                    if dsm > T::one() {
                        self.quad
                            .as_mut()
                            .expect("quadrature substate present")
                            .netfq += 1;
                        self.error_test_fail(dsm, saved_t, &mut nef)?;
                        force_setup = true;
                        continue;
                    }
                }
            }

            // --- staggered sensitivity correctors ---
            let staggered = matches!(
                self.sens.as_ref().map(|s| s.ism),
                Some(SensMethod::Staggered) | Some(SensMethod::Staggered1)
            );
            if staggered {
                if let Err(e) = self.corrector_sens_staggered() {
                    let kind = self.classify_nl_failure(e, true)?;
                    self.handle_recoverable(kind, saved_t, &mut ncf, true)?;
                    force_setup = true;
                    continue;
                }

                let errcons = self.sens.as_ref().expect("sensitivity substate").errcons;
                if errcons == ErrorControl::Full {
                    let acnrms = self.sens_acor_norm();
                    let combined = self.acnrm.max(acnrms);
                    dsm = combined * self.tq[2];
                    if dsm > T::one() {
                        let sens = self.sens.as_mut().expect("sensitivity substate");
                        sens.netfs += 1;
                        if let Some(stgr1) = sens.stgr1.as_mut() {
                            stgr1.iter_mut().for_each(|c| c.netf += 1);
                        }
                        self.error_test_fail(dsm, saved_t, &mut nef)?;
                        force_setup = true;
                        continue;
                    }
                }
            }

            break;
        }

        // The step passed every test; commit it and choose the next (q, h).
        self.complete_step();
        self.prepare_next_step(dsm);

        self.etamax = if self.nst <= SMALL_NST {
            T::from(ETAMX2).unwrap()
        } else {
            T::from(ETAMX3).unwrap()
        };

        // acor now estimates the local error
        let tq2 = self.tq[2];
        self.acor *= tq2;
        if let Some(quad) = self.quad.as_mut() {
            quad.acorq *= tq2;
        }
        if let Some(sens) = self.sens.as_mut() {
            for a in sens.acors.iter_mut() {
                *a *= tq2;
            }
        }

        Ok(())
    }

    /// Applies a pending order change and rescales the history to the
    /// chosen next step size.
    fn adjust_params(&mut self) {
        if self.qprime != self.q {
            let deltaq = self.qprime as isize - self.q as isize;
            self.adjust_order(deltaq);
            self.q = self.qprime;
            self.qwait = self.q + 1;
        }
        self.rescale();
    }

    /// Advances `tn` and applies the Pascal-triangle predictor update to
    /// every history array. A pure function of the history.
    fn predict(&mut self) {
        self.tn += self.h;
        if let Some(tstop) = self.tstop {
            if (self.tn - tstop) * self.h > T::zero() {
                self.tn = tstop;
            }
        }
        self.nlp.tn = self.tn;
        for k in 1..=self.q {
            for j in (k..=self.q).rev() {
                self.pascal_row(j, T::one());
            }
        }
    }

    /// Copies the predicted values the corrector residuals read.
    fn load_predictions(&mut self) {
        self.nlp.ypred.copy_from(&self.zn[0]);
        self.nlp.zn1.copy_from(&self.zn[1]);
        if let Some(sens) = self.sens.as_ref() {
            let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
            for is in 0..sens.ns {
                sw.ys_pred[is].copy_from(&sens.zns[0][is]);
                sw.zns1[is].copy_from(&sens.zns[1][is]);
            }
            sw.state_ewt.copy_from(&self.ewt);
        }
    }

    /// Runs the state corrector (or the stacked state + sensitivities
    /// corrector under SIMULTANEOUS) and, on success, loads `y`, the
    /// accumulated corrections and their weighted norm.
    fn corrector_state(&mut self, force_setup: bool) -> Result<(), nonlinear::Error> {
        let call_setup = if self.nls.get_type() == NLSolverType::FixedPoint {
            // no setup ever resets the rate estimate under functional
            // iteration, so start each attempt afresh
            self.nlp.conv_rate = T::one();
            false
        } else {
            force_setup
                || self.nst == 0
                || self.nst >= self.nlp.nstlp + MSBP
                || (self.nlp.lp.gamrat - T::one()).abs() > T::from(DGMAX).unwrap()
        };
        self.nlp.nst = self.nst;

        let simultaneous = matches!(
            self.sens.as_ref().map(|s| s.ism),
            Some(SensMethod::Simultaneous)
        );

        if simultaneous {
            self.nlp.mode = CorrectorMode::Simult;
            {
                let sens = self.sens.as_mut().expect("sensitivity substate");
                let nls = self.nls_sim.as_mut().expect("simultaneous solver");
                nls.solve(
                    &mut self.nlp,
                    &sens.zcor,
                    &mut sens.acor_stacked,
                    &self.ewt,
                    self.tq[4],
                    call_setup,
                )?;
            }
            // unpack the stacked correction
            let n = self.zn[0].len();
            let sens = self.sens.as_mut().expect("sensitivity substate");
            for i in 0..n {
                self.acor[i] = sens.acor_stacked[i];
            }
            for is in 0..sens.ns {
                let off = (is + 1) * n;
                for i in 0..n {
                    sens.acors[is][i] = sens.acor_stacked[off + i];
                }
            }
        } else {
            self.nlp.mode = CorrectorMode::State;
            self.nls.solve(
                &mut self.nlp,
                &self.corzero,
                &mut self.acor,
                &self.ewt,
                self.tq[4],
                call_setup,
            )?;
        }

        // final iterate and its norm
        self.nlp.y.copy_from(&self.nlp.ypred);
        self.nlp.y += &self.acor;
        self.acnrm = self.wrms_norm(&self.acor);

        if simultaneous {
            let sens = self.sens.as_mut().expect("sensitivity substate");
            let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
            for is in 0..sens.ns {
                sw.ys[is].copy_from(&sw.ys_pred[is]);
                sw.ys[is] += &sens.acors[is];
            }
            if sens.errcons == ErrorControl::Full {
                let mut nrm = self.acnrm;
                for is in 0..sens.ns {
                    nrm = nrm.max(sens.acors[is].norm_wrms(&sw.ewts[is]));
                }
                self.acnrm = nrm;
            }
        }

        self.nlp.convfail = ConvFail::NoFailures;
        Ok(())
    }

    /// Solves the sensitivity correctors after the states converged
    /// (STAGGERED and STAGGERED1).
    fn corrector_sens_staggered(&mut self) -> Result<(), nonlinear::Error> {
        // the sensitivity residuals read f at the corrected state
        {
            let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
            self.nlp
                .lp
                .problem
                .rhs(self.tn, &self.nlp.y, &mut sw.ydot)
                .map_err(|e| match e {
                    CallbackError::Recoverable => nonlinear::Error::SysRecover,
                    CallbackError::Fatal => nonlinear::Error::SysFail,
                })?;
            sw.nfes += 1;
        }

        let ism = self.sens.as_ref().expect("sensitivity substate").ism;
        match ism {
            SensMethod::Staggered => {
                self.nlp.mode = CorrectorMode::StgrAll;
                {
                    let sens = self.sens.as_mut().expect("sensitivity substate");
                    let nls = self.nls_stg.as_mut().expect("staggered solver");
                    nls.solve(
                        &mut self.nlp,
                        &sens.zcor,
                        &mut sens.acor_stacked,
                        &self.ewt,
                        self.tq[4],
                        false,
                    )?;
                }
                let n = self.zn[0].len();
                let sens = self.sens.as_mut().expect("sensitivity substate");
                for is in 0..sens.ns {
                    let off = is * n;
                    for i in 0..n {
                        sens.acors[is][i] = sens.acor_stacked[off + i];
                    }
                }
            }
            SensMethod::Staggered1 => {
                let ns = self.sens.as_ref().expect("sensitivity substate").ns;
                for is in 0..ns {
                    self.nlp.mode = CorrectorMode::Stgr1(is);
                    let result = {
                        let sens = self.sens.as_mut().expect("sensitivity substate");
                        let nls = self.nls_stg1.as_mut().expect("staggered1 solver");
                        let nni0 = nls.get_num_iters();
                        let result = nls.solve(
                            &mut self.nlp,
                            &self.corzero,
                            &mut sens.acors[is],
                            &self.ewt,
                            self.tq[4],
                            false,
                        );
                        let counters = sens.stgr1.as_mut().expect("staggered1 counters");
                        counters[is].nni += nls.get_num_iters() - nni0;
                        if result.is_err() {
                            counters[is].ncfn += 1;
                        }
                        result
                    };
                    result?;
                }
            }
            SensMethod::Simultaneous => unreachable!("handled in the state corrector"),
        }

        // commit the corrected sensitivities
        let sens = self.sens.as_mut().expect("sensitivity substate");
        let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
        for is in 0..sens.ns {
            sw.ys[is].copy_from(&sw.ys_pred[is]);
            sw.ys[is] += &sens.acors[is];
        }
        Ok(())
    }

    /// Maps a fatal corrector outcome to its integrator error; recoverable
    /// outcomes come back as [`Recoverable`] for the retry path.
    fn classify_nl_failure(
        &self,
        e: nonlinear::Error,
        sens_phase: bool,
    ) -> Result<Recoverable<T>, Error> {
        let t = Self::f64_of(self.tn);
        match e {
            nonlinear::Error::ConvergenceRecover
            | nonlinear::Error::SetupRecover
            | nonlinear::Error::SolveRecover => Ok(Recoverable::Conv),
            nonlinear::Error::SysRecover => Ok(Recoverable::Rhs),
            nonlinear::Error::SysFail => Err(if sens_phase {
                Error::SensRhsFuncFailure { t }
            } else {
                Error::RhsFuncFailure { t }
            }),
            nonlinear::Error::SetupFail => Err(Error::SetupFailure { t }),
            nonlinear::Error::SolveFail => Err(Error::SolveFailure { t }),
        }
    }

    /// Common retry path for recoverable per-step failures: restore the
    /// history, count, cap, reduce the step and force a fresh setup.
    fn handle_recoverable(
        &mut self,
        kind: Recoverable<T>,
        saved_t: T,
        ncf: &mut usize,
        sens_phase: bool,
    ) -> Result<(), Error> {
        self.ncfn += 1;
        if sens_phase {
            if let Some(sens) = self.sens.as_mut() {
                sens.ncfns += 1;
            }
        }
        self.restore(saved_t);
        self.phase = 1;

        *ncf += 1;
        self.etamax = T::one();

        let at_hmin = self.h.abs() <= self.hmin * T::from(ONEPSM).unwrap();
        if at_hmin || *ncf == self.maxncf {
            let t = Self::f64_of(self.tn);
            let h = Self::f64_of(self.h);
            return Err(match kind {
                Recoverable::Conv => Error::ConvFailure { t, h },
                Recoverable::Rhs => Error::RepeatedRhsFuncErr { t },
                Recoverable::Constraint(_) => Error::ConstraintFailure { t },
            });
        }

        self.eta = match kind {
            // eta was chosen by the constraint check
            Recoverable::Constraint(eta) => eta,
            _ => T::from(ETACF).unwrap().max(self.hmin / self.h.abs()),
        };
        trace!(
            "step retry after convergence-class failure: t={:.5e} h={:.5e} eta={:.5e} ncf={}",
            self.tn,
            self.h,
            self.eta,
            *ncf
        );
        self.nlp.convfail = ConvFail::Other;
        self.rescale();
        Ok(())
    }

    /// Local error test failure ladder: reduce the step, then drop the
    /// order, then restart at order one; cap at `maxnef` attempts.
    fn error_test_fail(&mut self, dsm: T, saved_t: T, nef: &mut usize) -> Result<(), Error> {
        *nef += 1;
        self.netf += 1;
        self.phase = 1;
        self.etamax = T::one();
        self.nlp.convfail = ConvFail::NoFailures;
        self.restore(saved_t);

        let t = Self::f64_of(self.tn);
        let h = Self::f64_of(self.h);
        if self.h.abs() <= self.hmin * T::from(ONEPSM).unwrap() {
            return Err(Error::ErrFailure { t, h });
        }
        if *nef >= self.maxnef {
            return Err(Error::ErrFailure { t, h });
        }

        trace!(
            "error test failed: t={:.5e} h={:.5e} dsm={:.5e} nef={}",
            saved_t,
            self.h,
            dsm,
            *nef
        );

        if *nef <= MXNEF1 {
            // eta from the order-q error estimate
            let ell = T::from(self.q + 1).unwrap();
            let mut eta =
                ((T::from(EBIAS).unwrap() * dsm).powf(ell.recip()) + T::from(ADDON).unwrap())
                    .recip();
            if *nef >= SMALL_NEF {
                eta = eta.min(T::from(ETAMXF).unwrap());
            }
            eta = eta.max(T::from(ETAMIN).unwrap()).max(self.hmin / self.h.abs());
            self.eta = eta;

            // second failure also drops the order
            if *nef >= SMALL_NEF && self.q > 1 {
                self.adjust_order(-1);
                self.q -= 1;
                self.qwait = self.q + 1;
            }
            self.rescale();
            return Ok(());
        }

        // repeated failures: restart at order one with a fresh derivative row
        self.eta = T::from(ETAMXF).unwrap().max(self.hmin / self.h.abs());
        self.q = 1;
        self.qwait = LONG_WAIT;
        self.h *= self.eta;
        self.hprime = self.h;
        self.hscale = self.h;
        self.nscon = 0;

        self.nlp
            .lp
            .problem
            .rhs(self.tn, &self.zn[0], &mut self.tempv)
            .map_err(|e| match e {
                CallbackError::Recoverable => Error::RepeatedRhsFuncErr { t },
                CallbackError::Fatal => Error::RhsFuncFailure { t },
            })?;
        self.nlp.nfe += 1;
        let h = self.h;
        self.zn[1].copy_from(&self.tempv);
        self.zn[1] *= h;

        if self.quad.is_some() {
            {
                let quad = self.quad.as_mut().expect("quadrature substate present");
                self.nlp
                    .lp
                    .problem
                    .quad_rhs(self.tn, &self.zn[0], &mut quad.acorq)
                    .map_err(|_| Error::QuadRhsFuncFailure { t })?;
                quad.nfqe += 1;
            }
            let quad = self.quad.as_mut().expect("quadrature substate present");
            quad.znq[1].copy_from(&quad.acorq);
            quad.znq[1] *= h;
        }

        if self.sens.is_some() {
            // sensitivities restart from their own fresh derivative rows
            {
                let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
                sw.ydot.copy_from(&self.tempv);
                let sens = self.sens.as_ref().expect("sensitivity substate");
                for is in 0..sens.ns {
                    sw.ys[is].copy_from(&sens.zns[0][is]);
                }
            }
            self.nlp.y.copy_from(&self.zn[0]);
            self.nlp
                .eval_sens_rhs(false, None)
                .map_err(|_| Error::SensRhsFuncFailure { t })?;

            let sens = self.sens.as_mut().expect("sensitivity substate");
            let sw = self.nlp.sens.as_ref().expect("sensitivity work present");
            for is in 0..sens.ns {
                sens.zns[1][is].copy_from(&sw.fs[is]);
                sens.zns[1][is] *= h;
            }
        }

        Ok(())
    }

    /// Post-convergence inequality-constraint check. Returns `Ok(None)` when
    /// satisfied (possibly after an in-place correction), `Ok(Some(eta))`
    /// when the step must be retried smaller, and an error at `hmin`.
    fn check_constraints(&mut self) -> Result<Option<T>, Error> {
        let n = self.zn[0].len();
        let constraints = self.constraints.as_ref().expect("constraints present");
        let y = &self.nlp.y;

        // mask of violated components
        let mut any = false;
        for i in 0..n {
            let c = constraints[i];
            let yi = y[i];
            let bad = if c.abs() == T::two() {
                yi * c <= T::zero()
            } else if c.abs() == T::one() {
                yi * c < T::zero()
            } else {
                false
            };
            self.tempv[i] = if bad {
                any = true;
                T::one()
            } else {
                T::zero()
            };
        }
        if !any {
            return Ok(None);
        }

        // correction toward the feasible region: v = mask*(y - 0.1*a*c/ewt)
        // where a selects the strict (|c|=2) components
        let mut vnorm_sq = T::zero();
        let mut v = DVector::<T>::zeros(n);
        for i in 0..n {
            let c = constraints[i];
            let strict = if c.abs() == T::two() { c } else { T::zero() };
            let vi = self.tempv[i] * (y[i] - T::pt1() * strict / self.ewt[i]);
            v[i] = vi;
            let vw = vi * self.ewt[i];
            vnorm_sq += vw * vw;
        }
        let vnorm = (vnorm_sq / T::from(n).unwrap()).sqrt();

        if vnorm <= self.tq[4] {
            // small violation: correct in place and accept
            self.acor -= &v;
            self.nlp.y -= &v;
            return Ok(None);
        }

        if self.h.abs() <= self.hmin * T::from(ONEPSM).unwrap() {
            return Err(Error::ConstraintFailure {
                t: Self::f64_of(self.tn),
            });
        }

        // constraint correction too large: shrink h by the smallest ratio
        // that moves the prediction inside the feasible region
        let mut minq: Option<T> = None;
        for i in 0..n {
            let denom = self.tempv[i] * (self.zn[0][i] - self.nlp.y[i]);
            if denom != T::zero() {
                let q = self.zn[0][i] / denom;
                minq = Some(match minq {
                    None => q,
                    Some(m) => m.min(q),
                });
            }
        }
        let eta = match minq {
            Some(m) => (T::pt9() * m).max(T::pt1()),
            None => T::pt1(),
        };
        let eta = eta.max(self.hmin / self.h.abs());
        Ok(Some(eta))
    }

    /// Commits an accepted step: counters, the step-size memory `tau`, the
    /// corrected history, and the saved correction column used for order
    /// raises.
    fn complete_step(&mut self) {
        self.nst += 1;
        // stability-limit hook input: consecutive steps at this (q, h)
        if self.sldeton && self.q >= 3 {
            self.nscon += 1;
        } else {
            self.nscon = 0;
        }
        self.hu = self.h;
        self.qu = self.q;

        for i in (2..=self.q).rev() {
            self.tau[i] = self.tau[i - 1];
        }
        if self.q == 1 && self.nst > 1 {
            self.tau[2] = self.tau[1];
        }
        self.tau[1] = self.h;

        // zn[j] += l[j] * acor (and likewise for quadratures and
        // sensitivities)
        for j in 0..=self.q {
            let lj = self.l[j];
            self.zn[j].axpy(lj, &self.acor, T::one());
            if let Some(quad) = self.quad.as_mut() {
                quad.znq[j].axpy(lj, &quad.acorq, T::one());
            }
            if let Some(sens) = self.sens.as_mut() {
                for (zs, a) in sens.zns[j].iter_mut().zip(sens.acors.iter()) {
                    zs.axpy(lj, a, T::one());
                }
            }
        }

        self.qwait = self.qwait.saturating_sub(1);
        let save_acor = (self.qwait == 1 && self.q != self.qmax)
            || (self.phase == 0 && self.q < self.qmax);
        if save_acor {
            self.save_acor_column();
            self.saved_tq5 = self.tq[5];
            self.indx_acor = self.qmax;
        }
    }

    /// Stores the accumulated corrections in the top history row, from
    /// which a later order raise builds its new column.
    fn save_acor_column(&mut self) {
        let qmax = self.qmax;
        self.zn[qmax].copy_from(&self.acor);
        if let Some(quad) = self.quad.as_mut() {
            quad.znq[qmax].copy_from(&quad.acorq);
        }
        if let Some(sens) = self.sens.as_mut() {
            for (zs, a) in sens.zns[qmax].iter_mut().zip(sens.acors.iter()) {
                zs.copy_from(a);
            }
        }
    }

    /// Chooses the next order and step size.
    ///
    /// During the startup ramp the order is raised and the step doubled
    /// after every accepted step. Afterwards the candidate orders q-1, q,
    /// q+1 compete through the biased efficiencies `(1/(2E_k))^(1/(k+1))`,
    /// with a threshold of 1.5 before any change is worth making.
    fn prepare_next_step(&mut self, dsm: T) {
        if self.phase == 0 {
            if self.q == self.qmax {
                self.phase = 1;
            } else if self.nst > 1 {
                // ramp: raise the order, double the step
                self.qprime = self.q + 1;
                self.qwait = self.qprime + 1;
                self.eta = T::two();
                self.eta /= T::one().max(self.h.abs() * self.hmax_inv * self.eta);
                self.hprime = self.h * self.eta;
                return;
            } else {
                self.qprime = self.q;
                self.hprime = self.h;
                self.eta = T::one();
                return;
            }
        }

        if self.etamax == T::one() {
            self.qwait = self.qwait.max(2);
            self.qprime = self.q;
            self.hprime = self.h;
            self.eta = T::one();
            return;
        }

        let etaq = self.eta_at(dsm, self.q + 1);

        if self.qwait != 0 {
            self.eta = etaq;
            self.qprime = self.q;
            self.set_eta();
            return;
        }

        self.qwait = 2;
        let etaqm1 = self.compute_etaqm1();
        let etaqp1 = self.compute_etaqp1();

        let etam = etaqm1.max(etaq).max(etaqp1);
        if etam < T::from(THRESH).unwrap() {
            self.eta = T::one();
            self.qprime = self.q;
        } else if etam == etaq {
            self.eta = etaq;
            self.qprime = self.q;
        } else if etam == etaqm1 {
            self.eta = etaqm1;
            self.qprime = self.q - 1;
        } else {
            self.eta = etaqp1;
            self.qprime = self.q + 1;
            if self.lmm == crate::Method::Bdf {
                // the order raise consumes the saved correction column
                self.save_acor_column();
            }
        }
        self.set_eta();
    }

    /// Biased efficiency `1 / ((2*err)^(1/ell) + addon)`.
    fn eta_at(&self, err: T, ell: usize) -> T {
        ((T::from(EBIAS).unwrap() * err).powf(T::from(ell).unwrap().recip())
            + T::from(ADDON).unwrap())
        .recip()
    }

    /// Candidate efficiency at order q-1, from the highest history row.
    fn compute_etaqm1(&self) -> T {
        if self.q <= 1 {
            return T::zero();
        }
        let ddn = self.wrms_norm(&self.zn[self.q]) * self.tq[1];
        self.eta_at(ddn, self.q)
    }

    /// Candidate efficiency at order q+1, from the change in the saved
    /// correction column over an interval of constant step size.
    fn compute_etaqp1(&mut self) -> T {
        if self.q == self.qmax || self.saved_tq5 == T::zero() {
            return T::zero();
        }
        let ell = self.q + 1;
        let cquot =
            (self.tq[5] / self.saved_tq5) * (self.h / self.tau[2]).powi(ell as i32);
        self.tempv.copy_from(&self.zn[self.qmax]);
        self.tempv *= -cquot;
        self.tempv += &self.acor;
        let dup = self.wrms_norm(&self.tempv) * self.tq[3];
        self.eta_at(dup, ell + 1)
    }

    /// Applies the growth cap and the hmax clamp to the chosen eta.
    fn set_eta(&mut self) {
        if self.eta < T::from(THRESH).unwrap() {
            self.eta = T::one();
            self.hprime = self.h;
        } else {
            self.eta = self.eta.min(self.etamax);
            self.eta /= T::one().max(self.h.abs() * self.hmax_inv * self.eta);
            self.hprime = self.h * self.eta;
            if self.qprime < self.q {
                self.nscon = 0;
            }
        }
    }
}
