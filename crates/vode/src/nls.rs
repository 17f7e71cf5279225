//! The per-step corrector as a nonlinear problem.
//!
//! Solves for the correction `ycor = y - y_pred`:
//!
//! ```text
//! ycor + rl1*zn[1] - gamma * f(tn, zn[0] + ycor) = 0
//! ```
//!
//! Four modes share this type: the plain state corrector, the stacked
//! state-plus-sensitivities corrector (SIMULTANEOUS), the all-sensitivities
//! corrector run after the states (STAGGERED), and the one-sensitivity
//! corrector (STAGGERED1). The stacked modes keep the same iteration matrix
//! for every block.

use nalgebra::DVector;
use nonlinear::{norm_wrms::NormWRMS, Error, NLProblem, NLSolver};

use crate::{
    constants::{CRDOWN, RATEMAX, RDIV},
    ls::{ConvFail, LProblem},
    sens::SensRhsKind,
    traits::{CallbackError, OdeProblem, VodeReal},
    Method,
};

/// Which corrector equation the problem currently represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CorrectorMode {
    /// states only
    State,
    /// states and all sensitivities, stacked
    Simult,
    /// all sensitivities, states already corrected
    StgrAll,
    /// one sensitivity at a time
    Stgr1(usize),
}

/// Sensitivity-side workspace and configuration used by the corrector.
#[derive(Debug)]
pub(crate) struct SensWork<T>
where
    T: VodeReal,
{
    pub ns: usize,
    pub kind: SensRhsKind,
    /// current sensitivity iterates
    pub ys: Vec<DVector<T>>,
    /// predicted sensitivities (znS[0] at prediction time)
    pub ys_pred: Vec<DVector<T>>,
    /// znS[1] at prediction time
    pub zns1: Vec<DVector<T>>,
    /// sensitivity right-hand sides
    pub fs: Vec<DVector<T>>,
    /// sensitivity error weights
    pub ewts: Vec<DVector<T>>,
    /// state error weights, copied in before each step's correctors
    pub state_ewt: DVector<T>,
    /// f(tn, y) backing the staggered residuals
    pub ydot: DVector<T>,
    /// difference-quotient scratch
    pub ytemp: DVector<T>,
    pub ftemp2: DVector<T>,

    // difference-quotient configuration
    /// parameter scale magnitudes, indexed by problem parameter
    pub pbar: Vec<T>,
    /// parameter selected by each sensitivity, signed 1-based
    pub plist: Vec<isize>,
    pub rhomax: T,
    pub reltol: T,

    /// sensitivity rhs evaluations
    pub nfse: usize,
    /// state rhs evaluations made by the difference-quotient scheme
    pub nfes: usize,
}

impl<T: VodeReal> SensWork<T> {
    pub fn new(ns: usize, n: usize, kind: SensRhsKind, reltol: T) -> Self {
        SensWork {
            ns,
            kind,
            ys: (0..ns).map(|_| DVector::zeros(n)).collect(),
            ys_pred: (0..ns).map(|_| DVector::zeros(n)).collect(),
            zns1: (0..ns).map(|_| DVector::zeros(n)).collect(),
            fs: (0..ns).map(|_| DVector::zeros(n)).collect(),
            ewts: (0..ns).map(|_| DVector::zeros(n)).collect(),
            state_ewt: DVector::zeros(n),
            ydot: DVector::zeros(n),
            ytemp: DVector::zeros(n),
            ftemp2: DVector::zeros(n),
            pbar: vec![T::one(); ns],
            plist: (0..ns).map(|i| (i + 1) as isize).collect(),
            rhomax: T::zero(),
            reltol,
            nfse: 0,
            nfes: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct NlsProblem<T, P, LS>
where
    T: VodeReal,
{
    pub lp: LProblem<T, P, LS>,

    /// current iterate / user-visible solution vector
    pub y: DVector<T>,
    /// predicted y (zn[0] at prediction time)
    pub ypred: DVector<T>,
    /// zn[1] at prediction time
    pub zn1: DVector<T>,
    /// f at the current iterate
    pub ftemp: DVector<T>,
    /// per-block solve scratch
    btemp: DVector<T>,

    pub tn: T,
    pub rl1: T,
    /// convergence-rate estimate, carried across iterations and steps
    pub conv_rate: T,
    /// norm of the previous correction increment
    pub delp: T,
    pub convfail: ConvFail,

    /// mirror of the integrator step counter
    pub nst: usize,
    /// step number at the last linear setup
    pub nstlp: usize,
    /// rhs evaluations
    pub nfe: usize,

    pub mode: CorrectorMode,
    pub sens: Option<SensWork<T>>,

    n: usize,
}

impl<T, P, LS> NlsProblem<T, P, LS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
{
    pub fn new(problem: P, ls: LS, lmm: Method, t0: T, y0: &DVector<T>) -> Self {
        let n = y0.len();
        NlsProblem {
            lp: LProblem::new(problem, ls, lmm, n),
            y: y0.clone_owned(),
            ypred: DVector::zeros(n),
            zn1: DVector::zeros(n),
            ftemp: DVector::zeros(n),
            btemp: DVector::zeros(n),
            tn: t0,
            rl1: T::one(),
            conv_rate: T::one(),
            delp: T::zero(),
            convfail: ConvFail::NoFailures,
            nst: 0,
            nstlp: 0,
            nfe: 0,
            mode: CorrectorMode::State,
            sens: None,
            n,
        }
    }

    pub fn re_init(&mut self, t0: T, y0: &DVector<T>) {
        self.y.copy_from(y0);
        self.tn = t0;
        self.rl1 = T::one();
        self.conv_rate = T::one();
        self.delp = T::zero();
        self.convfail = ConvFail::NoFailures;
        self.nst = 0;
        self.nstlp = 0;
        self.nfe = 0;
        self.mode = CorrectorMode::State;
        self.lp.re_init();
    }

    fn map_rhs_err(e: CallbackError) -> Error {
        match e {
            CallbackError::Recoverable => Error::SysRecover,
            CallbackError::Fatal => Error::SysFail,
        }
    }

    /// Updates `y` and `ftemp` from the state correction block.
    fn eval_state(&mut self, ycor: &DVector<T>, off: usize) -> Result<(), Error> {
        for i in 0..self.n {
            self.y[i] = self.ypred[i] + ycor[off + i];
        }
        self.lp
            .problem
            .rhs(self.tn, &self.y, &mut self.ftemp)
            .map_err(Self::map_rhs_err)?;
        self.nfe += 1;
        Ok(())
    }

    /// Evaluates the sensitivity right-hand sides at the current `y`,
    /// `ydot` pair through the configured route (batch, one-at-a-time, or
    /// difference quotients). `only` restricts the evaluation to a single
    /// sensitivity (the STAGGERED1 corrector).
    pub fn eval_sens_rhs(&mut self, ydot_is_ftemp: bool, only: Option<usize>) -> Result<(), Error> {
        let sw = self.sens.as_mut().expect("sensitivity work present");
        if ydot_is_ftemp {
            sw.ydot.copy_from(&self.ftemp);
        }
        let range = match only {
            Some(is) => is..is + 1,
            None => 0..sw.ns,
        };
        match sw.kind {
            SensRhsKind::AllSens => {
                self.lp
                    .problem
                    .sens_rhs(self.tn, &self.y, &sw.ydot, &sw.ys, &mut sw.fs)
                    .map_err(Self::map_rhs_err)?;
                sw.nfse += 1;
            }
            SensRhsKind::OneSens => {
                for is in range {
                    self.lp
                        .problem
                        .sens_rhs1(self.tn, &self.y, &sw.ydot, is, &sw.ys[is], &mut sw.fs[is])
                        .map_err(Self::map_rhs_err)?;
                    sw.nfse += 1;
                }
            }
            SensRhsKind::DiffQuotient => {
                for is in range {
                    crate::sens::dq_sens_rhs1(
                        &mut self.lp.problem,
                        sw,
                        self.tn,
                        &self.y,
                        is,
                    )
                    .map_err(Self::map_rhs_err)?;
                }
            }
        }
        Ok(())
    }

    /// Loads one residual block `res = ycor + rl1*zn1 - gamma*f`.
    fn load_residual(
        res: &mut DVector<T>,
        off: usize,
        ycor: &DVector<T>,
        zn1: &DVector<T>,
        f: &DVector<T>,
        rl1: T,
        gamma: T,
        n: usize,
    ) {
        for i in 0..n {
            res[off + i] = ycor[off + i] + rl1 * zn1[i] - gamma * f[i];
        }
    }

    /// WRMS norm of one block of a stacked vector.
    fn wrms_block(v: &DVector<T>, off: usize, n: usize, w: &DVector<T>) -> T {
        let mut sum = T::zero();
        for i in 0..n {
            let vw = v[off + i] * w[i];
            sum += vw * vw;
        }
        (sum / T::from(n).unwrap()).sqrt()
    }

    /// Weighted norm of the current correction, max-combined over the
    /// blocks the active mode carries.
    pub fn correction_norm(&self, v: &DVector<T>, state_ewt: &DVector<T>) -> T {
        let n = self.n;
        match self.mode {
            CorrectorMode::State => v.norm_wrms(state_ewt),
            CorrectorMode::Simult => {
                let sw = self.sens.as_ref().expect("sensitivity work present");
                let mut nrm = Self::wrms_block(v, 0, n, state_ewt);
                for is in 0..sw.ns {
                    nrm = nrm.max(Self::wrms_block(v, (is + 1) * n, n, &sw.ewts[is]));
                }
                nrm
            }
            CorrectorMode::StgrAll => {
                let sw = self.sens.as_ref().expect("sensitivity work present");
                let mut nrm = T::zero();
                for is in 0..sw.ns {
                    nrm = nrm.max(Self::wrms_block(v, is * n, n, &sw.ewts[is]));
                }
                nrm
            }
            CorrectorMode::Stgr1(is) => {
                let sw = self.sens.as_ref().expect("sensitivity work present");
                v.norm_wrms(&sw.ewts[is])
            }
        }
    }
}

impl<T, P, LS> NLProblem<T> for NlsProblem<T, P, LS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
{
    fn sys(&mut self, ycor: &DVector<T>, res: &mut DVector<T>) -> Result<(), Error> {
        let n = self.n;
        let gamma = self.lp.gamma;
        let rl1 = self.rl1;

        match self.mode {
            CorrectorMode::State => {
                self.eval_state(ycor, 0)?;
                Self::load_residual(res, 0, ycor, &self.zn1, &self.ftemp, rl1, gamma, n);
            }
            CorrectorMode::Simult => {
                self.eval_state(ycor, 0)?;
                {
                    let sw = self.sens.as_mut().expect("sensitivity work present");
                    for is in 0..sw.ns {
                        let off = (is + 1) * n;
                        for i in 0..n {
                            sw.ys[is][i] = sw.ys_pred[is][i] + ycor[off + i];
                        }
                    }
                }
                self.eval_sens_rhs(true, None)?;

                Self::load_residual(res, 0, ycor, &self.zn1, &self.ftemp, rl1, gamma, n);
                let sw = self.sens.as_ref().expect("sensitivity work present");
                for is in 0..sw.ns {
                    Self::load_residual(
                        res,
                        (is + 1) * n,
                        ycor,
                        &sw.zns1[is],
                        &sw.fs[is],
                        rl1,
                        gamma,
                        n,
                    );
                }
            }
            CorrectorMode::StgrAll => {
                {
                    let sw = self.sens.as_mut().expect("sensitivity work present");
                    for is in 0..sw.ns {
                        let off = is * n;
                        for i in 0..n {
                            sw.ys[is][i] = sw.ys_pred[is][i] + ycor[off + i];
                        }
                    }
                }
                self.eval_sens_rhs(false, None)?;

                let sw = self.sens.as_ref().expect("sensitivity work present");
                for is in 0..sw.ns {
                    Self::load_residual(
                        res,
                        is * n,
                        ycor,
                        &sw.zns1[is],
                        &sw.fs[is],
                        rl1,
                        gamma,
                        n,
                    );
                }
            }
            CorrectorMode::Stgr1(is) => {
                {
                    let sw = self.sens.as_mut().expect("sensitivity work present");
                    for i in 0..n {
                        sw.ys[is][i] = sw.ys_pred[is][i] + ycor[i];
                    }
                }
                self.eval_sens_rhs(false, Some(is))?;

                let sw = self.sens.as_ref().expect("sensitivity work present");
                Self::load_residual(res, 0, ycor, &sw.zns1[is], &sw.fs[is], rl1, gamma, n);
            }
        }
        Ok(())
    }

    fn setup(&mut self, _ycor: &DVector<T>, _res: &DVector<T>, jbad: bool) -> Result<bool, Error> {
        let convfail = if jbad { ConvFail::BadJ } else { self.convfail };
        self.lp
            .setup(self.tn, self.nst, convfail, &self.y, &self.ftemp)?;

        // fresh setup: reset the rate estimate and the gamma bookkeeping
        self.lp.gammap = self.lp.gamma;
        self.lp.gamrat = T::one();
        self.conv_rate = T::one();
        self.nstlp = self.nst;

        Ok(self.lp.jcur)
    }

    fn solve(&mut self, _ycor: &DVector<T>, delta: &mut DVector<T>) -> Result<(), Error> {
        let n = self.n;
        match self.mode {
            CorrectorMode::State | CorrectorMode::Stgr1(_) => {
                if let CorrectorMode::Stgr1(is) = self.mode {
                    self.lp.solve_sens(delta, is)?;
                } else {
                    self.lp.solve(delta)?;
                }
            }
            CorrectorMode::Simult => {
                for i in 0..n {
                    self.btemp[i] = delta[i];
                }
                self.lp.solve(&mut self.btemp)?;
                for i in 0..n {
                    delta[i] = self.btemp[i];
                }
                let ns = self.sens.as_ref().expect("sensitivity work present").ns;
                for is in 0..ns {
                    let off = (is + 1) * n;
                    for i in 0..n {
                        self.btemp[i] = delta[off + i];
                    }
                    self.lp.solve_sens(&mut self.btemp, is)?;
                    for i in 0..n {
                        delta[off + i] = self.btemp[i];
                    }
                }
            }
            CorrectorMode::StgrAll => {
                let ns = self.sens.as_ref().expect("sensitivity work present").ns;
                for is in 0..ns {
                    let off = is * n;
                    for i in 0..n {
                        self.btemp[i] = delta[off + i];
                    }
                    self.lp.solve_sens(&mut self.btemp, is)?;
                    for i in 0..n {
                        delta[off + i] = self.btemp[i];
                    }
                }
            }
        }
        Ok(())
    }

    fn ctest<NLS>(
        &mut self,
        solver: &NLS,
        _ycor: &DVector<T>,
        del: &DVector<T>,
        tol: T,
        ewt: &DVector<T>,
    ) -> Result<bool, Error>
    where
        NLS: NLSolver<T>,
    {
        let delnrm = self.correction_norm(del, ewt);
        let m = solver.get_cur_iter();

        if m > 0 {
            self.conv_rate = (T::from(CRDOWN).unwrap() * self.conv_rate).max(delnrm / self.delp);
        }

        let rate = self.conv_rate.min(T::from(RATEMAX).unwrap());
        let dcon = self.conv_rate * delnrm / (T::one() - rate);
        if dcon < tol {
            return Ok(true);
        }

        // divergence: successive increments growing
        if m >= 1 && delnrm > T::from(RDIV).unwrap() * self.delp {
            return Err(Error::ConvergenceRecover);
        }

        self.delp = delnrm;
        Ok(false)
    }
}
