//! Forward sensitivity analysis: the substate, the three corrector
//! staggering strategies' bookkeeping, and the difference-quotient
//! sensitivity right-hand side.

use nalgebra::DVector;
use nonlinear::norm_wrms::NormWRMS;

use crate::{
    dky_eval,
    nls::SensWork,
    tol_control::SensTolControl,
    traits::{CallbackError, OdeProblem, VodeReal},
    Error, ErrorControl, Vode,
};

/// Strategy coupling the state and sensitivity corrector solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensMethod {
    /// One stacked corrector over states and all sensitivities.
    Simultaneous,
    /// States first, then one corrector over all sensitivities.
    Staggered,
    /// States first, then each sensitivity separately.
    Staggered1,
}

/// How the sensitivity right-hand side is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensRhsKind {
    /// User-supplied batch routine filling all sensitivities at once.
    AllSens,
    /// User-supplied routine for one sensitivity at a time.
    OneSens,
    /// Internal finite-difference approximation.
    DiffQuotient,
}

/// Per-sensitivity counters kept by the STAGGERED1 strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensCounters1 {
    /// corrector iterations
    pub nni: usize,
    /// corrector convergence failures
    pub ncfn: usize,
    /// error test failures
    pub netf: usize,
}

/// Sensitivity substate; exists only after `sens_init`.
#[derive(Debug)]
pub struct SensData<T>
where
    T: VodeReal,
{
    pub(crate) ns: usize,
    pub(crate) ism: SensMethod,
    /// Nordsieck histories, indexed `[row][sensitivity]`
    pub(crate) zns: Vec<Vec<DVector<T>>>,
    /// accumulated corrections per sensitivity
    pub(crate) acors: Vec<DVector<T>>,
    pub(crate) errcons: ErrorControl,
    pub(crate) tol: Option<SensTolControl<T>>,

    /// stacked corrector buffers
    pub(crate) zcor: DVector<T>,
    pub(crate) acor_stacked: DVector<T>,

    /// sens corrector convergence failures
    pub(crate) ncfns: usize,
    /// sens error test failures
    pub(crate) netfs: usize,
    /// per-sensitivity counters (STAGGERED1 only)
    pub(crate) stgr1: Option<Vec<SensCounters1>>,
}

impl<T: VodeReal> SensData<T> {
    pub(crate) fn reset(&mut self) {
        for row in self.zns.iter_mut() {
            for zs in row.iter_mut() {
                zs.fill(T::zero());
            }
        }
        self.ncfns = 0;
        self.netfs = 0;
        if let Some(stgr1) = self.stgr1.as_mut() {
            stgr1.iter_mut().for_each(|c| *c = SensCounters1::default());
        }
    }
}

impl<T, P, LS, NLS> Vode<T, P, LS, NLS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
    NLS: nonlinear::NLSolver<T>,
{
    /// Attaches forward sensitivity analysis for `ys0.len()` parameters with
    /// the given staggering strategy and right-hand-side route. Must be
    /// called before the first step.
    ///
    /// STAGGERED1 requires a one-at-a-time right-hand side; combining it
    /// with the batch form is rejected.
    pub fn sens_init(
        &mut self,
        ism: SensMethod,
        kind: SensRhsKind,
        ys0: &[DVector<T>],
    ) -> Result<(), Error> {
        if self.nst > 0 {
            return Err(Error::IllegalInput {
                msg: "sens_init must precede the first step".into(),
            });
        }
        let ns = ys0.len();
        if ns == 0 {
            return Err(Error::IllegalInput {
                msg: "no sensitivity initial vectors supplied".into(),
            });
        }
        if ys0.iter().any(|s| s.len() != self.n) {
            return Err(Error::IllegalInput {
                msg: "sensitivity initial vector length mismatch".into(),
            });
        }
        if ism == SensMethod::Staggered1 && kind == SensRhsKind::AllSens {
            return Err(Error::IllegalInput {
                msg: "STAGGERED1 requires a one-at-a-time sensitivity rhs".into(),
            });
        }

        let n = self.n;
        let mut zns: Vec<Vec<DVector<T>>> = (0..=self.qmax)
            .map(|_| (0..ns).map(|_| DVector::zeros(n)).collect())
            .collect();
        for (is, s0) in ys0.iter().enumerate() {
            zns[0][is].copy_from(s0);
        }

        // the stacked corrector length depends on the strategy
        let stacked = match ism {
            SensMethod::Simultaneous => (ns + 1) * n,
            SensMethod::Staggered => ns * n,
            SensMethod::Staggered1 => n,
        };

        self.sens = Some(SensData {
            ns,
            ism,
            zns,
            acors: (0..ns).map(|_| DVector::zeros(n)).collect(),
            errcons: ErrorControl::Full,
            tol: None,
            zcor: DVector::zeros(stacked),
            acor_stacked: DVector::zeros(stacked),
            ncfns: 0,
            netfs: 0,
            stgr1: (ism == SensMethod::Staggered1)
                .then(|| vec![SensCounters1::default(); ns]),
        });

        let mut sw = SensWork::new(ns, n, kind, self.tol.rtol());
        for (is, s0) in ys0.iter().enumerate() {
            sw.ys[is].copy_from(s0);
        }
        self.nlp.sens = Some(sw);

        match ism {
            SensMethod::Simultaneous => {
                self.nls_sim = Some(NLS::new((ns + 1) * n, self.maxcor));
            }
            SensMethod::Staggered => {
                self.nls_stg = Some(NLS::new(ns * n, self.maxcor));
            }
            SensMethod::Staggered1 => {
                self.nls_stg1 = Some(NLS::new(n, self.maxcor));
            }
        }

        Ok(())
    }

    /// Re-initializes the sensitivity substate for the same parameter count.
    pub fn sens_re_init(&mut self, ys0: &[DVector<T>]) -> Result<(), Error> {
        let sens = self.sens.as_mut().ok_or(Error::NoSens)?;
        if ys0.len() != sens.ns {
            return Err(Error::IllegalInput {
                msg: format!("{} initial vectors for {} parameters", ys0.len(), sens.ns),
            });
        }
        sens.reset();
        let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
        sw.nfse = 0;
        sw.nfes = 0;
        for (is, s0) in ys0.iter().enumerate() {
            sens.zns[0][is].copy_from(s0);
            sw.ys[is].copy_from(s0);
        }
        Ok(())
    }

    /// Parameter scales `pbar` and the selection list `plist` for the
    /// difference-quotient route.
    ///
    /// `pbar[i]` gives the order of magnitude of problem parameter `i`, so
    /// it is indexed by parameter, not by sensitivity; only its magnitude is
    /// used. Entry `j` of `plist` selects parameter `|plist[j]| - 1` for
    /// sensitivity `j`; a negative entry marks a parameter that only enters
    /// through the initial conditions, so its perturbation term is skipped.
    /// Every selected parameter must have a `pbar` entry.
    pub fn set_sens_params(
        &mut self,
        pbar: Option<Vec<T>>,
        plist: Option<Vec<isize>>,
    ) -> Result<(), Error> {
        let ns = self.sens.as_ref().ok_or(Error::NoSens)?.ns;
        let sw = self.nlp.sens.as_mut().expect("sensitivity work present");

        if let Some(pbar) = &pbar {
            if pbar.is_empty() {
                return Err(Error::IllegalInput {
                    msg: "pbar must not be empty".into(),
                });
            }
            if pbar.iter().any(|&pb| pb == T::zero()) {
                return Err(Error::IllegalInput {
                    msg: "pbar entries must be nonzero".into(),
                });
            }
        }
        if let Some(plist) = &plist {
            if plist.len() != ns {
                return Err(Error::IllegalInput {
                    msg: "plist length mismatch".into(),
                });
            }
            if plist.iter().any(|&p| p == 0) {
                return Err(Error::IllegalInput {
                    msg: "plist entries must be nonzero".into(),
                });
            }
        }

        // cross-check before committing anything
        let pbar_len = pbar.as_ref().map_or(sw.pbar.len(), |p| p.len());
        let selected: &[isize] = plist.as_deref().unwrap_or(&sw.plist);
        if selected.iter().any(|&p| p.unsigned_abs() - 1 >= pbar_len) {
            return Err(Error::IllegalInput {
                msg: "plist selects a parameter with no pbar entry".into(),
            });
        }

        if let Some(pbar) = pbar {
            sw.pbar = pbar;
        }
        if let Some(plist) = plist {
            sw.plist = plist;
        }
        Ok(())
    }

    /// Cut-off controlling the difference-quotient scheme selection; the
    /// sign selects centered (`>= 0`) or forward (`< 0`) differences.
    pub fn set_sens_dq_rho_max(&mut self, rhomax: T) -> Result<(), Error> {
        self.sens.as_ref().ok_or(Error::NoSens)?;
        self.nlp
            .sens
            .as_mut()
            .expect("sensitivity work present")
            .rhomax = rhomax;
        Ok(())
    }

    /// Whether sensitivities participate in the local error test.
    pub fn set_sens_err_con(&mut self, errcons: ErrorControl) -> Result<(), Error> {
        self.sens.as_mut().ok_or(Error::NoSens)?.errcons = errcons;
        Ok(())
    }

    /// Sensitivity tolerances; when never set, they are estimated from the
    /// state tolerances and `pbar` at the first step.
    pub fn set_sens_tolerances(&mut self, tol: SensTolControl<T>) -> Result<(), Error> {
        self.sens.as_mut().ok_or(Error::NoSens)?.tol = Some(tol);
        Ok(())
    }

    /// Sensitivity vectors at the last driver return.
    pub fn get_sens(&self, t: T, ys: &mut [DVector<T>]) -> Result<(), Error> {
        let sens = self.sens.as_ref().ok_or(Error::NoSens)?;
        if ys.len() != sens.ns {
            return Err(Error::IllegalInput {
                msg: "output slice length mismatch".into(),
            });
        }
        for (is, out) in ys.iter_mut().enumerate() {
            self.get_sens_dky1(t, 0, is, out)?;
        }
        Ok(())
    }

    /// Dense output for sensitivity `is`, by analogy with [`Vode::get_dky`].
    pub fn get_sens_dky1(
        &self,
        t: T,
        k: usize,
        is: usize,
        dky: &mut DVector<T>,
    ) -> Result<(), Error> {
        let sens = self.sens.as_ref().ok_or(Error::NoSens)?;
        if is >= sens.ns {
            return Err(Error::IllegalInput {
                msg: format!("sensitivity index {} out of range", is),
            });
        }
        if k > self.qu {
            return Err(Error::BadK { k, qu: self.qu });
        }
        if self.nst == 0 {
            dky.copy_from(&sens.zns[0][is]);
            return Ok(());
        }
        self.check_t(t)?;

        // gather the column for this sensitivity
        let rows: Vec<DVector<T>> = (0..=self.qu).map(|j| sens.zns[j][is].clone()).collect();
        dky_eval(&rows, self.qu, k, t, self.tn, self.h, dky);
        Ok(())
    }

    /// Per-sensitivity STAGGERED1 counters.
    pub fn sens_stgr1_counters(&self) -> Result<&[SensCounters1], Error> {
        self.sens
            .as_ref()
            .ok_or(Error::NoSens)?
            .stgr1
            .as_deref()
            .ok_or(Error::NoSens)
    }

    /// Loads the sensitivity error weights from the current sensitivities,
    /// estimating default tolerances on first use.
    pub(crate) fn sens_ewt_set(&mut self) -> bool {
        let Some(sens) = self.sens.as_mut() else {
            return true;
        };
        let sw = self.nlp.sens.as_mut().expect("sensitivity work present");
        if sens.tol.is_none() {
            sens.tol = Some(SensTolControl::estimated_from(&self.tol, &sw.pbar, &sw.plist));
        }
        let tol = sens.tol.as_ref().unwrap();
        for is in 0..sens.ns {
            if !tol.ewt_set(is, &sens.zns[0][is], &mut sw.ewts[is]) {
                return false;
            }
        }
        true
    }

    /// Max-combined WRMS norm of the accumulated sensitivity corrections.
    pub(crate) fn sens_acor_norm(&self) -> T {
        let sens = self.sens.as_ref().expect("sensitivity substate present");
        let sw = self.nlp.sens.as_ref().expect("sensitivity work present");
        let mut nrm = T::zero();
        for is in 0..sens.ns {
            nrm = nrm.max(sens.acors[is].norm_wrms(&sw.ewts[is]));
        }
        nrm
    }
}

/// Difference-quotient approximation of one sensitivity right-hand side,
/// written into `sw.fs[is]`.
///
/// Scheme selection: with `delta = sqrt(max(reltol, uround))` and
/// `pbari = |pbar[which]|` the scale of the selected parameter, the
/// increments are `Delta_p = pbari*delta` and
/// `Delta_y = pbari / max(||s||_wrms*pbari, 1/delta)`. When their ratio is
/// within `|rhomax|` (or `rhomax` is zero) a single simultaneous
/// perturbation of `(y, p)` is used, otherwise y and p are perturbed
/// separately; the sign of `rhomax` picks centered versus forward
/// differences.
pub(crate) fn dq_sens_rhs1<T, P>(
    problem: &mut P,
    sw: &mut SensWork<T>,
    t: T,
    y: &DVector<T>,
    is: usize,
) -> Result<(), CallbackError>
where
    T: VodeReal,
    P: OdeProblem<T>,
{
    let delta = sw.reltol.max(T::epsilon()).sqrt();
    let rdelta = delta.recip();

    let which = (sw.plist[is].unsigned_abs()) - 1;
    let ic_only = sw.plist[is] < 0;
    let pbari = sw.pbar[which].abs();
    let psave = problem.param(which);

    let delta_p = pbari * delta;
    let rdelta_p = delta_p.recip();
    let norms = sw.ys[is].norm_wrms(&sw.state_ewt) * pbari;
    let rdelta_y = norms.max(rdelta) / pbari;
    let delta_y = rdelta_y.recip();

    let ratio = delta_y * rdelta_p;
    let rhomax = sw.rhomax;
    let simultaneous =
        rhomax == T::zero() || ratio.max(ratio.recip()) <= rhomax.abs();
    let centered = rhomax >= T::zero();

    let n = y.len();

    if simultaneous {
        let d = delta_y.min(delta_p);
        if centered {
            // fs = (f(y + d*s, p + d) - f(y - d*s, p - d)) / (2d)
            for i in 0..n {
                sw.ytemp[i] = y[i] + d * sw.ys[is][i];
            }
            problem.set_param(which, psave + d);
            problem.rhs(t, &sw.ytemp, &mut sw.fs[is])?;
            sw.nfes += 1;

            for i in 0..n {
                sw.ytemp[i] = y[i] - d * sw.ys[is][i];
            }
            problem.set_param(which, psave - d);
            problem.rhs(t, &sw.ytemp, &mut sw.ftemp2)?;
            sw.nfes += 1;

            let r2d = T::half() / d;
            for i in 0..n {
                sw.fs[is][i] = (sw.fs[is][i] - sw.ftemp2[i]) * r2d;
            }
        } else {
            // fs = (f(y + d*s, p + d) - f(y, p)) / d
            for i in 0..n {
                sw.ytemp[i] = y[i] + d * sw.ys[is][i];
            }
            problem.set_param(which, psave + d);
            problem.rhs(t, &sw.ytemp, &mut sw.fs[is])?;
            sw.nfes += 1;

            let rd = d.recip();
            for i in 0..n {
                sw.fs[is][i] = (sw.fs[is][i] - sw.ydot[i]) * rd;
            }
        }
    } else if centered {
        // y and p perturbed separately, centered in each
        for i in 0..n {
            sw.ytemp[i] = y[i] + delta_y * sw.ys[is][i];
        }
        problem.rhs(t, &sw.ytemp, &mut sw.fs[is])?;
        sw.nfes += 1;
        for i in 0..n {
            sw.ytemp[i] = y[i] - delta_y * sw.ys[is][i];
        }
        problem.rhs(t, &sw.ytemp, &mut sw.ftemp2)?;
        sw.nfes += 1;
        let r2dy = T::half() * rdelta_y;
        for i in 0..n {
            sw.fs[is][i] = (sw.fs[is][i] - sw.ftemp2[i]) * r2dy;
        }

        if !ic_only {
            problem.set_param(which, psave + delta_p);
            problem.rhs(t, y, &mut sw.ytemp)?;
            sw.nfes += 1;
            problem.set_param(which, psave - delta_p);
            problem.rhs(t, y, &mut sw.ftemp2)?;
            sw.nfes += 1;
            let r2dp = T::half() * rdelta_p;
            for i in 0..n {
                sw.fs[is][i] += (sw.ytemp[i] - sw.ftemp2[i]) * r2dp;
            }
        }
    } else {
        // y and p perturbed separately, forward in each
        for i in 0..n {
            sw.ytemp[i] = y[i] + delta_y * sw.ys[is][i];
        }
        problem.rhs(t, &sw.ytemp, &mut sw.fs[is])?;
        sw.nfes += 1;
        for i in 0..n {
            sw.fs[is][i] = (sw.fs[is][i] - sw.ydot[i]) * rdelta_y;
        }

        if !ic_only {
            problem.set_param(which, psave + delta_p);
            problem.rhs(t, y, &mut sw.ftemp2)?;
            sw.nfes += 1;
            for i in 0..n {
                sw.fs[is][i] += (sw.ftemp2[i] - sw.ydot[i]) * rdelta_p;
            }
        }
    }

    problem.set_param(which, psave);
    Ok(())
}
