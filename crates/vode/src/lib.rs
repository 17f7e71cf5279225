//! Variable-step, variable-order Adams/BDF integrator for `y' = f(t, y)`
//! with optional forward sensitivity analysis and quadrature integration.
//!
//! The solution history is kept in Nordsieck form: row `j` of the history
//! array holds `(h^j / j!) * y^(j)` at the current internal time. Each step
//! runs the pipeline coefficients -> predictor -> nonlinear corrector ->
//! local error test, then the step/order controller picks the next step
//! size and order. Failures are classified and retried with a reduced step
//! until the retry caps are exhausted.
//!
//! The nonlinear corrector is delegated to a pluggable
//! [`nonlinear::NLSolver`] (modified Newton or fixed-point), and Newton
//! corrections drive a pluggable [`linear::LSolver`] through the internal
//! Jacobian policy.

pub mod constants;
mod coeffs;
mod error;
mod io;
mod ls;
mod nls;
mod quad;
mod sens;
mod solve;
mod step;
mod tol_control;
mod traits;

#[cfg(test)]
mod tests;

use nalgebra::DVector;
use nonlinear::{norm_wrms::NormWRMS, NLSolver};

use constants::*;

pub use error::Error;
pub use io::{IntegratorStats, QuadStats, SensStats, SensStats1};
pub use quad::QuadData;
pub use sens::{SensCounters1, SensData, SensMethod, SensRhsKind};
pub use tol_control::{SensAtol, SensTolControl, TolControl};
pub use traits::{CallbackError, Jac, OdeProblem, QuadRhs, Rhs, SensParams, SensRhs, VodeReal};

use nls::NlsProblem;

/// Linear multistep method family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Adams-Moulton, orders 1..=12, for non-stiff problems.
    Adams,
    /// Backward differentiation formulas, orders 1..=5, for stiff problems.
    Bdf,
}

impl Method {
    fn q_max(&self) -> usize {
        match self {
            Method::Adams => ADAMS_Q_MAX,
            Method::Bdf => BDF_Q_MAX,
        }
    }
}

/// Job of the solver for one driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Step until `tout` is passed, then interpolate to it.
    Normal,
    /// Take a single internal step and return.
    OneStep,
}

/// Successful driver outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// `tout` (NORMAL) or the step end (ONE_STEP) was reached.
    Success,
    /// The integration reached the user's stop time.
    TStop,
}

/// Whether an auxiliary variable group participates in the local error test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorControl {
    Full,
    Partial,
}

/// The integrator. One value owns the entire integration state; it is not
/// re-entrant and must be driven from a single thread.
#[derive(Debug)]
pub struct Vode<T, P, LS, NLS>
where
    T: VodeReal,
{
    lmm: Method,
    tol: TolControl<T>,
    uround: T,
    n: usize,

    /// Nordsieck history, `zn[j] = (h^j / j!) y^(j)`
    zn: Vec<DVector<T>>,
    /// error weights
    ewt: DVector<T>,
    /// accumulated correction from the last corrector solve; scaled by
    /// `tq[2]` after step completion it estimates the local error
    acor: DVector<T>,
    /// work vector
    tempv: DVector<T>,
    /// zero vector handed to the corrector as the initial guess
    corzero: DVector<T>,
    constraints: Option<DVector<T>>,

    // step data
    q: usize,
    qprime: usize,
    qwait: usize,
    l: [T; L_MAX],
    tau: [T; L_MAX + 1],
    tq: [T; NUM_TESTS + 1],
    h: T,
    hprime: T,
    eta: T,
    hscale: T,
    tn: T,
    tretlast: T,
    acnrm: T,
    nlscoef: T,
    /// 0 while the startup ramp doubles h and raises the order each step
    phase: usize,
    /// steps at constant step size and order (stability-limit hook input)
    nscon: usize,

    // limits
    qmax: usize,
    mxstep: usize,
    mxhnil: i32,
    maxcor: usize,
    maxnef: usize,
    maxncf: usize,
    sldeton: bool,
    hmin: T,
    hmax_inv: T,
    etamax: T,

    // counters
    nst: usize,
    ncfn: usize,
    netf: usize,
    nor: usize,
    nhnil: i32,

    // saved values
    qu: usize,
    h0u: T,
    hu: T,
    saved_tq5: T,
    indx_acor: usize,
    tolsf: T,
    hin: T,
    tstop: Option<T>,

    // substates
    pub(crate) quad: Option<QuadData<T>>,
    pub(crate) sens: Option<SensData<T>>,

    // solvers
    nls: NLS,
    nls_sim: Option<NLS>,
    nls_stg: Option<NLS>,
    nls_stg1: Option<NLS>,

    /// corrector problem; owns the user problem and the linear problem
    pub(crate) nlp: NlsProblem<T, P, LS>,
}

impl<T, P, LS, NLS> Vode<T, P, LS, NLS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
    NLS: NLSolver<T>,
{
    /// Creates an integrator for `y' = f(t, y)` starting at `(t0, y0)`.
    ///
    /// The nonlinear iteration is chosen by the `NLS` type parameter
    /// ([`nonlinear::Newton`] or [`nonlinear::FixedPoint`]); `ls` is the
    /// linear solver driven by Newton corrections.
    pub fn new(
        problem: P,
        ls: LS,
        tol: TolControl<T>,
        lmm: Method,
        t0: T,
        y0: &DVector<T>,
    ) -> Result<Self, Error> {
        let n = y0.len();
        if n == 0 {
            return Err(Error::IllegalInput {
                msg: "y0 has zero length".into(),
            });
        }
        match &tol {
            TolControl::SS { rtol, atol } => {
                if *rtol < T::zero() || *atol < T::zero() {
                    return Err(Error::IllegalInput {
                        msg: "tolerances must be nonnegative".into(),
                    });
                }
            }
            TolControl::SV { rtol, atol } => {
                if *rtol < T::zero() || atol.iter().any(|&a| a < T::zero()) {
                    return Err(Error::IllegalInput {
                        msg: "tolerances must be nonnegative".into(),
                    });
                }
                if atol.len() != n {
                    return Err(Error::IllegalInput {
                        msg: "absolute tolerance vector length mismatch".into(),
                    });
                }
            }
        }

        let qmax = lmm.q_max();

        let mut zn: Vec<DVector<T>> = (0..=qmax).map(|_| DVector::zeros(n)).collect();
        zn[0].copy_from(y0);

        Ok(Vode {
            lmm,
            tol,
            uround: T::epsilon(),
            n,
            zn,
            ewt: DVector::zeros(n),
            acor: DVector::zeros(n),
            tempv: DVector::zeros(n),
            corzero: DVector::zeros(n),
            constraints: None,

            q: 1,
            qprime: 1,
            qwait: 2 + 1,
            l: [T::zero(); L_MAX],
            tau: [T::zero(); L_MAX + 1],
            tq: [T::zero(); NUM_TESTS + 1],
            h: T::zero(),
            hprime: T::zero(),
            eta: T::one(),
            hscale: T::zero(),
            tn: t0,
            tretlast: t0,
            acnrm: T::zero(),
            nlscoef: T::from(NLSCOEF_DEFAULT).unwrap(),
            phase: 0,
            nscon: 0,

            qmax,
            mxstep: MXSTEP_DEFAULT,
            mxhnil: MXHNIL_DEFAULT,
            maxcor: NLS_MAXCOR,
            maxnef: MXNEF,
            maxncf: MXNCF,
            sldeton: false,
            hmin: T::from(HMIN_DEFAULT).unwrap(),
            hmax_inv: T::from(HMAX_INV_DEFAULT).unwrap(),
            etamax: T::from(ETAMX1).unwrap(),

            nst: 0,
            ncfn: 0,
            netf: 0,
            nor: 0,
            nhnil: 0,

            qu: 0,
            h0u: T::zero(),
            hu: T::zero(),
            saved_tq5: T::zero(),
            indx_acor: qmax,
            tolsf: T::one(),
            hin: T::zero(),
            tstop: None,

            quad: None,
            sens: None,

            nls: NLS::new(n, NLS_MAXCOR),
            nls_sim: None,
            nls_stg: None,
            nls_stg1: None,

            nlp: NlsProblem::new(problem, ls, lmm, t0, y0),
        })
    }

    /// Re-initializes for a new problem of the same size, reusing every
    /// allocation. Counters, history and step data are reset; tolerances,
    /// limits and substate configuration are kept.
    pub fn re_init(&mut self, t0: T, y0: &DVector<T>) -> Result<(), Error> {
        if y0.len() != self.n {
            return Err(Error::IllegalInput {
                msg: format!("y0 length {} != problem size {}", y0.len(), self.n),
            });
        }

        for zn in self.zn.iter_mut() {
            zn.fill(T::zero());
        }
        self.zn[0].copy_from(y0);

        self.q = 1;
        self.qprime = 1;
        self.qwait = 2 + 1;
        self.l = [T::zero(); L_MAX];
        self.tau = [T::zero(); L_MAX + 1];
        self.tq = [T::zero(); NUM_TESTS + 1];
        self.h = T::zero();
        self.hprime = T::zero();
        self.eta = T::one();
        self.hscale = T::zero();
        self.tn = t0;
        self.tretlast = t0;
        self.acnrm = T::zero();
        self.phase = 0;
        self.nscon = 0;
        self.etamax = T::from(ETAMX1).unwrap();

        self.nst = 0;
        self.ncfn = 0;
        self.netf = 0;
        self.nor = 0;
        self.nhnil = 0;

        self.qu = 0;
        self.h0u = T::zero();
        self.hu = T::zero();
        self.saved_tq5 = T::zero();
        self.indx_acor = self.qmax;
        self.tolsf = T::one();

        self.nls = NLS::new(self.n, self.maxcor);
        self.nlp.re_init(t0, y0);

        if let Some(quad) = self.quad.as_mut() {
            quad.reset();
        }
        if let Some(sens) = self.sens.as_mut() {
            sens.reset();
        }
        if let Some(sens) = self.sens.as_ref() {
            let ns = sens.ns;
            if self.nls_sim.is_some() {
                self.nls_sim = Some(NLS::new((ns + 1) * self.n, self.maxcor));
            }
            if self.nls_stg.is_some() {
                self.nls_stg = Some(NLS::new(ns * self.n, self.maxcor));
            }
            if self.nls_stg1.is_some() {
                self.nls_stg1 = Some(NLS::new(self.n, self.maxcor));
            }
        }

        Ok(())
    }

    /// Replaces the tolerances.
    pub fn set_tolerances(&mut self, tol: TolControl<T>) {
        self.tol = tol;
    }

    /// Current internal time.
    pub fn t(&self) -> T {
        self.tn
    }

    /// Solution vector produced by the last driver return (interpolated to
    /// the returned time in NORMAL mode).
    pub fn y(&self) -> &DVector<T> {
        &self.nlp.y
    }

    /// Computes the k-th derivative of the interpolating polynomial at `t`,
    /// valid on `[tn - hu, tn]` where `hu` is the last successful step.
    ///
    /// `Dky(t, 0)` is the solution itself. `k` must not exceed the order
    /// last used.
    pub fn get_dky(&self, t: T, k: usize, dky: &mut DVector<T>) -> Result<(), Error> {
        if k > self.qu {
            return Err(Error::BadK { k, qu: self.qu });
        }
        if self.nst == 0 {
            // no step taken yet; only the initial value is available
            dky.copy_from(&self.zn[0]);
            return Ok(());
        }
        self.check_t(t)?;
        dky_eval(&self.zn, self.qu, k, t, self.tn, self.h, dky);
        Ok(())
    }

    /// Interpolation interval check with a roundoff fuzz of
    /// `100 * uround * (|tn| + |h|)`.
    fn check_t(&self, t: T) -> Result<(), Error> {
        let tfuzz = T::hundred() * self.uround * (self.tn.abs() + self.hu.abs()) * self.hu.signum();
        let tp = self.tn - self.hu - tfuzz;
        let tn1 = self.tn + tfuzz;
        if (t - tp) * self.hu < T::zero() || (t - tn1) * self.hu > T::zero() {
            return Err(Error::BadT {
                t: <f64 as num_traits::NumCast>::from(t).unwrap(),
                tstart: <f64 as num_traits::NumCast>::from(self.tn - self.hu).unwrap(),
                tend: <f64 as num_traits::NumCast>::from(self.tn).unwrap(),
            });
        }
        Ok(())
    }

    /// WRMS norm against the state error weights.
    pub(crate) fn wrms_norm(&self, x: &DVector<T>) -> T {
        x.norm_wrms(&self.ewt)
    }

    pub(crate) fn f64_of(x: T) -> f64 {
        <f64 as num_traits::NumCast>::from(x).unwrap()
    }
}

/// Horner evaluation of the k-th interpolant derivative from a Nordsieck
/// history: `dky = sum_{j=k..q} j!/(j-k)! s^(j-k) zn[j] / h^k`, `s=(t-tn)/h`.
pub(crate) fn dky_eval<T: VodeReal>(
    zn: &[DVector<T>],
    q: usize,
    k: usize,
    t: T,
    tn: T,
    h: T,
    dky: &mut DVector<T>,
) {
    let s = (t - tn) / h;
    for j in (k..=q).rev() {
        let mut c = T::one();
        for i in ((j - k + 1)..=j).rev() {
            c *= T::from(i).unwrap();
        }
        if j == q {
            dky.copy_from(&zn[q]);
            *dky *= c;
        } else {
            // dky = c*zn[j] + s*dky
            dky.axpy(c, &zn[j], s);
        }
    }
    if k == 0 {
        return;
    }
    let r = h.powi(-(k as i32));
    *dky *= r;
}
