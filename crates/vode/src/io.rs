//! Optional inputs and outputs: typed setters replacing slot arrays, and a
//! statistics snapshot assembling every counter the integrator maintains.

use nalgebra::DVector;
use nonlinear::NLSolver;

use crate::{
    sens::SensCounters1,
    traits::{OdeProblem, VodeReal},
    Error, Method, Vode,
};

/// Cumulative counters and step diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorStats<T> {
    /// internal steps taken
    pub nst: usize,
    /// rhs evaluations
    pub nfe: usize,
    /// linear setup calls
    pub nsetups: usize,
    /// Jacobian evaluations
    pub nje: usize,
    /// corrector iterations
    pub nni: usize,
    /// corrector convergence failures
    pub ncfn: usize,
    /// error test failures
    pub netf: usize,
    /// order reductions forced by the stability-limit hook
    pub nor: usize,
    /// order used on the last step
    pub qu: usize,
    /// order to be used on the next step
    pub qcur: usize,
    /// actual initial step size
    pub h0u: T,
    /// step size on the last step
    pub hu: T,
    /// step size for the next step
    pub hcur: T,
    /// current internal time
    pub tcur: T,
    /// suggested tolerance scale factor
    pub tolsf: T,
    /// scalar workspace elements held (diagnostic analogue of lenrw)
    pub lenrw: usize,
    /// integer workspace elements held (diagnostic analogue of leniw)
    pub leniw: usize,
    pub quad: Option<QuadStats>,
    pub sens: Option<SensStats>,
}

/// Quadrature counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadStats {
    /// quadrature rhs evaluations
    pub nfqe: usize,
    /// error test failures charged to the quadratures
    pub netfq: usize,
}

/// Sensitivity counters.
#[derive(Debug, Clone, PartialEq)]
pub struct SensStats {
    /// sensitivity rhs evaluations
    pub nfse: usize,
    /// state rhs evaluations made on behalf of the sensitivities
    pub nfes: usize,
    /// corrector iterations in sensitivity solves
    pub nnis: usize,
    /// sensitivity corrector convergence failures
    pub ncfns: usize,
    /// error test failures charged to the sensitivities
    pub netfs: usize,
    /// per-sensitivity counters (STAGGERED1 only)
    pub stgr1: Option<Vec<SensStats1>>,
}

/// Per-sensitivity record reported for the STAGGERED1 strategy.
pub type SensStats1 = SensCounters1;

impl<T, P, LS, NLS> Vode<T, P, LS, NLS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
    NLS: NLSolver<T>,
{
    pub fn stats(&self) -> IntegratorStats<T> {
        let nni_sim = self.nls_sim.as_ref().map_or(0, |s| s.get_num_iters());
        let nni_stg = self.nls_stg.as_ref().map_or(0, |s| s.get_num_iters());
        let nni_stg1 = self.nls_stg1.as_ref().map_or(0, |s| s.get_num_iters());

        let n = self.zn[0].len();
        let nq = self.quad.as_ref().map_or(0, |q| q.nq);
        let ns = self.sens.as_ref().map_or(0, |s| s.ns);
        // history + weights + work vectors + iteration matrix pair
        let lenrw = (self.qmax + 1) * n * (1 + ns)
            + (self.qmax + 1) * nq
            + 4 * n
            + (1 + ns) * n
            + 2 * n * n;
        let leniw = n;

        IntegratorStats {
            nst: self.nst,
            nfe: self.nlp.nfe,
            nsetups: self.nlp.lp.nsetups,
            nje: self.nlp.lp.nje,
            nni: self.nls.get_num_iters() + nni_sim,
            ncfn: self.ncfn,
            netf: self.netf,
            nor: self.nor,
            qu: self.qu,
            qcur: self.qprime,
            h0u: self.h0u,
            hu: self.hu,
            hcur: self.hprime,
            tcur: self.tn,
            tolsf: self.tolsf,
            lenrw,
            leniw,
            quad: self.quad.as_ref().map(|q| QuadStats {
                nfqe: q.nfqe,
                netfq: q.netfq,
            }),
            sens: self.sens.as_ref().map(|s| {
                let sw = self.nlp.sens.as_ref().expect("sensitivity work present");
                SensStats {
                    nfse: sw.nfse,
                    nfes: sw.nfes,
                    nnis: nni_sim + nni_stg + nni_stg1,
                    ncfns: s.ncfns,
                    netfs: s.netfs,
                    stgr1: s.stgr1.clone(),
                }
            }),
        }
    }

    /// Caps the method order. The order may be lowered at any time but can
    /// never grow past the family maximum fixed at construction.
    pub fn set_max_order(&mut self, maxord: usize) -> Result<(), Error> {
        if maxord == 0 || maxord > self.lmm.q_max() {
            return Err(Error::IllegalInput {
                msg: format!("maxord must be in [1, {}]", self.lmm.q_max()),
            });
        }
        if maxord > self.qmax {
            return Err(Error::IllegalInput {
                msg: "maxord may never grow".into(),
            });
        }
        if self.nst > 0 && maxord < self.q {
            return Err(Error::IllegalInput {
                msg: "maxord is below the order currently in use".into(),
            });
        }
        self.qmax = maxord;
        self.qprime = self.qprime.min(self.qmax);
        Ok(())
    }

    /// Maximum internal steps per driver call (default 500).
    pub fn set_max_num_steps(&mut self, mxstep: usize) {
        self.mxstep = if mxstep == 0 {
            crate::constants::MXSTEP_DEFAULT
        } else {
            mxstep
        };
    }

    /// Cap on `t + h == t` warnings; negative disables them.
    pub fn set_max_hnil_warns(&mut self, mxhnil: i32) {
        self.mxhnil = mxhnil;
    }

    /// Step size to attempt on the first step (0 = choose automatically).
    pub fn set_init_step(&mut self, hin: T) {
        self.hin = hin;
    }

    pub fn set_min_step(&mut self, hmin: T) -> Result<(), Error> {
        if hmin < T::zero() {
            return Err(Error::IllegalInput {
                msg: "hmin must be nonnegative".into(),
            });
        }
        if hmin * self.hmax_inv > T::one() {
            return Err(Error::IllegalInput {
                msg: "hmin exceeds hmax".into(),
            });
        }
        self.hmin = hmin;
        Ok(())
    }

    pub fn set_max_step(&mut self, hmax: T) -> Result<(), Error> {
        if hmax <= T::zero() {
            return Err(Error::IllegalInput {
                msg: "hmax must be positive".into(),
            });
        }
        let hmax_inv = hmax.recip();
        if self.hmin * hmax_inv > T::one() {
            return Err(Error::IllegalInput {
                msg: "hmax is below hmin".into(),
            });
        }
        self.hmax_inv = hmax_inv;
        Ok(())
    }

    /// Time past which the integration must not step. Cleared automatically
    /// when reached.
    pub fn set_stop_time(&mut self, tstop: T) -> Result<(), Error> {
        if self.nst > 0 && (tstop - self.tn) * self.h <= T::zero() {
            return Err(Error::BadTstop {
                tstop: Self::f64_of(tstop),
                t: Self::f64_of(self.tn),
            });
        }
        self.tstop = Some(tstop);
        Ok(())
    }

    pub fn clear_stop_time(&mut self) {
        self.tstop = None;
    }

    /// Enables the stability-limit-detection hook (BDF only). The hook
    /// maintains its counters; the detection algorithm itself is a separate
    /// component.
    pub fn set_stab_lim_det(&mut self, enable: bool) -> Result<(), Error> {
        if enable && self.lmm != Method::Bdf {
            return Err(Error::IllegalInput {
                msg: "stability limit detection applies to BDF only".into(),
            });
        }
        self.sldeton = enable;
        Ok(())
    }

    /// Maximum error test failures per step attempt (default 7).
    pub fn set_max_err_test_fails(&mut self, maxnef: usize) {
        self.maxnef = if maxnef == 0 {
            crate::constants::MXNEF
        } else {
            maxnef
        };
    }

    /// Maximum corrector convergence failures per step attempt (default 10).
    pub fn set_max_conv_fails(&mut self, maxncf: usize) {
        self.maxncf = if maxncf == 0 {
            crate::constants::MXNCF
        } else {
            maxncf
        };
    }

    /// Maximum corrector iterations per solve attempt (default 3).
    pub fn set_max_nonlin_iters(&mut self, maxcor: usize) -> Result<(), Error> {
        if maxcor == 0 {
            return Err(Error::IllegalInput {
                msg: "maxcor must be positive".into(),
            });
        }
        self.maxcor = maxcor;
        let n = self.zn[0].len();
        self.nls = NLS::new(n, maxcor);
        if let Some(sens) = self.sens.as_ref() {
            let ns = sens.ns;
            if self.nls_sim.is_some() {
                self.nls_sim = Some(NLS::new((ns + 1) * n, maxcor));
            }
            if self.nls_stg.is_some() {
                self.nls_stg = Some(NLS::new(ns * n, maxcor));
            }
            if self.nls_stg1.is_some() {
                self.nls_stg1 = Some(NLS::new(n, maxcor));
            }
        }
        Ok(())
    }

    /// Safety coefficient in the corrector convergence test (default 0.1).
    pub fn set_nonlin_conv_coef(&mut self, nlscoef: T) -> Result<(), Error> {
        if nlscoef <= T::zero() {
            return Err(Error::IllegalInput {
                msg: "the convergence coefficient must be positive".into(),
            });
        }
        self.nlscoef = nlscoef;
        Ok(())
    }

    /// Componentwise inequality constraints on the solution: 0 = none,
    /// +-1 = sign, +-2 = strict sign. `None` removes constraint checking.
    pub fn set_constraints(&mut self, constraints: Option<DVector<T>>) -> Result<(), Error> {
        if let Some(c) = &constraints {
            if c.len() != self.zn[0].len() {
                return Err(Error::IllegalInput {
                    msg: "constraints length mismatch".into(),
                });
            }
            let legal = |v: T| {
                v == T::zero()
                    || v.abs() == T::one()
                    || v.abs() == T::two()
            };
            if !c.iter().all(|&v| legal(v)) {
                return Err(Error::IllegalInput {
                    msg: "constraint entries must be 0, +-1 or +-2".into(),
                });
            }
        }
        self.constraints = constraints;
        Ok(())
    }
}
