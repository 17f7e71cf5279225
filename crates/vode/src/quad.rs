//! Quadrature integration: extra states `yQ' = f_Q(t, y)` advanced
//! explicitly from the accepted solution. Quadratures never enter the
//! nonlinear system; with full error control their norm joins the local
//! error test.

use nalgebra::DVector;

use crate::{
    dky_eval,
    traits::{OdeProblem, VodeReal},
    Error, ErrorControl, TolControl, Vode,
};

/// Quadrature substate; exists only after `quad_init`.
#[derive(Debug)]
pub struct QuadData<T>
where
    T: VodeReal,
{
    /// Nordsieck history of the quadrature variables
    pub(crate) znq: Vec<DVector<T>>,
    pub(crate) ewtq: DVector<T>,
    pub(crate) acorq: DVector<T>,
    pub(crate) yq: DVector<T>,
    pub(crate) errconq: ErrorControl,
    pub(crate) tol: Option<TolControl<T>>,
    /// quadrature rhs evaluations
    pub(crate) nfqe: usize,
    /// error test failures charged to the quadratures
    pub(crate) netfq: usize,
    pub(crate) nq: usize,
}

impl<T: VodeReal> QuadData<T> {
    pub(crate) fn new(qmax: usize, yq0: &DVector<T>) -> Self {
        let nq = yq0.len();
        let mut znq: Vec<DVector<T>> = (0..=qmax).map(|_| DVector::zeros(nq)).collect();
        znq[0].copy_from(yq0);
        QuadData {
            znq,
            ewtq: DVector::zeros(nq),
            acorq: DVector::zeros(nq),
            yq: yq0.clone_owned(),
            errconq: ErrorControl::Partial,
            tol: None,
            nfqe: 0,
            netfq: 0,
            nq,
        }
    }

    pub(crate) fn reset(&mut self) {
        for zn in self.znq.iter_mut() {
            zn.fill(T::zero());
        }
        self.nfqe = 0;
        self.netfq = 0;
    }
}

impl<T, P, LS, NLS> Vode<T, P, LS, NLS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
    NLS: nonlinear::NLSolver<T>,
{
    /// Attaches quadrature integration with initial values `yq0`, evaluated
    /// through [`crate::QuadRhs::quad_rhs`]. Must be called before the
    /// first step.
    pub fn quad_init(&mut self, yq0: &DVector<T>) -> Result<(), Error> {
        if self.nst > 0 {
            return Err(Error::IllegalInput {
                msg: "quad_init must precede the first step".into(),
            });
        }
        if yq0.is_empty() {
            return Err(Error::IllegalInput {
                msg: "yq0 has zero length".into(),
            });
        }
        self.quad = Some(QuadData::new(self.qmax, yq0));
        Ok(())
    }

    /// Re-initializes the quadrature substate for the same quadrature size.
    pub fn quad_re_init(&mut self, yq0: &DVector<T>) -> Result<(), Error> {
        let quad = self.quad.as_mut().ok_or(Error::NoQuad)?;
        if yq0.len() != quad.nq {
            return Err(Error::IllegalInput {
                msg: format!("yq0 length {} != quadrature size {}", yq0.len(), quad.nq),
            });
        }
        quad.reset();
        quad.znq[0].copy_from(yq0);
        quad.yq.copy_from(yq0);
        Ok(())
    }

    /// Selects quadrature error control. `Full` requires tolerances.
    pub fn set_quad_err_con(
        &mut self,
        errconq: ErrorControl,
        tol: Option<TolControl<T>>,
    ) -> Result<(), Error> {
        let quad = self.quad.as_mut().ok_or(Error::NoQuad)?;
        if errconq == ErrorControl::Full && tol.is_none() {
            return Err(Error::IllegalInput {
                msg: "full quadrature error control requires tolerances".into(),
            });
        }
        quad.errconq = errconq;
        quad.tol = tol;
        Ok(())
    }

    /// Quadrature values at the last driver return.
    pub fn yq(&self) -> Result<&DVector<T>, Error> {
        self.quad.as_ref().map(|q| &q.yq).ok_or(Error::NoQuad)
    }

    /// Dense output for the quadrature variables, by analogy with
    /// [`Vode::get_dky`].
    pub fn get_quad_dky(&self, t: T, k: usize, dky: &mut DVector<T>) -> Result<(), Error> {
        let quad = self.quad.as_ref().ok_or(Error::NoQuad)?;
        if k > self.qu {
            return Err(Error::BadK { k, qu: self.qu });
        }
        if self.nst == 0 {
            dky.copy_from(&quad.znq[0]);
            return Ok(());
        }
        self.check_t(t)?;
        dky_eval(&quad.znq, self.qu, k, t, self.tn, self.h, dky);
        Ok(())
    }

    /// Evaluates the quadrature correction at the accepted state:
    /// `acorQ = rl1*(h*f_Q(tn, y) - znQ[1])`, `yQ = znQ[0] + acorQ`.
    ///
    /// Returns the callback outcome untouched for the failure handler.
    pub(crate) fn quad_correct(&mut self) -> Result<(), crate::traits::CallbackError> {
        let quad = self.quad.as_mut().expect("quadrature substate present");
        self.nlp
            .lp
            .problem
            .quad_rhs(self.tn, &self.nlp.y, &mut quad.acorq)?;
        quad.nfqe += 1;

        let h = self.h;
        let rl1 = self.nlp.rl1;
        for i in 0..quad.nq {
            quad.acorq[i] = rl1 * (h * quad.acorq[i] - quad.znq[1][i]);
            quad.yq[i] = quad.znq[0][i] + quad.acorq[i];
        }
        Ok(())
    }
}
