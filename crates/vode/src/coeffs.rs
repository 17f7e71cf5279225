//! Multistep coefficient generation and history maintenance.
//!
//! Per step this produces the corrector polynomial coefficients
//! `l[0..=q]`, the leading-coefficient pair `rl1 = 1/l[1]`, `gamma = h*rl1`,
//! and the test quantities `tq[1..=5]` (error constants at orders q-1, q,
//! q+1, the corrector tolerance, and the order-raise constant), all from the
//! recent step-size history `tau`. It also owns the `zn[j] <- eta^j zn[j]`
//! rescaling applied when h changes, the exact inverse of the predictor
//! update used on failed steps, and the history adjustment for order
//! changes.

use nalgebra::DVector;

use crate::{
    constants::L_MAX,
    traits::{OdeProblem, VodeReal},
    Method, Vode,
};

impl<T, P, LS, NLS> Vode<T, P, LS, NLS>
where
    T: VodeReal,
    P: OdeProblem<T>,
    LS: linear::LSolver<T>,
    NLS: nonlinear::NLSolver<T>,
{
    /// Computes `l`, `tq` and the gamma family for the current (q, h).
    pub(crate) fn set_coefficients(&mut self) {
        match self.lmm {
            Method::Adams => self.set_adams(),
            Method::Bdf => self.set_bdf(),
        }

        self.nlp.rl1 = self.l[1].recip();
        let gamma = self.h * self.nlp.rl1;
        if self.nst == 0 {
            self.nlp.lp.gammap = gamma;
        }
        self.nlp.lp.gamma = gamma;
        self.nlp.lp.gamrat = if self.nst > 0 {
            gamma / self.nlp.lp.gammap
        } else {
            T::one()
        };
    }

    fn set_adams(&mut self) {
        if self.q == 1 {
            self.l[0] = T::one();
            self.l[1] = T::one();
            self.tq[1] = T::one();
            self.tq[5] = T::one();
            self.tq[2] = T::half();
            self.tq[3] = T::twelve().recip();
        } else {
            let mut m = [T::zero(); L_MAX];
            let hsum = self.adams_start(&mut m);

            let m0 = alt_sum(self.q - 1, &m, 1);
            let m1 = alt_sum(self.q - 1, &m, 2);

            self.adams_finish(&mut m, m0, m1, hsum);
        }
        self.tq[4] = self.nlscoef / self.tq[2];
    }

    /// Generates in `m` the coefficients of the product polynomial needed
    /// for the Adams `l` and `tq` values, returning the accumulated step
    /// sum.
    fn adams_start(&mut self, m: &mut [T; L_MAX]) -> T {
        let mut hsum = self.h;
        m[0] = T::one();
        for mi in m.iter_mut().take(self.q + 1).skip(1) {
            *mi = T::zero();
        }
        for j in 1..self.q {
            if j == self.q - 1 && self.qwait == 1 {
                // error estimate at order q-1
                let sum = alt_sum(self.q - 2, m, 2);
                self.tq[1] = T::from(self.q).unwrap() * sum / m[self.q - 2];
            }
            let xi_inv = self.h / hsum;
            for i in (1..=j).rev() {
                m[i] += m[i - 1] * xi_inv;
            }
            hsum += self.tau[j];
            // m now holds the coefficients of product_{1..j}(1 + x/xi_i)
        }
        hsum
    }

    fn adams_finish(&mut self, m: &mut [T; L_MAX], m0: T, m1: T, hsum: T) {
        let m0_inv = m0.recip();

        self.l[0] = T::one();
        for i in 1..=self.q {
            self.l[i] = m0_inv * (m[i - 1] / T::from(i).unwrap());
        }
        let xi = hsum / self.h;
        let xi_inv = xi.recip();

        self.tq[2] = m1 * m0_inv / xi;
        self.tq[5] = xi / self.l[self.q];

        if self.qwait == 1 {
            // error estimate at order q+1
            for i in (1..=self.q).rev() {
                m[i] += m[i - 1] * xi_inv;
            }
            let m2 = alt_sum(self.q, m, 2);
            self.tq[3] = m2 * m0_inv / T::from(self.q + 1).unwrap();
        }
    }

    fn set_bdf(&mut self) {
        self.l[0] = T::one();
        self.l[1] = T::one();
        let mut xi_inv = T::one();
        let mut xistar_inv = T::one();
        for i in 2..=self.q {
            self.l[i] = T::zero();
        }
        let mut alpha0 = -T::one();
        let mut alpha0_hat = -T::one();
        let mut hsum = self.h;

        if self.q > 1 {
            for j in 2..self.q {
                hsum += self.tau[j - 1];
                xi_inv = self.h / hsum;
                alpha0 -= T::from(j).unwrap().recip();
                for i in (1..=j).rev() {
                    self.l[i] += self.l[i - 1] * xi_inv;
                }
                // l now holds the coefficients of product_{1..j}(1 + x/xi_i)
            }

            // the fixed-leading-coefficient term at j = q
            alpha0 -= T::from(self.q).unwrap().recip();
            xistar_inv = -self.l[1] - alpha0;
            hsum += self.tau[self.q - 1];
            xi_inv = self.h / hsum;
            alpha0_hat = -self.l[1] - xi_inv;
            for i in (1..=self.q).rev() {
                self.l[i] += self.l[i - 1] * xistar_inv;
            }
        }

        self.set_tq_bdf(hsum, alpha0, alpha0_hat, xi_inv, xistar_inv);
    }

    fn set_tq_bdf(&mut self, hsum: T, alpha0: T, alpha0_hat: T, xi_inv: T, xistar_inv: T) {
        let a1 = T::one() - alpha0_hat + alpha0;
        let a2 = T::one() + T::from(self.q).unwrap() * a1;

        self.tq[2] = (a1 / (alpha0 * a2)).abs();
        self.tq[5] = (a2 * xistar_inv / (self.l[self.q] * xi_inv)).abs();

        if self.qwait == 1 {
            if self.q > 1 {
                let c = xistar_inv / self.l[self.q];
                let a3 = alpha0 + T::from(self.q).unwrap().recip();
                let a4 = alpha0_hat + xi_inv;
                let cpinv = (T::one() - a4 + a3) / a3;
                self.tq[1] = (c * cpinv).abs();
            } else {
                self.tq[1] = T::one();
            }

            let hsum = hsum + self.tau[self.q];
            let xi_inv = self.h / hsum;
            let a5 = alpha0 - T::from(self.q + 1).unwrap().recip();
            let a6 = alpha0_hat - xi_inv;
            let cppinv = (T::one() - a6 + a5) / a2;
            self.tq[3] = (cppinv / (xi_inv * T::from(self.q + 2).unwrap() * a5)).abs();
        }

        self.tq[4] = self.nlscoef / self.tq[2];
    }

    /// `zn[dst] += a * zn[dst+1]` across every history array.
    pub(crate) fn pascal_row(&mut self, j: usize, a: T) {
        {
            let (lo, hi) = self.zn.split_at_mut(j);
            lo[j - 1].axpy(a, &hi[0], T::one());
        }
        if let Some(qd) = self.quad.as_mut() {
            let (lo, hi) = qd.znq.split_at_mut(j);
            lo[j - 1].axpy(a, &hi[0], T::one());
        }
        if let Some(sd) = self.sens.as_mut() {
            let (lo, hi) = sd.zns.split_at_mut(j);
            for (dst, src) in lo[j - 1].iter_mut().zip(hi[0].iter()) {
                dst.axpy(a, src, T::one());
            }
        }
    }

    /// Multiplies history row `j` by `factor` across every history array.
    pub(crate) fn scale_row(&mut self, j: usize, factor: T) {
        self.zn[j] *= factor;
        if let Some(qd) = self.quad.as_mut() {
            qd.znq[j] *= factor;
        }
        if let Some(sd) = self.sens.as_mut() {
            for zs in sd.zns[j].iter_mut() {
                *zs *= factor;
            }
        }
    }

    /// Applies `zn[j] <- eta^j zn[j]` and commits `h <- hscale * eta`.
    /// Always called on a restored (un-predicted) history.
    pub(crate) fn rescale(&mut self) {
        let mut factor = self.eta;
        for j in 1..=self.q {
            self.scale_row(j, factor);
            factor *= self.eta;
        }
        self.h = self.hscale * self.eta;
        self.hprime = self.h;
        self.hscale = self.h;
        self.nscon = 0;
    }

    /// Undoes the predictor update and the advance of `tn`, returning the
    /// history to its pre-step values.
    pub(crate) fn restore(&mut self, saved_t: T) {
        self.tn = saved_t;
        self.nlp.tn = saved_t;
        for k in 1..=self.q {
            for j in (k..=self.q).rev() {
                self.pascal_row(j, -T::one());
            }
        }
    }

    /// Adjusts the history arrays for an order change of `deltaq` (+1/-1),
    /// at the old order `q` and old step `hscale`.
    pub(crate) fn adjust_order(&mut self, deltaq: isize) {
        if deltaq == 0 {
            return;
        }
        match self.lmm {
            Method::Adams => self.adjust_adams(deltaq),
            Method::Bdf => {
                if deltaq > 0 {
                    self.increase_bdf();
                } else {
                    self.decrease_bdf();
                }
            }
        }
    }

    fn adjust_adams(&mut self, deltaq: isize) {
        if deltaq > 0 {
            // a new history row starts from zero
            let lnew = self.q + 1;
            self.zn[lnew].fill(T::zero());
            if let Some(qd) = self.quad.as_mut() {
                qd.znq[lnew].fill(T::zero());
            }
            if let Some(sd) = self.sens.as_mut() {
                for zs in sd.zns[lnew].iter_mut() {
                    zs.fill(T::zero());
                }
            }
            return;
        }

        // On a decrease each zn[j] is adjusted by a multiple of zn[q]. The
        // coefficients are those of x*product_{1..q-2}(x + xi_i), with
        // xi_i = (t_n - t_(n-i)) / hscale.
        for li in self.l.iter_mut() {
            *li = T::zero();
        }
        self.l[1] = T::one();
        let mut hsum = T::zero();
        for j in 1..=self.q.saturating_sub(2) {
            hsum += self.tau[j];
            let xi = hsum / self.hscale;
            for i in (1..=j + 1).rev() {
                self.l[i] = self.l[i] * xi + self.l[i - 1];
            }
        }
        for j in 1..=self.q.saturating_sub(2) {
            self.l[j + 1] = T::from(self.q).unwrap() * (self.l[j] / T::from(j + 1).unwrap());
        }
        for j in 2..self.q {
            let lj = -self.l[j];
            Self::row_axpy_from(&mut self.zn, j, self.q, lj);
            if let Some(qd) = self.quad.as_mut() {
                Self::row_axpy_from(&mut qd.znq, j, self.q, lj);
            }
            if let Some(sd) = self.sens.as_mut() {
                Self::rows_axpy_from(&mut sd.zns, j, self.q, lj);
            }
        }
    }

    fn increase_bdf(&mut self) {
        for li in self.l.iter_mut() {
            *li = T::zero();
        }
        self.l[2] = T::one();
        let mut alpha1 = T::one();
        let mut prod = T::one();
        let mut xiold = T::one();
        let mut alpha0 = -T::one();
        let mut hsum = self.hscale;

        if self.q > 1 {
            for j in 1..self.q {
                hsum += self.tau[j + 1];
                let xi = hsum / self.hscale;
                prod *= xi;
                alpha0 -= T::from(j + 1).unwrap().recip();
                alpha1 += xi.recip();
                for i in (2..=j + 2).rev() {
                    self.l[i] = self.l[i] * xiold + self.l[i - 1];
                }
                xiold = xi;
            }
        }

        let a1 = (-alpha0 - alpha1) / prod;
        let lnew = self.q + 1;

        // the new history row is built from the saved correction column
        Self::row_load_scaled(&mut self.zn, lnew, self.indx_acor, a1);
        if let Some(qd) = self.quad.as_mut() {
            Self::row_load_scaled(&mut qd.znq, lnew, self.indx_acor, a1);
        }
        if let Some(sd) = self.sens.as_mut() {
            for is in 0..sd.zns[0].len() {
                if lnew == self.indx_acor {
                    sd.zns[lnew][is] *= a1;
                } else {
                    let (lo, hi) = sd.zns.split_at_mut(self.indx_acor);
                    lo[lnew][is].copy_from(&hi[0][is]);
                    lo[lnew][is] *= a1;
                }
            }
        }

        for j in 2..=self.q {
            let lj = self.l[j];
            Self::row_axpy_from(&mut self.zn, j, lnew, lj);
            if let Some(qd) = self.quad.as_mut() {
                Self::row_axpy_from(&mut qd.znq, j, lnew, lj);
            }
            if let Some(sd) = self.sens.as_mut() {
                Self::rows_axpy_from(&mut sd.zns, j, lnew, lj);
            }
        }
    }

    fn decrease_bdf(&mut self) {
        for li in self.l.iter_mut() {
            *li = T::zero();
        }
        self.l[2] = T::one();
        let mut hsum = T::zero();
        for j in 1..=self.q.saturating_sub(2) {
            hsum += self.tau[j];
            let xi = hsum / self.hscale;
            for i in (2..=j + 2).rev() {
                self.l[i] = self.l[i] * xi + self.l[i - 1];
            }
        }
        for j in 2..self.q {
            let lj = -self.l[j];
            Self::row_axpy_from(&mut self.zn, j, self.q, lj);
            if let Some(qd) = self.quad.as_mut() {
                Self::row_axpy_from(&mut qd.znq, j, self.q, lj);
            }
            if let Some(sd) = self.sens.as_mut() {
                Self::rows_axpy_from(&mut sd.zns, j, self.q, lj);
            }
        }
    }

    /// `rows[dst] += a * rows[src]` with `dst < src`.
    fn row_axpy_from(rows: &mut [DVector<T>], dst: usize, src: usize, a: T) {
        let (lo, hi) = rows.split_at_mut(src);
        lo[dst].axpy(a, &hi[0], T::one());
    }

    /// Sensitivity variant of [`Self::row_axpy_from`].
    fn rows_axpy_from(rows: &mut [Vec<DVector<T>>], dst: usize, src: usize, a: T) {
        let (lo, hi) = rows.split_at_mut(src);
        for (d, s) in lo[dst].iter_mut().zip(hi[0].iter()) {
            d.axpy(a, s, T::one());
        }
    }

    /// `rows[dst] = a * rows[src]`, tolerating `dst == src`.
    fn row_load_scaled(rows: &mut [DVector<T>], dst: usize, src: usize, a: T) {
        if dst == src {
            rows[dst] *= a;
        } else {
            debug_assert!(dst < src);
            let (lo, hi) = rows.split_at_mut(src);
            lo[dst].copy_from(&hi[0]);
            lo[dst] *= a;
        }
    }
}

/// Alternating sum `sum_{i=0..=iend} (-1)^i a[i] / (i + k)`.
fn alt_sum<T: VodeReal>(iend: usize, a: &[T], k: usize) -> T {
    let mut sum = T::zero();
    let mut sign = T::one();
    for (i, ai) in a.iter().enumerate().take(iend + 1) {
        sum += sign * *ai / T::from(i + k).unwrap();
        sign = -sign;
    }
    sum
}
