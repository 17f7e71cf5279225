//! Error-weight vector construction from the user tolerances.

use nalgebra::DVector;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::traits::VodeReal;

/// Tolerance specification for the state (and quadrature) variables.
///
/// The weight vector is loaded as `ewt[i] = 1 / (rtol*|y[i]| + atol_i)`; a
/// nonpositive component is reported to the caller, which treats it as a
/// hard error.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum TolControl<T> {
    /// Scalar relative and scalar absolute tolerances.
    SS { rtol: T, atol: T },
    /// Scalar relative and per-component absolute tolerances.
    SV { rtol: T, atol: DVector<T> },
}

impl<T> TolControl<T>
where
    T: VodeReal,
{
    pub fn new_ss(rtol: T, atol: T) -> Self {
        Self::SS { rtol, atol }
    }

    pub fn new_sv(rtol: T, atol: DVector<T>) -> Self {
        Self::SV { rtol, atol }
    }

    pub fn rtol(&self) -> T {
        match self {
            Self::SS { rtol, .. } | Self::SV { rtol, .. } => *rtol,
        }
    }

    /// Loads `ewt` from the current solution `ycur`. Returns `false` if any
    /// weight came out nonpositive.
    pub fn ewt_set(&self, ycur: &DVector<T>, ewt: &mut DVector<T>) -> bool {
        match self {
            Self::SS { rtol, atol } => {
                for (ewt, ycur) in ewt.iter_mut().zip(ycur.iter()) {
                    let w = *rtol * ycur.abs() + *atol;
                    if w <= T::zero() {
                        return false;
                    }
                    *ewt = w.recip();
                }
            }
            Self::SV { rtol, atol } => {
                for ((ewt, ycur), atol) in ewt.iter_mut().zip(ycur.iter()).zip(atol.iter()) {
                    let w = *rtol * ycur.abs() + *atol;
                    if w <= T::zero() {
                        return false;
                    }
                    *ewt = w.recip();
                }
            }
        }
        true
    }
}

/// Per-sensitivity absolute tolerances.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum SensAtol<T> {
    /// One scalar per sensitivity.
    Scalars(Vec<T>),
    /// One vector per sensitivity.
    Vectors(Vec<DVector<T>>),
}

/// Tolerance specification for the sensitivity variables.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct SensTolControl<T> {
    pub rtol: T,
    pub atol: SensAtol<T>,
}

impl<T> SensTolControl<T>
where
    T: VodeReal,
{
    /// Loads the weight vector for sensitivity `is` from its current value.
    pub fn ewt_set(&self, is: usize, yscur: &DVector<T>, ewt: &mut DVector<T>) -> bool {
        match &self.atol {
            SensAtol::Scalars(atol) => {
                for (ewt, ycur) in ewt.iter_mut().zip(yscur.iter()) {
                    let w = self.rtol * ycur.abs() + atol[is];
                    if w <= T::zero() {
                        return false;
                    }
                    *ewt = w.recip();
                }
            }
            SensAtol::Vectors(atol) => {
                for ((ewt, ycur), atol) in ewt.iter_mut().zip(yscur.iter()).zip(atol[is].iter()) {
                    let w = self.rtol * ycur.abs() + *atol;
                    if w <= T::zero() {
                        return false;
                    }
                    *ewt = w.recip();
                }
            }
        }
        true
    }

    /// Default tolerances estimated from the state tolerances and the scale
    /// of the parameter each sensitivity selects: `rtolS = rtol`,
    /// `atolS_j = atol / |pbar[which_j]|` with `which_j = |plist[j]| - 1`.
    pub fn estimated_from(tol: &TolControl<T>, pbar: &[T], plist: &[isize]) -> Self {
        let rtol = tol.rtol();
        let scale = |p: isize| -> T {
            let which = p.unsigned_abs() - 1;
            pbar[which].abs().max(T::epsilon())
        };
        match tol {
            TolControl::SS { atol, .. } => SensTolControl {
                rtol,
                atol: SensAtol::Scalars(plist.iter().map(|&p| *atol / scale(p)).collect()),
            },
            TolControl::SV { atol, .. } => SensTolControl {
                rtol,
                atol: SensAtol::Vectors(plist.iter().map(|&p| atol / scale(p)).collect()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn scalar_weights() {
        let tol = TolControl::new_ss(1e-3, 1e-6);
        let y = dvector![1.0, -2.0, 0.0];
        let mut ewt = DVector::zeros(3);
        assert!(tol.ewt_set(&y, &mut ewt));
        assert_eq!(ewt[0], 1.0 / (1e-3 + 1e-6));
        assert_eq!(ewt[1], 1.0 / (2e-3 + 1e-6));
        assert_eq!(ewt[2], 1.0 / 1e-6);
    }

    #[test]
    fn vector_weights_reject_zero_atol_at_zero_state() {
        let tol = TolControl::new_sv(1e-3, dvector![1e-6, 0.0]);
        let y = dvector![1.0, 0.0];
        let mut ewt = DVector::zeros(2);
        assert!(!tol.ewt_set(&y, &mut ewt));
    }

    #[test]
    fn estimated_sens_tolerances_scale_by_the_selected_parameter() {
        let tol = TolControl::new_ss(1e-4, 1e-8);
        // the first sensitivity selects parameter 1 (scale -0.5, magnitude
        // used), the second selects parameter 0 through a negative
        // (initial-condition only) entry
        let sens = SensTolControl::estimated_from(&tol, &[100.0, -0.5], &[2, -1]);
        match sens.atol {
            SensAtol::Scalars(ref atol) => {
                assert_eq!(atol[0], 2e-8);
                assert_eq!(atol[1], 1e-10);
            }
            _ => unreachable!(),
        }
        assert_eq!(sens.rtol, 1e-4);
    }
}
