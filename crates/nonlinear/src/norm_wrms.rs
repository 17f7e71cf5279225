//! Weighted root-mean-square norm.

use nalgebra::{DVector, RealField};
use num_traits::NumCast;

/// `||v||_wrms = sqrt( (1/N) * sum_i (v_i * w_i)^2 )`
pub trait NormWRMS<T> {
    fn norm_wrms(&self, w: &Self) -> T;
}

impl<T> NormWRMS<T> for DVector<T>
where
    T: RealField + NumCast + Copy,
{
    fn norm_wrms(&self, w: &Self) -> T {
        let n = T::from(self.len()).unwrap();
        let sum = self
            .iter()
            .zip(w.iter())
            .fold(T::zero(), |acc, (&v, &w)| acc + (v * w) * (v * w));
        (sum / n).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_vector() {
        let x = DVector::from_element(32, -0.5);
        let w = DVector::from_element(32, 0.5);
        assert_eq!(x.norm_wrms(&w), 0.25);
    }

    #[test]
    fn single_entry() {
        let x = DVector::from_vec(vec![3.0]);
        let w = DVector::from_vec(vec![2.0]);
        assert_eq!(x.norm_wrms(&w), 6.0);
    }
}
