//! Direct dense solver: LU factorization with partial (row) pivoting.

use nalgebra::{DMatrix, DVector, RealField};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{Error, LSolver, LSolverType};

/// Dense linear solver over a square iteration matrix.
///
/// `setup` overwrites the matrix with its LU factors and records the pivot
/// rows; `solve` applies the permutation and the two triangular solves.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct Dense {
    pivots: Vec<usize>,
}

impl Dense {
    /// Creates a dense solver for systems of dimension `n`.
    pub fn new(n: usize) -> Self {
        Dense { pivots: vec![0; n] }
    }
}

impl<T> LSolver<T> for Dense
where
    T: RealField + Copy,
{
    fn get_type(&self) -> LSolverType {
        LSolverType::Direct
    }

    fn setup(&mut self, mat_a: &mut DMatrix<T>) -> Result<(), Error> {
        lu_factor(mat_a, &mut self.pivots)
    }

    fn solve(
        &self,
        mat_a: &DMatrix<T>,
        x: &mut DVector<T>,
        b: &DVector<T>,
        _tol: T,
    ) -> Result<(), Error> {
        x.copy_from(b);
        lu_solve(mat_a, &self.pivots, x);
        Ok(())
    }
}

/// In-place LU factorization with partial pivoting, `P A = L U`.
///
/// On success the upper triangle of `a` (diagonal included) holds `U` and the
/// strict lower triangle holds the multipliers of the unit-diagonal `L`;
/// `pivots[k]` is the row swapped into position at elimination step `k`.
fn lu_factor<T>(a: &mut DMatrix<T>, pivots: &mut [usize]) -> Result<(), Error>
where
    T: RealField + Copy,
{
    let n = a.ncols();
    debug_assert_eq!(a.nrows(), n);
    debug_assert_eq!(pivots.len(), n);

    for k in 0..n {
        // pick the largest magnitude remaining in column k
        let mut p = k;
        for i in (k + 1)..n {
            if a[(i, k)].abs() > a[(p, k)].abs() {
                p = i;
            }
        }
        pivots[k] = p;

        if a[(p, k)] == T::zero() {
            return Err(Error::SingularMatrix { col: k + 1 });
        }

        if p != k {
            for j in 0..n {
                a.swap((k, j), (p, j));
            }
        }

        // store multipliers below the pivot
        let mult = a[(k, k)].recip();
        for i in (k + 1)..n {
            a[(i, k)] *= mult;
        }

        // eliminate column k from the trailing submatrix
        for j in (k + 1)..n {
            let a_kj = a[(k, j)];
            if a_kj != T::zero() {
                for i in (k + 1)..n {
                    let a_ik = a[(i, k)];
                    a[(i, j)] -= a_ik * a_kj;
                }
            }
        }
    }

    Ok(())
}

/// Solves `A x = b` from the factors produced by [`lu_factor`]. The
/// right-hand side is passed in `x` and overwritten with the solution.
fn lu_solve<T>(a: &DMatrix<T>, pivots: &[usize], x: &mut DVector<T>)
where
    T: RealField + Copy,
{
    let n = a.ncols();

    for (k, &p) in pivots.iter().enumerate().take(n) {
        if p != k {
            x.swap_rows(k, p);
        }
    }

    // forward substitution with the unit lower triangle
    for k in 0..n {
        let xk = x[k];
        for i in (k + 1)..n {
            x[i] -= a[(i, k)] * xk;
        }
    }

    // back substitution with the upper triangle
    for k in (0..n).rev() {
        x[k] /= a[(k, k)];
        let xk = x[k];
        for i in 0..k {
            x[i] -= a[(i, k)] * xk;
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    use super::*;

    #[test]
    fn factor_and_solve() {
        let mut a = dmatrix![
            5.0, 0.0, 0.0, 1.0;
            2.0, 2.0, 2.0, 1.0;
            4.0, 5.0, 5.0, 5.0;
            1.0, 6.0, 4.0, 5.0;
        ];
        let b = dvector![9.0, 16.0, 49.0, 45.0];
        let expected = dvector![1.0, 2.0, 3.0, 4.0];

        let mut dense = Dense::new(4);
        let mut x = DVector::zeros(4);
        dense.setup(&mut a).unwrap();
        dense.solve(&a, &mut x, &b, 0.0).unwrap();
        assert_relative_eq!(x, expected, max_relative = 1e-12);
    }

    #[test]
    fn pivoting_moves_small_pivots() {
        let mut a = dmatrix![
            1e-20, 1.0;
            1.0,   1.0;
        ];
        let b = dvector![1.0, 2.0];

        let mut dense = Dense::new(2);
        let mut x = DVector::zeros(2);
        dense.setup(&mut a).unwrap();
        dense.solve(&a, &mut x, &b, 0.0).unwrap();
        assert_relative_eq!(x, dvector![1.0, 1.0], max_relative = 1e-12);
    }

    #[test]
    fn singular_matrix_reports_column() {
        let mut a = dmatrix![
            1.0, 2.0;
            2.0, 4.0;
        ];
        let mut dense = Dense::new(2);
        match dense.setup(&mut a) {
            Err(Error::SingularMatrix { col }) => assert_eq!(col, 2),
            other => panic!("expected singular matrix, got {:?}", other),
        }
    }
}
