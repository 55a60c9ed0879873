//! In-place dense factorizations on column-major slices.
//!
//! Element blocks live in a shared arena, so the factorizations here operate on views of
//! borrowed storage instead of owning their matrices like `nalgebra::linalg::LU` does. The
//! elimination steps and triangular solves are nalgebra's, only the pivot checks are our own.
use crate::Real;
use nalgebra::linalg::{gauss_step, gauss_step_swap};
use nalgebra::{DMatrixView, DMatrixViewMut};

fn max_abs<T: Real>(a: &[T]) -> T {
    a.iter().fold(T::zero(), |max, x| max.max(x.abs()))
}

/// LU factorization with partial pivoting of the `n x n` column-major matrix `a`.
///
/// On success, `a` holds the unit lower triangular factor below the diagonal and the upper
/// triangular factor on and above it, and `pivots[k]` is the row swapped with row `k` at step `k`.
/// On failure, returns the step at which the largest remaining pivot was not larger than
/// `tolerance` times the largest entry of the input.
pub(crate) fn lu_factor_in_place<T: Real>(
    a: &mut [T],
    n: usize,
    pivots: &mut [usize],
    tolerance: T,
) -> Result<(), usize> {
    assert_eq!(a.len(), n * n);
    assert_eq!(pivots.len(), n);
    let threshold = tolerance * max_abs(a);
    let mut matrix = DMatrixViewMut::from_slice(a, n, n);

    for k in 0..n {
        let (p, pivot_abs) = (k..n)
            .map(|i| (i, matrix[(i, k)].abs()))
            .fold((k, -T::one()), |(p, max), (i, x)| if x > max { (i, x) } else { (p, max) });
        if pivot_abs <= threshold {
            return Err(k);
        }
        pivots[k] = p;
        let diag = matrix[(p, k)];
        if p != k {
            matrix.columns_range_mut(..k).swap_rows(k, p);
            gauss_step_swap(&mut matrix, diag, k, p);
        } else {
            gauss_step(&mut matrix, diag, k);
        }
    }
    Ok(())
}

/// Solves `A X = B` in place for the `n x ncols` column-major `rhs`, given the output of
/// [`lu_factor_in_place`].
pub(crate) fn lu_solve_in_place<T: Real>(lu: &[T], n: usize, pivots: &[usize], rhs: &mut [T]) {
    assert_eq!(lu.len(), n * n);
    assert_eq!(pivots.len(), n);
    if n == 0 {
        return;
    }
    assert_eq!(rhs.len() % n, 0);

    let lu = DMatrixView::from_slice(lu, n, n);
    let ncols = rhs.len() / n;
    let mut b = DMatrixViewMut::from_slice(rhs, n, ncols);
    for (k, &p) in pivots.iter().enumerate() {
        if p != k {
            b.swap_rows(k, p);
        }
    }
    let solved = lu.solve_lower_triangular_with_diag_mut(&mut b, T::one()) && lu.solve_upper_triangular_mut(&mut b);
    debug_assert!(solved, "LU factors have a zero pivot");
}

/// Cholesky factorization `A = L L^T` of the symmetric `n x n` column-major matrix `a`.
///
/// Only the lower triangle of `a` is read, and `L` overwrites it. On failure, returns the column
/// at which the remaining diagonal was not larger than `tolerance` times the largest entry of
/// the input, which happens for singular and indefinite matrices alike.
pub(crate) fn cholesky_factor_in_place<T: Real>(a: &mut [T], n: usize, tolerance: T) -> Result<(), usize> {
    assert_eq!(a.len(), n * n);
    let threshold = tolerance * max_abs(a);
    let mut matrix = DMatrixViewMut::from_slice(a, n, n);

    for j in 0..n {
        // Columns 0 .. j already hold L
        let (left, mut right) = matrix.columns_range_pair_mut(0..j, j..);
        let l_j = left.row(j).transpose();
        let d = right[(j, 0)] - l_j.dot(&l_j);
        if d <= threshold {
            return Err(j);
        }
        let l_jj = d.sqrt();

        let mut column = right.column_mut(0);
        column[j] = l_jj;
        let mut below = column.rows_range_mut(j + 1..);
        below.gemv(-T::one(), &left.rows_range(j + 1..), &l_j, T::one());
        below *= T::one() / l_jj;
    }
    Ok(())
}

/// Solves `A X = B` in place for the `n x ncols` column-major `rhs`, given the output of
/// [`cholesky_factor_in_place`].
pub(crate) fn cholesky_solve_in_place<T: Real>(l: &[T], n: usize, rhs: &mut [T]) {
    assert_eq!(l.len(), n * n);
    if n == 0 {
        return;
    }
    assert_eq!(rhs.len() % n, 0);

    let l = DMatrixView::from_slice(l, n, n);
    let ncols = rhs.len() / n;
    let mut b = DMatrixViewMut::from_slice(rhs, n, ncols);
    let solved = l.solve_lower_triangular_mut(&mut b) && l.tr_solve_lower_triangular_mut(&mut b);
    debug_assert!(solved, "Cholesky factor has a zero diagonal");
}
