// sequest_core/src/linalg.rs

//! Numeric kernel: Cholesky factorization, thin-QR combination and
//! symmetrization. Pure functions, no state.

use nalgebra::DMatrix;

use crate::error::{EstimatorError, EstimatorResult};

/// Lower-triangular Cholesky factor `L` of a symmetric positive-definite
/// matrix, with `L * L^T = m`.
pub fn cholesky_factor(m: &DMatrix<f64>, context: &str) -> EstimatorResult<DMatrix<f64>> {
    nalgebra::Cholesky::new(m.clone())
        .map(|c| c.unpack())
        .ok_or_else(|| EstimatorError::Factorization {
            context: context.to_string(),
        })
}

/// Combines two square-root factors via the "thin" QR decomposition.
///
/// Returns a lower-triangular `S` with `S * S^T = a * a^T + b * b^T`. The
/// factors are stacked as `[a^T; b^T]`, QR-factorized, and the transposed
/// `R` factor is returned. `a` and `b` must have the same row count.
pub fn thin_qr(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    assert_eq!(
        a.nrows(),
        b.nrows(),
        "thin_qr operands must have matching row counts"
    );

    let n = a.nrows();
    let mut stacked = DMatrix::<f64>::zeros(a.ncols() + b.ncols(), n);
    stacked
        .view_mut((0, 0), (a.ncols(), n))
        .copy_from(&a.transpose());
    stacked
        .view_mut((a.ncols(), 0), (b.ncols(), n))
        .copy_from(&b.transpose());

    let r = stacked.qr().r();
    r.transpose()
}

/// Forces exact symmetry by averaging mirrored off-diagonal entries.
/// Corrects floating round-off after a `S * S^T` recomposition.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = avg;
            m[(j, i)] = avg;
        }
    }
}

/// Removes every row/column pair whose diagonal entry is exactly zero.
///
/// Returns the compressed matrix and the indices that were kept. A noise
/// matrix with unexcited axes is singular only through those exact zeros;
/// factorization runs on the compressed matrix and the factor is re-expanded
/// with [`expand_factor`].
pub fn compress_zero_diagonal(m: &DMatrix<f64>) -> (DMatrix<f64>, Vec<usize>) {
    let kept: Vec<usize> = (0..m.nrows()).filter(|&i| m[(i, i)] != 0.0).collect();

    let mut reduced = DMatrix::<f64>::zeros(kept.len(), kept.len());
    for (ri, &i) in kept.iter().enumerate() {
        for (rj, &j) in kept.iter().enumerate() {
            reduced[(ri, rj)] = m[(i, j)];
        }
    }
    (reduced, kept)
}

/// Re-expands a compressed factor to `dim` x `dim`, placing entries back at
/// their original row/column indices and zeros elsewhere.
pub fn expand_factor(reduced: &DMatrix<f64>, kept: &[usize], dim: usize) -> DMatrix<f64> {
    let mut full = DMatrix::<f64>::zeros(dim, dim);
    for (ri, &i) in kept.iter().enumerate() {
        for (rj, &j) in kept.iter().enumerate() {
            full[(i, j)] = reduced[(ri, rj)];
        }
    }
    full
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Deterministic stand-in for random test matrices.
    fn pseudo_random(rows: usize, cols: usize, seed: f64) -> DMatrix<f64> {
        DMatrix::from_fn(rows, cols, |i, j| {
            ((seed + 1.3 * i as f64 + 2.7 * j as f64).sin() * 10.0).fract()
        })
    }

    #[test]
    fn cholesky_recomposes() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let l = cholesky_factor(&m, "test").unwrap();
        let back = &l * l.transpose();
        assert_abs_diff_eq!(back, m, epsilon = 1e-12);
        // Lower triangular: strict upper part is zero
        assert_eq!(l[(0, 1)], 0.0);
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(cholesky_factor(&m, "test").is_err());
    }

    #[test]
    fn thin_qr_round_trip() {
        for seed in [0.1, 1.7, 4.2] {
            let a = pseudo_random(5, 5, seed);
            let b = pseudo_random(5, 3, seed + 0.5);
            let s = thin_qr(&a, &b);

            let expected = &a * a.transpose() + &b * b.transpose();
            let got = &s * s.transpose();
            assert_abs_diff_eq!(got, expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn thin_qr_result_is_square() {
        let a = pseudo_random(4, 4, 0.3);
        let b = pseudo_random(4, 2, 0.9);
        let s = thin_qr(&a, &b);
        assert_eq!(s.nrows(), 4);
        assert_eq!(s.ncols(), 4);
    }

    #[test]
    fn symmetrize_averages_off_diagonals() {
        let mut m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 4.0, 1.0]);
        symmetrize(&mut m);
        assert_abs_diff_eq!(m[(0, 1)], 3.0);
        assert_abs_diff_eq!(m[(1, 0)], 3.0);
    }

    #[test]
    fn compress_and_expand_round_trip() {
        let mut m = DMatrix::<f64>::zeros(4, 4);
        m[(0, 0)] = 2.0;
        m[(0, 2)] = 0.5;
        m[(2, 0)] = 0.5;
        m[(2, 2)] = 3.0;
        // rows/cols 1 and 3 have zero diagonals

        let (reduced, kept) = compress_zero_diagonal(&m);
        assert_eq!(kept, vec![0, 2]);
        assert_eq!(reduced.nrows(), 2);
        assert_abs_diff_eq!(reduced[(0, 1)], 0.5);

        let full = expand_factor(&reduced, &kept, 4);
        assert_abs_diff_eq!(full, m, epsilon = 0.0);
    }

    #[test]
    fn recomposed_factor_is_symmetric_nonnegative_diagonal() {
        let s = pseudo_random(6, 6, 2.2);
        let mut p = &s * s.transpose();
        symmetrize(&mut p);
        for i in 0..6 {
            assert!(p[(i, i)] >= 0.0);
            for j in 0..6 {
                assert_abs_diff_eq!(p[(i, j)], p[(j, i)], epsilon = 0.0);
            }
        }
    }
}
