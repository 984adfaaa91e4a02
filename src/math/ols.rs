//! SVD-based linear least squares.
//!
//! Used in two places:
//! - the sine calibration, where amplitude and phase at a known frequency are
//!   linear in `a·sin + b·cos + c`
//! - the nonlinear solver, as the fallback when the damped normal matrix is
//!   not positive definite
//!
//! Columns are scaled to unit norm before the decomposition so the rank cutoff
//! compares like with like; the solver's damped matrices mix parameters of
//! very different magnitude. A zero column (a parameter the residual ignores)
//! gets a zero coefficient.

use nalgebra::{DMatrix, DVector};

/// Singular-value cutoffs relative to the largest, tried strict to loose.
const RELATIVE_CUTOFFS: [f64; 3] = [f64::EPSILON, 1e-10, 1e-6];

/// Minimum-norm solution of `min ‖x·β − y‖²`.
///
/// Returns `None` for mismatched shapes, non-finite input, or when no cutoff
/// yields a finite solution.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() != y.len() || x.ncols() == 0 {
        return None;
    }

    let norms: Vec<f64> = x.column_iter().map(|c| c.norm()).collect();
    if norms.iter().any(|n| !n.is_finite()) {
        return None;
    }
    let scaled = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| {
        if norms[j] > 0.0 { x[(i, j)] / norms[j] } else { 0.0 }
    });

    let svd = scaled.svd(true, true);
    let largest = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    if largest == 0.0 {
        return Some(DVector::zeros(x.ncols()));
    }
    let dim = x.nrows().max(x.ncols()) as f64;

    RELATIVE_CUTOFFS.iter().find_map(|&rel| {
        let beta = svd.solve(y, rel * dim * largest).ok()?;
        let beta = DVector::from_iterator(
            x.ncols(),
            beta.iter()
                .zip(&norms)
                .map(|(&b, &n)| if n > 0.0 { b / n } else { 0.0 }),
        );
        beta.iter().all(|v| v.is_finite()).then_some(beta)
    })
}
