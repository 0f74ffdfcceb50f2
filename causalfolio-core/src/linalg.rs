//! Small dense linear-algebra helpers over nalgebra.

use nalgebra::{Cholesky, DMatrix, Dyn};

/// Pivots whose squared value falls below this share of the matching
/// diagonal entry mark the matrix as numerically singular.
const PIVOT_TOL: f64 = 1e-10;

/// Cholesky factorization that also refuses near-singular matrices.
///
/// nalgebra only rejects non-positive pivots; a tiny positive pivot from
/// rounding would otherwise pass and blow up every solve.
pub(crate) fn stable_cholesky(m: &DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let chol = m.clone().cholesky()?;
    let l = chol.l_dirty();
    let ok = (0..m.nrows()).all(|j| {
        let d = m[(j, j)];
        d > 0.0 && l[(j, j)].powi(2) / d > PIVOT_TOL
    });
    ok.then_some(chol)
}
