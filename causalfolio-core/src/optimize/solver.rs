//! Quadratic program solvers for
//!
//! ```text
//! minimize  ½ wᵀQw − μᵀw   subject to  1ᵀw = 1  (and w ≥ 0)
//! ```
//!
//! `Q` must be positive definite.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::OptimizeError;
use crate::cancel::CancelToken;
use crate::linalg::stable_cholesky;

const STEP_TOL: f64 = 1e-12;
const MULTIPLIER_TOL: f64 = 1e-12;

/// Minimizer on the subset `free` of coordinates (others held at zero),
/// under the budget constraint only.
fn solve_equality(
    q: &DMatrix<f64>,
    mu: &DVector<f64>,
    free: &[usize],
) -> Result<DVector<f64>, OptimizeError> {
    let k = free.len();
    let q_ff = DMatrix::from_fn(k, k, |i, j| q[(free[i], free[j])]);
    let mu_f = DVector::from_fn(k, |i, _| mu[free[i]]);
    let chol = stable_cholesky(&q_ff).ok_or_else(|| {
        OptimizeError::OptimizationFailed("risk matrix is not positive definite".to_string())
    })?;

    // Stationarity Q w = μ - ν 1 with ν fixed by 1ᵀw = 1
    let ones = DVector::from_element(k, 1.0);
    let q_inv_mu = chol.solve(&mu_f);
    let q_inv_one = chol.solve(&ones);
    let denom = q_inv_one.sum();
    if denom.abs() < f64::EPSILON {
        return Err(OptimizeError::OptimizationFailed(
            "degenerate budget constraint".to_string(),
        ));
    }
    let nu = (q_inv_mu.sum() - 1.0) / denom;
    let w_f = q_inv_mu - q_inv_one * nu;

    let mut w = DVector::zeros(q.nrows());
    for (i, &idx) in free.iter().enumerate() {
        w[idx] = w_f[i];
    }
    Ok(w)
}

/// Budget constraint only; shorts allowed.
pub(crate) fn solve_long_short(
    q: &DMatrix<f64>,
    mu: &DVector<f64>,
) -> Result<DVector<f64>, OptimizeError> {
    let all: Vec<usize> = (0..mu.len()).collect();
    solve_equality(q, mu, &all)
}

/// Primal active-set method for the long-only problem.
///
/// Starts from equal weights with no bound active. Ties between blocking
/// or releasable bounds go to the lowest index.
pub(crate) fn solve_long_only(
    q: &DMatrix<f64>,
    mu: &DVector<f64>,
    max_iterations: usize,
    cancel: &CancelToken,
) -> Result<DVector<f64>, OptimizeError> {
    let n = mu.len();
    let mut w = DVector::from_element(n, 1.0 / n as f64);
    let mut at_bound = vec![false; n];

    for iteration in 0..max_iterations {
        cancel.check()?;
        let free: Vec<usize> = (0..n).filter(|&i| !at_bound[i]).collect();
        let target = solve_equality(q, mu, &free)?;
        let step = &target - &w;

        if step.amax() <= STEP_TOL {
            // Bound multipliers: λ_i = g_i + ν, with ν = -g_i on free coordinates
            let gradient = q * &w - mu;
            let nu = -free.iter().map(|&i| gradient[i]).sum::<f64>() / free.len() as f64;
            let release = (0..n)
                .filter(|&i| at_bound[i])
                .map(|i| (i, gradient[i] + nu))
                .filter(|&(_, lambda)| lambda < -MULTIPLIER_TOL)
                .fold(None, |best: Option<(usize, f64)>, cur| match best {
                    Some(b) if b.1 <= cur.1 => Some(b),
                    _ => Some(cur),
                });
            match release {
                None => {
                    debug!(iterations = iteration + 1, "active set converged");
                    return Ok(w);
                }
                Some((i, _)) => at_bound[i] = false,
            }
            continue;
        }

        let mut alpha = 1.0;
        let mut blocking = None;
        for &i in &free {
            if step[i] < 0.0 {
                let ratio = w[i].max(0.0) / -step[i];
                if ratio < alpha {
                    alpha = ratio;
                    blocking = Some(i);
                }
            }
        }
        w += &step * alpha;
        if let Some(i) = blocking {
            w[i] = 0.0;
            at_bound[i] = true;
        }
    }

    Err(OptimizeError::OptimizationFailed(format!(
        "active set did not converge in {max_iterations} iterations"
    )))
}
