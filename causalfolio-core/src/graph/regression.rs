//! Linear regression with intercept: OLS via normal equations, with a
//! ridge fallback for wide or singular designs.

use nalgebra::{DMatrix, DVector};

use crate::linalg::stable_cholesky;
use crate::stats::two_sided_p_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Ols,
    Ridge,
}

/// Slope estimates for one regression (intercept reported separately).
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub p_values: Vec<f64>,
    pub observations: usize,
    pub degrees_of_freedom: usize,
    pub method: Method,
}

/// Regress `y` on the given regressor columns plus an intercept.
///
/// Every column must have `y.len()` entries. Returns `None` only when the
/// system cannot be solved even with the ridge penalty, or produces
/// non-finite estimates.
pub fn fit_linear(y: &[f64], columns: &[Vec<f64>], ridge_lambda: f64) -> Option<LinearFit> {
    let n = y.len();
    let k = columns.len();
    if n == 0 || columns.iter().any(|c| c.len() != n) {
        return None;
    }
    let p = k + 1;

    let x = DMatrix::from_fn(n, p, |row, col| {
        if col == 0 {
            1.0
        } else {
            columns[col - 1][row]
        }
    });
    let yv = DVector::from_column_slice(y);
    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &yv;

    // Collinear regressors show up as a vanishing Cholesky pivot
    let ols = if p > n { None } else { stable_cholesky(&xtx) };

    let (method, a_inv) = match ols {
        Some(chol) => (Method::Ols, chol.inverse()),
        None => {
            let mut penalized = xtx.clone();
            for j in 1..p {
                penalized[(j, j)] += ridge_lambda;
            }
            (Method::Ridge, stable_cholesky(&penalized)?.inverse())
        }
    };

    let beta = &a_inv * &xty;
    let residuals = &yv - &x * &beta;
    let df = n.saturating_sub(p).max(1);
    let sigma2 = residuals.norm_squared() / df as f64;

    let cov = match method {
        Method::Ols => &a_inv * sigma2,
        Method::Ridge => (&a_inv * &xtx * &a_inv) * sigma2,
    };

    let mut coefficients = Vec::with_capacity(k);
    let mut std_errors = Vec::with_capacity(k);
    let mut p_values = Vec::with_capacity(k);
    for j in 1..p {
        let b = beta[j];
        let se = cov[(j, j)].max(0.0).sqrt();
        let pv = if se > 0.0 {
            two_sided_p_value(b / se, df as f64)
        } else if b != 0.0 {
            0.0
        } else {
            1.0
        };
        if !b.is_finite() || !se.is_finite() || pv.is_nan() {
            return None;
        }
        coefficients.push(b);
        std_errors.push(se);
        p_values.push(pv);
    }

    Some(LinearFit {
        intercept: beta[0],
        coefficients,
        std_errors,
        p_values,
        observations: n,
        degrees_of_freedom: df,
        method,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_noiseless_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.0 + 2.5 * v).collect();
        let fit = fit_linear(&y, &[x], 1e-3).unwrap();
        assert_eq!(fit.method, Method::Ols);
        assert!((fit.intercept - 1.0).abs() < 1e-8);
        assert!((fit.coefficients[0] - 2.5).abs() < 1e-8);
        assert!(fit.p_values[0] < 1e-6);
        assert_eq!(fit.degrees_of_freedom, 18);
    }

    #[test]
    fn unrelated_regressor_not_significant() {
        // x cycles 0..3 inside every constant block of y
        let x: Vec<f64> = (0..40).map(|i| (i % 4) as f64).collect();
        let y: Vec<f64> = (0..40).map(|i| if (i / 4) % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let fit = fit_linear(&y, &[x], 1e-3).unwrap();
        assert!(fit.coefficients[0].abs() < 1e-9);
        assert!(fit.p_values[0] > 0.5);
    }

    #[test]
    fn collinear_design_falls_back_to_ridge() {
        let x1: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let x2 = x1.clone();
        let y: Vec<f64> = x1.iter().map(|v| 3.0 * v).collect();
        let fit = fit_linear(&y, &[x1, x2], 1e-3).unwrap();
        assert_eq!(fit.method, Method::Ridge);
        // The penalty splits the slope evenly across identical columns
        assert!((fit.coefficients[0] - fit.coefficients[1]).abs() < 1e-6);
        assert!((fit.coefficients[0] + fit.coefficients[1] - 3.0).abs() < 1e-3);
    }

    #[test]
    fn wide_design_uses_ridge() {
        let cols = vec![vec![1.0, 2.0], vec![0.5, 0.1], vec![3.0, 1.0]];
        let fit = fit_linear(&[1.0, 2.0], &cols, 1e-1).unwrap();
        assert_eq!(fit.method, Method::Ridge);
        assert_eq!(fit.degrees_of_freedom, 1);
    }

    #[test]
    fn mismatched_columns_rejected() {
        assert!(fit_linear(&[1.0, 2.0], &[vec![1.0]], 1e-3).is_none());
        assert!(fit_linear(&[], &[], 1e-3).is_none());
    }
}
