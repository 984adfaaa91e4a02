//! Damped Gauss-Newton (Levenberg-Marquardt) minimizer.
//!
//! The solver only sees a [`ResidualFunction`]: a map from a real parameter
//! vector to a real residual vector of any length. Every experiment supplies a
//! closure that captures its own model and measured data, so the response,
//! rotation and sine fits all share this one implementation.
//!
//! Each iteration:
//!
//! 1. approximates the Jacobian by finite differences (columns in parallel)
//! 2. solves `(JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr`
//! 3. accepts `x + δ` only if the sum of squares strictly decreases, shrinking
//!    λ; otherwise grows λ and retries, up to `max_sub_iterations` times
//!
//! Running out of iterations or saturating λ is *not* an error: the best
//! vector seen so far is returned with `converged = false`.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::CalError;
use crate::math::solve_least_squares;

/// Lower bound on λ after repeated successful steps.
const MIN_DAMPING: f64 = 1e-15;

/// Anything that maps parameters to residuals.
///
/// `Sync` because Jacobian columns are evaluated on the rayon pool.
pub trait ResidualFunction: Sync {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;
}

impl<F> ResidualFunction for F
where
    F: Fn(&DVector<f64>) -> DVector<f64> + Sync,
{
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        self(params)
    }
}

/// Adapter for complex-valued residuals: each complex value contributes its
/// real and imaginary parts as two consecutive real residuals.
pub struct ComplexResidual<F>(pub F);

impl<F> ResidualFunction for ComplexResidual<F>
where
    F: Fn(&DVector<f64>) -> Vec<Complex64> + Sync,
{
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let values = (self.0)(params);
        DVector::from_iterator(2 * values.len(), values.iter().flat_map(|v| [v.re, v.im]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JacobianKind {
    Forward,
    #[default]
    Central,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Stop once an accepted step improves the cost by less than this fraction.
    pub relative_tolerance: f64,
    pub initial_damping: f64,
    pub damping_increase: f64,
    pub damping_decrease: f64,
    pub max_damping: f64,
    pub max_sub_iterations: usize,
    pub jacobian: JacobianKind,
    /// Finite-difference step relative to `max(|x_j|, step_floor)`.
    pub step_scale: f64,
    pub step_floor: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            relative_tolerance: 1e-10,
            initial_damping: 1e-3,
            damping_increase: 10.0,
            damping_decrease: 0.1,
            max_damping: 1e12,
            max_sub_iterations: 20,
            jacobian: JacobianKind::Central,
            step_scale: 1e-6,
            step_floor: 1e-3,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Relative cost change fell below the tolerance.
    RelativeImprovement,
    /// Gradient vanished or the predicted decrease is negligible.
    Stationary,
    /// Residuals are exactly zero.
    ZeroCost,
    MaxIterations,
    DampingSaturated,
    SubIterationsExhausted,
}

impl Termination {
    pub fn converged(self) -> bool {
        matches!(
            self,
            Termination::RelativeImprovement | Termination::Stationary | Termination::ZeroCost
        )
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    pub params: DVector<f64>,
    pub residuals: DVector<f64>,
    pub cost: f64,
    pub initial_cost: f64,
    pub iterations: usize,
    pub termination: Termination,
    pub converged: bool,
}

/// Minimize `‖f(x)‖²` starting from `x0`.
pub fn minimize<F>(f: &F, x0: DVector<f64>, opts: &SolverOptions) -> Result<SolveReport, CalError>
where
    F: ResidualFunction + ?Sized,
{
    if x0.is_empty() {
        return Err(CalError::InvalidInput("solver needs at least one parameter".to_string()));
    }

    let mut x = x0;
    let mut r = f.residuals(&x);
    if r.is_empty() {
        return Err(CalError::InsufficientData(
            "residual function returned no values".to_string(),
        ));
    }
    let mut cost = r.norm_squared();
    if !cost.is_finite() {
        return Err(CalError::NumericalFailure(
            "residuals at the starting parameters are not finite".to_string(),
        ));
    }

    let initial_cost = cost;
    let mut lambda = opts.initial_damping;
    let mut iterations = 0usize;
    let mut termination = Termination::MaxIterations;

    'outer: while iterations < opts.max_iterations {
        if cost == 0.0 {
            termination = Termination::ZeroCost;
            break;
        }
        iterations += 1;

        let jac = jacobian(f, &x, &r, opts)?;
        let jt = jac.transpose();
        let normal = &jt * &jac;
        let gradient = &jt * &r;
        if gradient.amax() == 0.0 {
            termination = Termination::Stationary;
            break;
        }

        let mut accepted = false;
        for sub in 0..opts.max_sub_iterations.max(1) {
            if let Some(delta) = damped_step(&normal, &gradient, lambda) {
                let predicted = -(2.0 * gradient.dot(&delta) + delta.dot(&(&normal * &delta)));
                if sub == 0 && predicted <= opts.relative_tolerance * cost {
                    termination = Termination::Stationary;
                    break 'outer;
                }

                let candidate = &x + &delta;
                let r_new = f.residuals(&candidate);
                let c_new = r_new.norm_squared();
                let comparable = r_new.len() == r.len() && c_new.is_finite();

                if comparable && c_new < cost {
                    let improvement = (cost - c_new) / cost;
                    x = candidate;
                    r = r_new;
                    cost = c_new;
                    lambda = (lambda * opts.damping_decrease).max(MIN_DAMPING);
                    accepted = true;
                    tracing::debug!(iteration = iterations, cost, lambda, "solver step accepted");
                    if improvement < opts.relative_tolerance {
                        termination = Termination::RelativeImprovement;
                        break 'outer;
                    }
                    break;
                }

                if comparable && (c_new - cost).abs() <= opts.relative_tolerance * cost {
                    termination = Termination::RelativeImprovement;
                    break 'outer;
                }
            }

            lambda *= opts.damping_increase;
            if lambda > opts.max_damping {
                termination = Termination::DampingSaturated;
                break 'outer;
            }
        }

        if !accepted {
            termination = Termination::SubIterationsExhausted;
            break;
        }
    }

    Ok(SolveReport {
        params: x,
        residuals: r,
        cost,
        initial_cost,
        iterations,
        termination,
        converged: termination.converged(),
    })
}

fn jacobian<F>(f: &F, x: &DVector<f64>, r0: &DVector<f64>, opts: &SolverOptions) -> Result<DMatrix<f64>, CalError>
where
    F: ResidualFunction + ?Sized,
{
    let m = r0.len();
    let columns: Vec<DVector<f64>> = (0..x.len())
        .into_par_iter()
        .map(|j| {
            let h = opts.step_scale * x[j].abs().max(opts.step_floor);
            let mut forward = x.clone();
            forward[j] += h;
            let rp = f.residuals(&forward);

            let (column, len) = match opts.jacobian {
                JacobianKind::Forward => ((&rp - r0) / h, rp.len()),
                JacobianKind::Central => {
                    let mut backward = x.clone();
                    backward[j] -= h;
                    let rm = f.residuals(&backward);
                    if rm.len() != rp.len() {
                        return Err(CalError::DimensionMismatch {
                            expected: rp.len(),
                            got: rm.len(),
                        });
                    }
                    ((&rp - &rm) / (2.0 * h), rp.len())
                }
            };
            if len != m {
                return Err(CalError::DimensionMismatch { expected: m, got: len });
            }
            Ok(column.map(|v| if v.is_finite() { v } else { 0.0 }))
        })
        .collect::<Result<_, _>>()?;

    Ok(DMatrix::from_columns(&columns))
}

fn damped_step(normal: &DMatrix<f64>, gradient: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let n = normal.nrows();
    let max_diag = (0..n).map(|i| normal[(i, i)]).fold(0.0_f64, f64::max);
    let floor = (max_diag * f64::EPSILON).max(f64::MIN_POSITIVE);

    let mut damped = normal.clone();
    for i in 0..n {
        damped[(i, i)] += lambda * normal[(i, i)].max(floor);
    }
    let rhs = -gradient;

    let step = match damped.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => solve_least_squares(&damped, &rhs)?,
    };
    step.iter().all(|v| v.is_finite()).then_some(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn fits_a_line() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 1.5 * x - 4.0).collect();
        let f = |p: &DVector<f64>| {
            DVector::from_iterator(xs.len(), xs.iter().zip(ys.iter()).map(|(x, y)| p[0] * x + p[1] - y))
        };
        let report = minimize(&f, DVector::from_vec(vec![0.0, 0.0]), &SolverOptions::default()).unwrap();
        assert!(report.converged, "{:?}", report.termination);
        assert_abs_diff_eq!(report.params[0], 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(report.params[1], -4.0, epsilon = 1e-6);
    }

    #[test]
    fn fits_exponential_decay() {
        let ts: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let ys: Vec<f64> = ts.iter().map(|t| 3.0 * (-t / 0.7).exp() + 0.25).collect();
        let f = |p: &DVector<f64>| {
            DVector::from_iterator(
                ts.len(),
                ts.iter().zip(ys.iter()).map(|(t, y)| p[0] * (-t / p[1]).exp() + p[2] - y),
            )
        };
        let report = minimize(&f, DVector::from_vec(vec![1.0, 1.5, 0.0]), &SolverOptions::default()).unwrap();
        assert_abs_diff_eq!(report.params[0], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(report.params[1], 0.7, epsilon = 1e-5);
        assert_abs_diff_eq!(report.params[2], 0.25, epsilon = 1e-5);
        assert!(report.cost < report.initial_cost);
    }

    #[test]
    fn solves_rosenbrock() {
        let f = |p: &DVector<f64>| DVector::from_vec(vec![10.0 * (p[1] - p[0] * p[0]), 1.0 - p[0]]);
        let report = minimize(&f, DVector::from_vec(vec![-1.2, 1.0]), &SolverOptions::default()).unwrap();
        assert_abs_diff_eq!(report.params[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(report.params[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn iteration_cap_reports_non_convergence_with_best_vector() {
        let f = |p: &DVector<f64>| DVector::from_vec(vec![10.0 * (p[1] - p[0] * p[0]), 1.0 - p[0]]);
        let opts = SolverOptions {
            max_iterations: 1,
            ..SolverOptions::default()
        };
        let report = minimize(&f, DVector::from_vec(vec![-1.2, 1.0]), &opts).unwrap();
        assert!(!report.converged);
        assert_eq!(report.termination, Termination::MaxIterations);
        assert_eq!(report.iterations, 1);
        assert!(report.cost < report.initial_cost);
    }

    #[test]
    fn complex_residual_adapter() {
        let target = Complex64::new(3.0, -4.0);
        let f = ComplexResidual(|p: &DVector<f64>| vec![Complex64::new(p[0], p[1]) - target]);
        assert_eq!(f.residuals(&DVector::from_vec(vec![0.0, 0.0])).len(), 2);
        let report = minimize(&f, DVector::from_vec(vec![0.0, 0.0]), &SolverOptions::default()).unwrap();
        assert_abs_diff_eq!(report.params[0], 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(report.params[1], -4.0, epsilon = 1e-9);
    }

    #[test]
    fn ignored_parameter_does_not_break_the_step() {
        // Second parameter has a zero Jacobian column.
        let f = |p: &DVector<f64>| DVector::from_vec(vec![p[0] - 2.0, 2.0 * (p[0] - 2.0)]);
        let report = minimize(&f, DVector::from_vec(vec![0.0, 5.0]), &SolverOptions::default()).unwrap();
        assert_abs_diff_eq!(report.params[0], 2.0, epsilon = 1e-8);
        assert_eq!(report.params[1], 5.0);
    }

    #[test]
    fn empty_parameters_are_rejected() {
        let f = |_: &DVector<f64>| DVector::from_vec(vec![1.0]);
        let err = minimize(&f, DVector::zeros(0), &SolverOptions::default()).unwrap_err();
        assert!(matches!(err, CalError::InvalidInput(_)));
    }
}
