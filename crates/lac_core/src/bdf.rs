//! Variable-order backward differentiation formulas (orders 1–5).
//!
//! Quasi-constant step size implementation in the NDF/BDF family: the solution
//! history is kept as a table of backward differences, rescaled whenever the
//! step size changes. Each step solves the implicit corrector with a
//! simplified Newton iteration on `I - c·J`, where `J` comes from dual-number
//! differentiation of the right-hand side and is only refreshed when Newton
//! stalls.

use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

use crate::autodiff::{self, Dual};
use crate::error::FailureReason;
use crate::traits::DynamicalSystem;

pub const MAX_ORDER: usize = 5;
const NEWTON_MAXITER: usize = 4;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;

/// NDF correction coefficients; the last entry is unused by order 5.
const KAPPA: [f64; MAX_ORDER + 1] = [0.0, -0.1850, -1.0 / 9.0, -0.0823, -0.0415, 0.0];

/// Counters accumulated over one integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub rhs_evaluations: usize,
    pub jacobian_evaluations: usize,
    pub lu_decompositions: usize,
}

/// Tolerances and step bounds for a single BDF run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BdfOptions {
    pub rtol: f64,
    pub atol: f64,
    pub max_step: f64,
    pub first_step: Option<f64>,
}

struct Coefficients {
    gamma: [f64; MAX_ORDER + 1],
    alpha: [f64; MAX_ORDER + 1],
    error_const: [f64; MAX_ORDER + 1],
}

impl Coefficients {
    fn new() -> Self {
        let mut gamma = [0.0; MAX_ORDER + 1];
        for k in 1..=MAX_ORDER {
            gamma[k] = gamma[k - 1] + 1.0 / k as f64;
        }
        let mut alpha = [0.0; MAX_ORDER + 1];
        let mut error_const = [0.0; MAX_ORDER + 1];
        for k in 0..=MAX_ORDER {
            alpha[k] = (1.0 - KAPPA[k]) * gamma[k];
            error_const[k] = KAPPA[k] * gamma[k] + 1.0 / (k + 1) as f64;
        }
        Self {
            gamma,
            alpha,
            error_const,
        }
    }
}

struct NewtonOutcome {
    converged: bool,
    iterations: usize,
    non_finite: bool,
    y: DVector<f64>,
    correction: DVector<f64>,
}

/// A BDF integrator advancing one system forward from `t0` to `t_bound`.
pub struct Bdf<'a, S> {
    system: &'a S,
    options: BdfOptions,
    coeffs: Coefficients,
    newton_tol: f64,
    t: f64,
    t_old: f64,
    t_bound: f64,
    y: DVector<f64>,
    h_abs: f64,
    order: usize,
    n_equal_steps: usize,
    /// Backward differences, `MAX_ORDER + 3` rows.
    diffs: Vec<DVector<f64>>,
    jac: DMatrix<f64>,
    lu: Option<LU<f64, Dyn, Dyn>>,
    stats: SolverStats,
}

impl<'a, S> Bdf<'a, S>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
{
    /// Caller guarantees `t_bound > t0`, positive tolerances and a state of
    /// the system's dimension.
    pub fn new(system: &'a S, t0: f64, y0: &[f64], t_bound: f64, options: BdfOptions) -> Self {
        let n = y0.len();
        let y = DVector::from_column_slice(y0);
        let mut stats = SolverStats::default();

        let f0 = evaluate(system, t0, &y, &mut stats);
        let h_abs = match options.first_step {
            Some(h) => h,
            None => initial_step(system, t0, &y, &f0, t_bound, &options, &mut stats),
        };

        let mut diffs = vec![DVector::zeros(n); MAX_ORDER + 3];
        diffs[0] = y.clone();
        diffs[1] = &f0 * h_abs;

        let jac = autodiff::jacobian(system, t0, y.as_slice());
        stats.jacobian_evaluations += 1;

        let newton_tol = (10.0 * f64::EPSILON / options.rtol).max(options.rtol.sqrt().min(0.03));

        Self {
            system,
            options,
            coeffs: Coefficients::new(),
            newton_tol,
            t: t0,
            t_old: t0,
            t_bound,
            y,
            h_abs,
            order: 1,
            n_equal_steps: 0,
            diffs,
            jac,
            lu: None,
            stats,
        }
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn t_old(&self) -> f64 {
        self.t_old
    }

    pub fn y(&self) -> &[f64] {
        self.y.as_slice()
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn step_size(&self) -> f64 {
        self.h_abs
    }

    pub fn stats(&self) -> SolverStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.t >= self.t_bound
    }

    /// Advances by one accepted step.
    pub fn step(&mut self) -> Result<(), FailureReason> {
        let t = self.t;
        let min_step = 10.0 * (t.abs() * f64::EPSILON).max(f64::MIN_POSITIVE);

        if self.h_abs > self.options.max_step {
            self.rescale(self.options.max_step / self.h_abs);
        } else if self.h_abs < min_step {
            self.rescale(min_step / self.h_abs);
        }

        let mut current_jac = false;
        let mut saw_non_finite = false;

        let (t_new, y_new, correction, n_iter, scale) = loop {
            if self.h_abs < min_step {
                return Err(if saw_non_finite {
                    FailureReason::NonFiniteState
                } else {
                    FailureReason::StepSizeTooSmall
                });
            }

            let mut t_new = t + self.h_abs;
            if t_new > self.t_bound {
                t_new = self.t_bound;
                self.rescale((t_new - t) / self.h_abs);
            }
            let h = t_new - t;
            self.h_abs = h;

            let order = self.order;
            let mut y_predict = DVector::zeros(self.y.len());
            for row in &self.diffs[..=order] {
                y_predict += row;
            }
            let scale = self.scale(&y_predict);

            let mut psi = DVector::zeros(self.y.len());
            for j in 1..=order {
                psi += &self.diffs[j] * self.coeffs.gamma[j];
            }
            psi /= self.coeffs.alpha[order];
            let c = h / self.coeffs.alpha[order];

            let outcome = loop {
                let lu = match self.lu.take() {
                    Some(lu) => lu,
                    None => {
                        self.stats.lu_decompositions += 1;
                        let n = self.y.len();
                        (DMatrix::identity(n, n) - &self.jac * c).lu()
                    }
                };
                let outcome = newton(
                    self.system,
                    &lu,
                    t_new,
                    &y_predict,
                    c,
                    &psi,
                    &scale,
                    self.newton_tol,
                    &mut self.stats,
                );
                self.lu = Some(lu);
                saw_non_finite |= outcome.non_finite;
                if outcome.converged || current_jac {
                    break outcome;
                }
                self.jac = autodiff::jacobian(self.system, t_new, y_predict.as_slice());
                self.stats.jacobian_evaluations += 1;
                self.lu = None;
                current_jac = true;
            };

            if !outcome.converged {
                self.stats.rejected_steps += 1;
                self.rescale(0.5);
                continue;
            }

            let scale = self.scale(&outcome.y);
            let error_norm =
                rms_scaled(&(&outcome.correction * self.coeffs.error_const[order]), &scale);
            if error_norm > 1.0 {
                self.stats.rejected_steps += 1;
                let factor = MIN_FACTOR.max(
                    safety(outcome.iterations) * error_norm.powf(-1.0 / (order as f64 + 1.0)),
                );
                self.rescale(factor);
                continue;
            }

            break (
                t_new,
                outcome.y,
                outcome.correction,
                outcome.iterations,
                scale,
            );
        };

        self.stats.accepted_steps += 1;
        self.n_equal_steps += 1;
        self.t_old = t;
        self.t = t_new;
        self.y = y_new;

        let order = self.order;
        self.diffs[order + 2] = &correction - &self.diffs[order + 1];
        self.diffs[order + 1] = correction.clone();
        for i in (0..=order).rev() {
            let next = self.diffs[i + 1].clone();
            self.diffs[i] += next;
        }

        if self.n_equal_steps < order + 1 {
            return Ok(());
        }

        let ec = &self.coeffs.error_const;
        let error_m = if order > 1 {
            rms_scaled(&(&self.diffs[order] * ec[order - 1]), &scale)
        } else {
            f64::INFINITY
        };
        let error = rms_scaled(&(&correction * ec[order]), &scale);
        let error_p = if order < MAX_ORDER {
            rms_scaled(&(&self.diffs[order + 2] * ec[order + 1]), &scale)
        } else {
            f64::INFINITY
        };

        let factors = [error_m, error, error_p]
            .iter()
            .enumerate()
            .map(|(i, norm)| norm.powf(-1.0 / (order + i) as f64))
            .collect::<Vec<_>>();
        let (best, best_factor) = factors
            .iter()
            .copied()
            .enumerate()
            .fold((1, factors[1]), |acc, cur| if cur.1 > acc.1 { cur } else { acc });

        self.order = order + best - 1;
        let factor = MAX_FACTOR.min(safety(n_iter) * best_factor);
        self.rescale(factor);
        Ok(())
    }

    /// Evaluates the interpolating polynomial of the last step at `t`,
    /// valid for `t_old <= t <= t`.
    pub fn interpolate(&self, t_query: f64) -> DVector<f64> {
        let h = self.h_abs;
        let mut y = self.diffs[0].clone();
        let mut p = 1.0;
        for k in 0..self.order {
            let shift = self.t - h * k as f64;
            p *= (t_query - shift) / (h * (k + 1) as f64);
            y += &self.diffs[k + 1] * p;
        }
        y
    }

    fn scale(&self, y: &DVector<f64>) -> DVector<f64> {
        y.map(|v| self.options.atol + self.options.rtol * v.abs())
    }

    /// Changes the step size by `factor`, rewriting the difference table.
    fn rescale(&mut self, factor: f64) {
        self.h_abs *= factor;
        change_differences(&mut self.diffs, self.order, factor);
        self.n_equal_steps = 0;
        self.lu = None;
    }
}

fn safety(newton_iterations: usize) -> f64 {
    0.9 * (2 * NEWTON_MAXITER + 1) as f64 / (2 * NEWTON_MAXITER + newton_iterations) as f64
}

fn evaluate<S: DynamicalSystem<f64>>(
    system: &S,
    t: f64,
    y: &DVector<f64>,
    stats: &mut SolverStats,
) -> DVector<f64> {
    let mut out = DVector::zeros(y.len());
    system.apply(t, y.as_slice(), out.as_mut_slice());
    stats.rhs_evaluations += 1;
    out
}

#[allow(clippy::too_many_arguments)]
fn newton<S: DynamicalSystem<f64>>(
    system: &S,
    lu: &LU<f64, Dyn, Dyn>,
    t_new: f64,
    y_predict: &DVector<f64>,
    c: f64,
    psi: &DVector<f64>,
    scale: &DVector<f64>,
    tol: f64,
    stats: &mut SolverStats,
) -> NewtonOutcome {
    let mut y = y_predict.clone();
    let mut correction = DVector::zeros(y.len());
    let mut dy_norm_old: Option<f64> = None;
    let mut outcome_iterations = NEWTON_MAXITER;
    let mut converged = false;
    let mut non_finite = false;

    for k in 0..NEWTON_MAXITER {
        let f = evaluate(system, t_new, &y, stats);
        if f.iter().any(|v| !v.is_finite()) {
            non_finite = true;
            outcome_iterations = k + 1;
            break;
        }

        let rhs = &f * c - psi - &correction;
        let Some(dy) = lu.solve(&rhs) else {
            outcome_iterations = k + 1;
            break;
        };
        let dy_norm = rms_scaled(&dy, scale);
        let rate = dy_norm_old.map(|old| dy_norm / old);

        if let Some(rate) = rate {
            let remaining = (NEWTON_MAXITER - k) as i32;
            if rate >= 1.0 || rate.powi(remaining) / (1.0 - rate) * dy_norm > tol {
                outcome_iterations = k + 1;
                break;
            }
        }

        y += &dy;
        correction += &dy;

        if dy_norm == 0.0 || rate.is_some_and(|r| r / (1.0 - r) * dy_norm < tol) {
            converged = true;
            outcome_iterations = k + 1;
            break;
        }
        dy_norm_old = Some(dy_norm);
    }

    NewtonOutcome {
        converged,
        iterations: outcome_iterations,
        non_finite,
        y,
        correction,
    }
}

/// Hairer–Wanner style starting step estimate for a first-order method.
fn initial_step<S: DynamicalSystem<f64>>(
    system: &S,
    t0: f64,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    t_bound: f64,
    options: &BdfOptions,
    stats: &mut SolverStats,
) -> f64 {
    let interval = t_bound - t0;
    let scale = y0.map(|v| options.atol + options.rtol * v.abs());
    let d0 = rms_scaled(y0, &scale);
    let d1 = rms_scaled(f0, &scale);

    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    let h0 = h0.min(interval);

    let y1 = y0 + f0 * h0;
    let f1 = evaluate(system, t0 + h0, &y1, stats);
    let d2 = rms_scaled(&(f1 - f0), &scale) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / 2.0)
    };

    (100.0 * h0).min(h1).min(interval).min(options.max_step)
}

/// Upper-triangular transform taking differences at step `h` to step `factor·h`.
fn step_ratio_matrix(order: usize, factor: f64) -> DMatrix<f64> {
    let mut m = DMatrix::zeros(order + 1, order + 1);
    for j in 0..=order {
        m[(0, j)] = 1.0;
    }
    for i in 1..=order {
        for j in 1..=order {
            m[(i, j)] = (i as f64 - 1.0 - factor * j as f64) / i as f64;
        }
    }
    for i in 1..=order {
        for j in 0..=order {
            m[(i, j)] *= m[(i - 1, j)];
        }
    }
    m
}

fn change_differences(diffs: &mut [DVector<f64>], order: usize, factor: f64) {
    let r = step_ratio_matrix(order, factor);
    let u = step_ratio_matrix(order, 1.0);
    let ru = r * u;
    let old: Vec<DVector<f64>> = diffs[..=order].to_vec();
    for i in 0..=order {
        let mut row = DVector::zeros(old[0].len());
        for (j, prev) in old.iter().enumerate() {
            row += prev * ru[(j, i)];
        }
        diffs[i] = row;
    }
}

fn rms_scaled(x: &DVector<f64>, scale: &DVector<f64>) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let sum: f64 = x
        .iter()
        .zip(scale.iter())
        .map(|(v, s)| (v / s) * (v / s))
        .sum();
    (sum / x.len() as f64).sqrt()
}
