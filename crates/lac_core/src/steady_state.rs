use nalgebra::Complex;
use serde::{Deserialize, Serialize};

use crate::network::LacOperon;
use crate::species::{Species, SpeciesState};

/// Derivative magnitude (M/s) below which every species counts as settled.
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 1e-12;

/// Eigenvalues within this fraction of the spectral radius are treated as
/// zero modes of the conserved pools.
const ZERO_MODE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteadyStateReport {
    pub max_abs_derivative: f64,
    /// Species carrying the largest derivative.
    pub slowest_species: Species,
    pub residual_norm: f64,
    pub eigenvalues: Vec<Complex<f64>>,
    /// Eigenvalues indistinguishable from zero; one per conserved pool.
    pub zero_modes: usize,
    /// No eigenvalue outside the zero modes has a non-negative real part.
    pub stable: bool,
}

impl SteadyStateReport {
    pub fn is_converged(&self, threshold: f64) -> bool {
        self.max_abs_derivative < threshold
    }
}

/// Evaluates how close `state` is to an equilibrium of `model`, and whether
/// that equilibrium attracts nearby states within its conservation class.
pub fn assess(model: &LacOperon, state: &SpeciesState) -> SteadyStateReport {
    let derivative = model.derivative(state);
    let (slowest_species, max_abs_derivative) = Species::ALL
        .into_iter()
        .map(|s| (s, derivative[s].abs()))
        .fold((Species::FreeDna, 0.0), |best, cur| {
            if cur.1 > best.1 {
                cur
            } else {
                best
            }
        });
    let residual_norm = derivative
        .as_slice()
        .iter()
        .map(|v| v * v)
        .sum::<f64>()
        .sqrt();

    let eigenvalues: Vec<Complex<f64>> = model
        .jacobian(state)
        .complex_eigenvalues()
        .iter()
        .copied()
        .collect();
    let radius = eigenvalues.iter().map(|l| l.norm()).fold(0.0, f64::max);
    let cutoff = ZERO_MODE_TOLERANCE * radius.max(f64::MIN_POSITIVE);
    let zero_modes = eigenvalues.iter().filter(|l| l.norm() <= cutoff).count();
    let stable = eigenvalues
        .iter()
        .filter(|l| l.norm() > cutoff)
        .all(|l| l.re < 0.0);

    SteadyStateReport {
        max_abs_derivative,
        slowest_species,
        residual_norm,
        eigenvalues,
        zero_modes,
        stable,
    }
}
