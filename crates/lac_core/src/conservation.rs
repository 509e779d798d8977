//! Conserved pools of the network and post-hoc drift checks on trajectories.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, Result};
use crate::integrator::Trajectory;
use crate::params::KineticParameters;
use crate::species::{Species, SpeciesState};

/// Relative drift tolerated along a trajectory.
pub const DEFAULT_POOL_TOLERANCE: f64 = 1e-6;

/// Linear combinations of species the stoichiometry keeps constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pool {
    /// free_DNA + LD + ILD
    Operator,
    /// LacI + LD + IL + ILD
    Repressor,
    /// IPTG + IL + ILD
    Inducer,
}

impl Pool {
    pub const ALL: [Pool; 3] = [Pool::Operator, Pool::Repressor, Pool::Inducer];

    pub fn members(self) -> &'static [Species] {
        match self {
            Pool::Operator => &[
                Species::FreeDna,
                Species::DnaRepressor,
                Species::InducerRepressorDna,
            ],
            Pool::Repressor => &[
                Species::FreeRepressor,
                Species::DnaRepressor,
                Species::InducerRepressor,
                Species::InducerRepressorDna,
            ],
            Pool::Inducer => &[
                Species::Inducer,
                Species::InducerRepressor,
                Species::InducerRepressorDna,
            ],
        }
    }

    pub fn total(self, state: &SpeciesState) -> f64 {
        self.members().iter().map(|s| state[*s]).sum()
    }

    /// Reference total: the parameter set fixes the operator and repressor
    /// pools; the inducer pool is whatever the run started with.
    pub fn expected(self, params: &KineticParameters, initial: &SpeciesState) -> f64 {
        match self {
            Pool::Operator => params.dna_total,
            Pool::Repressor => params.laci_total,
            Pool::Inducer => self.total(initial),
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pool::Operator => "Operator",
            Pool::Repressor => "Repressor",
            Pool::Inducer => "Inducer",
        };
        f.write_str(name)
    }
}

/// Worst relative drift seen for each pool.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConservationReport {
    pub operator: f64,
    pub repressor: f64,
    pub inducer: f64,
}

impl ConservationReport {
    pub fn drift(&self, pool: Pool) -> f64 {
        match pool {
            Pool::Operator => self.operator,
            Pool::Repressor => self.repressor,
            Pool::Inducer => self.inducer,
        }
    }

    pub fn worst(&self) -> f64 {
        self.operator.max(self.repressor).max(self.inducer)
    }

    fn record(&mut self, pool: Pool, drift: f64) {
        let slot = match pool {
            Pool::Operator => &mut self.operator,
            Pool::Repressor => &mut self.repressor,
            Pool::Inducer => &mut self.inducer,
        };
        *slot = slot.max(drift);
    }
}

fn relative_drift(expected: f64, observed: f64) -> f64 {
    let diff = (observed - expected).abs();
    if expected == 0.0 {
        if diff == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        diff / expected.abs()
    }
}

/// Measures pool drift along `trajectory` without failing.
pub fn conservation_report(trajectory: &Trajectory, params: &KineticParameters) -> ConservationReport {
    let mut report = ConservationReport::default();
    let Some(initial) = trajectory.states.first() else {
        return report;
    };
    for state in &trajectory.states {
        for pool in Pool::ALL {
            let drift = relative_drift(pool.expected(params, initial), pool.total(state));
            report.record(pool, drift);
        }
    }
    report
}

/// Fails with [`ModelError::InvariantViolation`] at the first sample where a
/// pool leaves `rel_tol` of its reference total.
pub fn check_conservation(
    trajectory: &Trajectory,
    params: &KineticParameters,
    rel_tol: f64,
) -> Result<ConservationReport> {
    let mut report = ConservationReport::default();
    let Some(initial) = trajectory.states.first() else {
        return Ok(report);
    };
    for (t, state) in trajectory.iter() {
        for pool in Pool::ALL {
            let expected = pool.expected(params, initial);
            let observed = pool.total(state);
            let drift = relative_drift(expected, observed);
            if drift > rel_tol {
                return Err(ModelError::InvariantViolation {
                    pool,
                    t,
                    expected,
                    observed,
                });
            }
            report.record(pool, drift);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{check_conservation, conservation_report, Pool, DEFAULT_POOL_TOLERANCE};
    use crate::bdf::SolverStats;
    use crate::error::ModelError;
    use crate::integrator::Trajectory;
    use crate::params::KineticParameters;
    use crate::species::{Species, SpeciesState};

    fn trajectory_of(states: Vec<SpeciesState>) -> Trajectory {
        Trajectory {
            times: (0..states.len()).map(|i| i as f64).collect(),
            states,
            stats: SolverStats::default(),
        }
    }

    #[test]
    fn baseline_state_sits_on_all_pools() {
        let params = KineticParameters::default();
        let state = params.baseline_state(3e-6).expect("baseline");

        assert_eq!(Pool::Operator.total(&state), params.dna_total);
        assert!((Pool::Repressor.total(&state) - params.laci_total).abs() < 1e-22);
        assert_eq!(Pool::Inducer.total(&state), 3e-6);
    }

    #[test]
    fn check_flags_the_drifting_pool() {
        let params = KineticParameters::default();
        let start = params.baseline_state(1e-6).expect("baseline");
        let leaked = start.with(Species::FreeDna, 1e-11);
        let trajectory = trajectory_of(vec![start, leaked]);

        let err = check_conservation(&trajectory, &params, DEFAULT_POOL_TOLERANCE)
            .expect_err("operator pool grew by 1%");
        match err {
            ModelError::InvariantViolation { pool, t, .. } => {
                assert_eq!(pool, Pool::Operator);
                assert_eq!(t, 1.0);
            }
            other => panic!("unexpected error {other:?}"),
        }

        let report = conservation_report(&trajectory, &params);
        assert!((report.drift(Pool::Operator) - 1e-2).abs() < 1e-9);
        assert_eq!(report.drift(Pool::Inducer), 0.0);
    }

    #[test]
    fn inducer_pool_uses_first_sample_as_reference() {
        let params = KineticParameters::default();
        let start = params.baseline_state(2e-6).expect("baseline");
        let shuffled = start
            .with(Species::Inducer, 2e-6 - 5e-9)
            .with(Species::InducerRepressor, 5e-9)
            .with(Species::FreeRepressor, params.laci_total - params.dna_total - 5e-9);
        let trajectory = trajectory_of(vec![start, shuffled]);

        let report = check_conservation(&trajectory, &params, 1e-9).expect("pools conserved");
        assert!(report.worst() < 1e-9);
    }
}
