//! Integrator facade: tolerances, evaluation grids and sampled trajectories.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::autodiff::Dual;
use crate::bdf::{Bdf, BdfOptions, SolverStats};
use crate::error::{FailureReason, ModelError, Result};
use crate::network::LacOperon;
use crate::species::{Species, SpeciesState};
use crate::traits::DynamicalSystem;

/// Settings controlling the stiff solver.
///
/// The default absolute tolerance sits well below the nanomolar operator
/// pool so that the smallest species are still resolved relatively.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub rtol: f64,
    pub atol: f64,
    /// Accepted-step budget before the run is reported as failed.
    pub max_steps: usize,
    #[serde(default)]
    pub first_step: Option<f64>,
    #[serde(default)]
    pub max_step: Option<f64>,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-15,
            max_steps: 50_000,
            first_step: None,
            max_step: None,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.rtol.is_finite() && self.rtol >= 100.0 * f64::EPSILON && self.rtol < 1.0) {
            return Err(ModelError::settings(format!(
                "rtol must lie in [{:e}, 1), got {}",
                100.0 * f64::EPSILON,
                self.rtol
            )));
        }
        if !(self.atol.is_finite() && self.atol > 0.0) {
            return Err(ModelError::settings("atol must be positive."));
        }
        if self.max_steps == 0 {
            return Err(ModelError::settings("max_steps must be greater than zero."));
        }
        if let Some(h) = self.first_step {
            if !(h.is_finite() && h > 0.0) {
                return Err(ModelError::settings("first_step must be positive."));
            }
        }
        if let Some(h) = self.max_step {
            if !(h > 0.0) {
                return Err(ModelError::settings("max_step must be positive."));
            }
        }
        Ok(())
    }
}

/// Integration window and the times at which the solution is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Horizon {
    pub t_start: f64,
    pub t_end: f64,
    pub times: Vec<f64>,
}

impl Horizon {
    /// `samples` evenly spaced times, both endpoints included.
    pub fn linspace(t_start: f64, t_end: f64, samples: usize) -> Result<Self> {
        if samples < 2 {
            return Err(ModelError::settings(
                "An evenly spaced horizon needs at least two samples.",
            ));
        }
        let span = t_end - t_start;
        let last = (samples - 1) as f64;
        let mut times: Vec<f64> = (0..samples)
            .map(|i| t_start + span * (i as f64 / last))
            .collect();
        times[samples - 1] = t_end;
        Self::with_times(t_start, t_end, times)
    }

    /// Explicit sampling times inside `[t_start, t_end]`, strictly increasing.
    pub fn with_times(t_start: f64, t_end: f64, times: Vec<f64>) -> Result<Self> {
        let horizon = Self {
            t_start,
            t_end,
            times,
        };
        horizon.validate()?;
        Ok(horizon)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.t_start.is_finite() && self.t_end.is_finite()) {
            return Err(ModelError::settings("Horizon bounds must be finite."));
        }
        if self.t_end <= self.t_start {
            return Err(ModelError::settings(format!(
                "Horizon end {} must exceed start {}.",
                self.t_end, self.t_start
            )));
        }
        if self.times.is_empty() {
            return Err(ModelError::settings("Horizon has no evaluation times."));
        }
        if self
            .times
            .iter()
            .any(|t| !(*t >= self.t_start && *t <= self.t_end))
        {
            return Err(ModelError::settings(
                "Evaluation times must lie inside the horizon.",
            ));
        }
        if self.times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ModelError::settings(
                "Evaluation times must be strictly increasing.",
            ));
        }
        Ok(())
    }

    pub fn final_time(&self) -> f64 {
        self.times.last().copied().unwrap_or(self.t_end)
    }
}

/// Raw sampled solution of an arbitrary system.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    pub stats: SolverStats,
}

/// Sampled time course of the lac switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<SpeciesState>,
    pub stats: SolverStats,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &SpeciesState)> + '_ {
        self.times.iter().copied().zip(self.states.iter())
    }

    pub fn final_sample(&self) -> Option<(f64, &SpeciesState)> {
        self.iter().last()
    }

    /// One species across all samples.
    pub fn series(&self, species: Species) -> Vec<f64> {
        self.states.iter().map(|s| s[species]).collect()
    }

    /// The most negative concentration anywhere along the run, with its time
    /// and species.
    pub fn min_concentration(&self) -> Option<(f64, Species, f64)> {
        self.iter()
            .map(|(t, state)| {
                let (species, value) = state.min_concentration();
                (t, species, value)
            })
            .reduce(|best, cur| if cur.2 < best.2 { cur } else { best })
    }
}

/// Validated solver configuration; cheap to share across threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integrator {
    settings: IntegratorSettings,
}

impl Integrator {
    pub fn new(settings: IntegratorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    /// Integrates `system` from `y0` over `horizon`, sampling at every
    /// evaluation time. Running out of steps or step size is an error, never
    /// a truncated solution.
    pub fn solve<S>(&self, system: &S, y0: &[f64], horizon: &Horizon) -> Result<Solution>
    where
        S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
    {
        horizon.validate()?;
        let dim = <S as DynamicalSystem<f64>>::dimension(system);
        if y0.len() != dim {
            return Err(ModelError::settings(format!(
                "Initial state dimension mismatch. Expected {}, got {}.",
                dim,
                y0.len()
            )));
        }
        if y0.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::settings("Initial state must be finite."));
        }

        let options = BdfOptions {
            rtol: self.settings.rtol,
            atol: self.settings.atol,
            max_step: self.settings.max_step.unwrap_or(f64::INFINITY),
            first_step: self
                .settings
                .first_step
                .map(|h| h.min(horizon.t_end - horizon.t_start)),
        };
        let mut solver = Bdf::new(system, horizon.t_start, y0, horizon.t_end, options);

        let mut times = Vec::with_capacity(horizon.times.len());
        let mut states = Vec::with_capacity(horizon.times.len());
        let mut pending = horizon.times.iter().copied().peekable();

        while let Some(t) = pending.next_if(|t| *t <= horizon.t_start) {
            times.push(t);
            states.push(y0.to_vec());
        }

        let mut steps = 0usize;
        while pending.peek().is_some() {
            if steps >= self.settings.max_steps {
                return Err(ModelError::IntegrationFailure {
                    t: solver.t(),
                    reason: FailureReason::MaxStepsExceeded,
                });
            }
            if let Err(reason) = solver.step() {
                return Err(ModelError::IntegrationFailure {
                    t: solver.t(),
                    reason,
                });
            }
            steps += 1;

            while let Some(t) = pending.next_if(|t| *t <= solver.t()) {
                times.push(t);
                states.push(solver.interpolate(t).iter().copied().collect());
            }
        }

        let stats = solver.stats();
        debug!(
            "BDF run over [{}, {}]: {} steps ({} rejected), {} rhs, {} jacobians, {} LU; \
             ended at order {} with step {:e}",
            horizon.t_start,
            horizon.t_end,
            stats.accepted_steps,
            stats.rejected_steps,
            stats.rhs_evaluations,
            stats.jacobian_evaluations,
            stats.lu_decompositions,
            solver.order(),
            solver.step_size()
        );

        Ok(Solution {
            times,
            states,
            stats,
        })
    }

    /// Time course of the lac switch from `initial`, which must be a
    /// non-negative state on the model's operator and repressor pools.
    pub fn time_course(
        &self,
        model: &LacOperon,
        initial: &SpeciesState,
        horizon: &Horizon,
    ) -> Result<Trajectory> {
        model.check_initial_state(initial)?;
        let solution = self.solve(model, initial.as_slice(), horizon)?;
        let states = solution
            .states
            .iter()
            .map(|s| {
                SpeciesState::from_slice(s).ok_or_else(|| {
                    ModelError::settings("Solver returned a state of the wrong dimension.")
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Trajectory {
            times: solution.times,
            states,
            stats: solution.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Horizon, Integrator, IntegratorSettings};
    use crate::error::{FailureReason, ModelError};
    use crate::network::LacOperon;
    use crate::params::KineticParameters;
    use crate::species::Species;
    use crate::traits::{DynamicalSystem, Scalar};

    struct Decay;

    impl<T: Scalar> DynamicalSystem<T> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
            out[0] = T::zero() - x[0];
        }
    }

    /// `dx/dt = x²` blows up at t = 1 for x(0) = 1.
    struct BlowUp;

    impl<T: Scalar> DynamicalSystem<T> for BlowUp {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
            out[0] = x[0] * x[0];
        }
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: crate::error::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn settings_validation_rejects_bad_tolerances() {
        let bad_rtol = IntegratorSettings {
            rtol: 0.0,
            ..Default::default()
        };
        assert_err_contains(Integrator::new(bad_rtol), "rtol");

        let bad_atol = IntegratorSettings {
            atol: -1.0,
            ..Default::default()
        };
        assert_err_contains(Integrator::new(bad_atol), "atol");

        let no_steps = IntegratorSettings {
            max_steps: 0,
            ..Default::default()
        };
        assert_err_contains(Integrator::new(no_steps), "max_steps");
    }

    #[test]
    fn horizon_linspace_includes_both_endpoints() {
        let horizon = Horizon::linspace(0.0, 1000.0, 1000).expect("horizon");
        assert_eq!(horizon.times.len(), 1000);
        assert_eq!(horizon.times[0], 0.0);
        assert_eq!(horizon.final_time(), 1000.0);
        assert!(horizon.times.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn horizon_rejects_malformed_grids() {
        assert_err_contains(Horizon::linspace(0.0, 1.0, 1), "at least two");
        assert_err_contains(Horizon::linspace(1.0, 1.0, 5), "must exceed");
        assert_err_contains(
            Horizon::with_times(0.0, 1.0, vec![0.5, 0.5]),
            "strictly increasing",
        );
        assert_err_contains(Horizon::with_times(0.0, 1.0, vec![2.0]), "inside");
    }

    #[test]
    fn solve_samples_requested_times() {
        let integrator = Integrator::new(IntegratorSettings {
            atol: 1e-12,
            ..Default::default()
        })
        .expect("settings");
        let horizon = Horizon::with_times(0.0, 2.0, vec![0.0, 0.25, 1.0, 2.0]).expect("horizon");
        let solution = integrator.solve(&Decay, &[1.0], &horizon).expect("solve");

        assert_eq!(solution.times, horizon.times);
        for (t, y) in solution.times.iter().zip(solution.states.iter()) {
            assert!((y[0] - (-t).exp()).abs() < 1e-4, "t = {t}");
        }
        assert_eq!(solution.states[0], vec![1.0]);
    }

    #[test]
    fn solve_rejects_dimension_mismatch() {
        let integrator = Integrator::new(IntegratorSettings::default()).expect("settings");
        let horizon = Horizon::linspace(0.0, 1.0, 3).expect("horizon");
        assert_err_contains(integrator.solve(&Decay, &[1.0, 2.0], &horizon), "dimension");
    }

    #[test]
    fn blow_up_is_reported_as_integration_failure() {
        let integrator = Integrator::new(IntegratorSettings {
            atol: 1e-9,
            ..Default::default()
        })
        .expect("settings");
        let horizon = Horizon::linspace(0.0, 2.0, 5).expect("horizon");
        let err = integrator
            .solve(&BlowUp, &[1.0], &horizon)
            .expect_err("finite-time blow-up cannot be integrated");

        assert!(err.is_integration_failure(), "got {err:?}");
        if let ModelError::IntegrationFailure { t, .. } = err {
            assert!(t < 1.0 + 1e-3);
        }
    }

    #[test]
    fn exhausted_step_budget_is_a_distinct_failure() {
        let integrator = Integrator::new(IntegratorSettings {
            max_steps: 3,
            ..Default::default()
        })
        .expect("settings");
        let model = LacOperon::new(KineticParameters::default()).expect("model");
        let initial = model.baseline_state(100e-6).expect("baseline");
        let horizon = Horizon::linspace(0.0, 1000.0, 10).expect("horizon");

        let err = integrator
            .time_course(&model, &initial, &horizon)
            .expect_err("three steps cannot cover the horizon");
        assert!(matches!(
            err,
            ModelError::IntegrationFailure {
                reason: FailureReason::MaxStepsExceeded,
                ..
            }
        ));
    }

    #[test]
    fn time_course_rejects_inconsistent_initial_state() {
        let integrator = Integrator::new(IntegratorSettings::default()).expect("settings");
        let model = LacOperon::new(KineticParameters::default()).expect("model");
        let horizon = Horizon::linspace(0.0, 10.0, 3).expect("horizon");
        let negative = model
            .baseline_state(1e-6)
            .expect("baseline")
            .with(Species::Inducer, -1e-6);

        assert_err_contains(
            integrator.time_course(&model, &negative, &horizon),
            "non-negative",
        );
    }

    #[test]
    fn time_course_is_deterministic() {
        let integrator = Integrator::new(IntegratorSettings::default()).expect("settings");
        let model = LacOperon::new(KineticParameters::default()).expect("model");
        let initial = model.baseline_state(1e-5).expect("baseline");
        let horizon = Horizon::linspace(0.0, 500.0, 50).expect("horizon");

        let a = integrator.time_course(&model, &initial, &horizon).expect("first");
        let b = integrator.time_course(&model, &initial, &horizon).expect("second");
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        assert_eq!(a.series(Species::Inducer)[0], 1e-5);
    }
}
