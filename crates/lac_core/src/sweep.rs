//! Dose-response sweeps: one independent integration per inducer level, each
//! starting from the same baseline, fanned out across threads when enabled.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{ModelError, Result};
use crate::integrator::{Horizon, Integrator, IntegratorSettings};
use crate::network::LacOperon;
use crate::species::{Species, SpeciesState};

/// Logarithmically spaced inducer concentrations, both bounds included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InducerRange {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

impl Default for InducerRange {
    fn default() -> Self {
        Self {
            lower: 1e-9,
            upper: 1e-3,
            count: 20,
        }
    }
}

impl InducerRange {
    pub fn validate(&self) -> Result<()> {
        if !(self.lower.is_finite() && self.lower > 0.0) {
            return Err(ModelError::settings(format!(
                "Inducer range lower bound must be positive, got {}.",
                self.lower
            )));
        }
        if !(self.upper.is_finite() && self.upper >= self.lower) {
            return Err(ModelError::settings(format!(
                "Inducer range upper bound {} must not be below the lower bound {}.",
                self.upper, self.lower
            )));
        }
        if self.count == 0 {
            return Err(ModelError::settings(
                "Inducer range needs at least one point.",
            ));
        }
        Ok(())
    }

    /// Ascending concentrations; a single point sits at `lower`.
    pub fn concentrations(&self) -> Vec<f64> {
        if self.count == 1 {
            return vec![self.lower];
        }
        let log_lower = self.lower.log10();
        let span = self.upper.log10() - log_lower;
        let last = (self.count - 1) as f64;
        let mut values: Vec<f64> = (0..self.count)
            .map(|i| 10f64.powf(log_lower + span * (i as f64 / last)))
            .collect();
        values[0] = self.lower;
        values[self.count - 1] = self.upper;
        values
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    pub horizon: Horizon,
    #[serde(default)]
    pub integrator: IntegratorSettings,
    /// Fan points out over the rayon pool. Ignored without the `parallel`
    /// feature.
    #[serde(default = "parallel_by_default")]
    pub parallel: bool,
}

fn parallel_by_default() -> bool {
    true
}

impl Default for SweepSettings {
    /// Only the final time is sampled; the sweep never looks at the rest.
    fn default() -> Self {
        Self {
            horizon: Horizon {
                t_start: 0.0,
                t_end: 1000.0,
                times: vec![1000.0],
            },
            integrator: IntegratorSettings::default(),
            parallel: true,
        }
    }
}

/// What one sweep point produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    /// Reporter concentration at the last sampled time.
    Steady { reporter: f64, final_time: f64 },
    /// The integration did not reach the end of the horizon.
    Failed { error: String },
    /// The sweep was abandoned before this point started.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseResponsePoint {
    pub inducer: f64,
    pub outcome: SweepOutcome,
}

impl DoseResponsePoint {
    pub fn reporter(&self) -> Option<f64> {
        match self.outcome {
            SweepOutcome::Steady { reporter, .. } => Some(reporter),
            _ => None,
        }
    }
}

/// Sweep results in ascending inducer order. Points without a steady value
/// stay in place as explicit gaps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DoseResponseCurve {
    pub points: Vec<DoseResponsePoint>,
}

impl DoseResponseCurve {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn inducers(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.inducer).collect()
    }

    pub fn reporters(&self) -> Vec<Option<f64>> {
        self.points.iter().map(DoseResponsePoint::reporter).collect()
    }

    pub fn gaps(&self) -> impl Iterator<Item = &DoseResponsePoint> + '_ {
        self.points.iter().filter(|p| p.reporter().is_none())
    }

    pub fn is_complete(&self) -> bool {
        self.gaps().next().is_none()
    }

    /// `(inducer, reporter)` pairs of the points that reached the horizon.
    pub fn completed(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .filter_map(|p| p.reporter().map(|r| (p.inducer, r)))
            .collect()
    }

    /// True when no completed point falls below its predecessor by more than
    /// `rel_tol` of the larger magnitude.
    pub fn is_monotonic_nondecreasing(&self, rel_tol: f64) -> bool {
        self.completed().windows(2).all(|w| {
            let (a, b) = (w[0].1, w[1].1);
            b >= a - rel_tol * a.abs().max(b.abs())
        })
    }
}

/// Batch progress, shaped for polling front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepProgress {
    pub done: bool,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Horizons shorter than this many slowest time constants get a warning.
const SETTLING_TIME_CONSTANTS: f64 = 5.0;

/// The slowest time constant of `model` when `horizon` is too short to
/// cover several of them.
fn undersized_horizon(model: &LacOperon, horizon: &Horizon) -> Option<f64> {
    let tau = 1.0 / model.params().slowest_rate()?;
    let span = horizon.t_end - horizon.t_start;
    (span < SETTLING_TIME_CONSTANTS * tau).then_some(tau)
}

/// A validated sweep over one model and one baseline.
#[derive(Debug, Clone)]
pub struct DoseResponseSweep {
    model: LacOperon,
    baseline: SpeciesState,
    concentrations: Vec<f64>,
    horizon: Horizon,
    integrator: Integrator,
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    parallel: bool,
}

impl DoseResponseSweep {
    pub fn new(
        model: LacOperon,
        baseline: SpeciesState,
        range: InducerRange,
        settings: SweepSettings,
    ) -> Result<Self> {
        range.validate()?;
        settings.horizon.validate()?;
        let integrator = Integrator::new(settings.integrator)?;
        model.check_initial_state(&baseline)?;
        if let Some(tau) = undersized_horizon(&model, &settings.horizon) {
            warn!(
                "Sweep horizon of {} s is short of the slowest relaxation time {:e} s; \
                 final values may not be steady",
                settings.horizon.t_end - settings.horizon.t_start,
                tau
            );
        }
        Ok(Self {
            model,
            baseline,
            concentrations: range.concentrations(),
            horizon: settings.horizon,
            integrator,
            parallel: settings.parallel,
        })
    }

    /// Sweep starting from the model's own baseline (operator fully
    /// repressed, nothing expressed yet).
    pub fn from_model(model: LacOperon, range: InducerRange, settings: SweepSettings) -> Result<Self> {
        let baseline = model.baseline_state(0.0)?;
        Self::new(model, baseline, range, settings)
    }

    pub fn concentrations(&self) -> &[f64] {
        &self.concentrations
    }

    pub fn model(&self) -> &LacOperon {
        &self.model
    }

    /// Integrates a single point: the baseline with its inducer replaced.
    pub fn run_point(&self, inducer: f64) -> SweepOutcome {
        match self.steady_reporter(inducer) {
            Ok((reporter, final_time)) => SweepOutcome::Steady {
                reporter,
                final_time,
            },
            Err(err) => {
                warn!("Sweep point at inducer = {inducer:e} failed: {err}");
                SweepOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    fn steady_reporter(&self, inducer: f64) -> Result<(f64, f64)> {
        if !(inducer.is_finite() && inducer >= 0.0) {
            return Err(ModelError::InvalidParameter {
                name: "inducer",
                value: inducer,
                reason: "sweep inducer must be a finite non-negative concentration",
            });
        }
        let initial = self.baseline.with(Species::Inducer, inducer);
        let trajectory = self
            .integrator
            .time_course(&self.model, &initial, &self.horizon)?;
        trajectory
            .final_sample()
            .map(|(t, state)| (state[Species::Reporter], t))
            .ok_or_else(|| ModelError::settings("Horizon produced no samples."))
    }

    fn point(&self, inducer: f64, cancel: Option<&AtomicBool>) -> DoseResponsePoint {
        let outcome = if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            SweepOutcome::Cancelled
        } else {
            self.run_point(inducer)
        };
        DoseResponsePoint { inducer, outcome }
    }

    fn collect(&self, cancel: Option<&AtomicBool>) -> DoseResponseCurve {
        #[cfg(feature = "parallel")]
        {
            if self.parallel {
                let points = self
                    .concentrations
                    .par_iter()
                    .map(|&c| self.point(c, cancel))
                    .collect();
                return self.summarize(DoseResponseCurve { points });
            }
        }
        let points = self
            .concentrations
            .iter()
            .map(|&c| self.point(c, cancel))
            .collect();
        self.summarize(DoseResponseCurve { points })
    }

    fn summarize(&self, curve: DoseResponseCurve) -> DoseResponseCurve {
        let completed = curve.completed().len();
        let cancelled = curve
            .points
            .iter()
            .filter(|p| p.outcome == SweepOutcome::Cancelled)
            .count();
        info!(
            "Dose-response sweep: {} points, {} steady, {} failed, {} cancelled",
            curve.len(),
            completed,
            curve.len() - completed - cancelled,
            cancelled
        );
        curve
    }

    pub fn run(&self) -> DoseResponseCurve {
        self.collect(None)
    }

    /// Like [`run`](Self::run), but points that have not started when `cancel`
    /// is raised are recorded as [`SweepOutcome::Cancelled`].
    pub fn run_until(&self, cancel: &AtomicBool) -> DoseResponseCurve {
        self.collect(Some(cancel))
    }

    pub fn into_runner(self) -> SweepRunner {
        SweepRunner {
            sweep: self,
            points: Vec::new(),
            cancelled: false,
        }
    }
}

/// Incremental driver: evaluates a few points per call so a host event loop
/// can report progress between batches.
#[derive(Debug, Clone)]
pub struct SweepRunner {
    sweep: DoseResponseSweep,
    points: Vec<DoseResponsePoint>,
    cancelled: bool,
}

impl SweepRunner {
    pub fn is_done(&self) -> bool {
        self.cancelled || self.points.len() >= self.sweep.concentrations.len()
    }

    pub fn run_points(&mut self, batch_size: usize) -> SweepProgress {
        let next = self.points.len();
        let end = (next + batch_size).min(self.sweep.concentrations.len());
        if !self.cancelled {
            for &inducer in &self.sweep.concentrations[next..end] {
                self.points.push(self.sweep.point(inducer, None));
            }
        }
        self.progress()
    }

    pub fn progress(&self) -> SweepProgress {
        let failed = self
            .points
            .iter()
            .filter(|p| matches!(p.outcome, SweepOutcome::Failed { .. }))
            .count();
        SweepProgress {
            done: self.is_done(),
            completed: self.points.len(),
            failed,
            total: self.sweep.concentrations.len(),
        }
    }

    /// Stops the runner; the remaining points become cancelled gaps.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn into_curve(self) -> DoseResponseCurve {
        let Self {
            sweep, mut points, ..
        } = self;
        points.extend(
            sweep.concentrations[points.len()..]
                .iter()
                .map(|&inducer| DoseResponsePoint {
                    inducer,
                    outcome: SweepOutcome::Cancelled,
                }),
        );
        sweep.summarize(DoseResponseCurve { points })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::{
        undersized_horizon, DoseResponseCurve, DoseResponsePoint, DoseResponseSweep,
        InducerRange, SweepOutcome, SweepSettings,
    };
    use crate::conservation::{check_conservation, DEFAULT_POOL_TOLERANCE};
    use crate::integrator::{Horizon, Integrator, IntegratorSettings};
    use crate::network::LacOperon;
    use crate::params::KineticParameters;
    use crate::species::{Species, SpeciesState};
    use crate::steady_state::{assess, DEFAULT_CONVERGENCE_THRESHOLD};

    /// Reporter turnover fast enough to settle within the 1000 s horizon.
    fn fast_turnover() -> KineticParameters {
        KineticParameters {
            k_deg_pro: 0.05,
            ..Default::default()
        }
    }

    fn model() -> LacOperon {
        LacOperon::new(fast_turnover()).expect("model")
    }

    fn sweep(range: InducerRange, settings: SweepSettings) -> DoseResponseSweep {
        DoseResponseSweep::from_model(model(), range, settings).expect("sweep")
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
    fn range_is_log_spaced_with_exact_endpoints() {
        let values = InducerRange {
            lower: 1e-9,
            upper: 1e-3,
            count: 7,
        }
        .concentrations();

        assert_eq!(values.len(), 7);
        assert_eq!(values[0], 1e-9);
        assert_eq!(values[6], 1e-3);
        for (i, v) in values.iter().enumerate() {
            let expected = 10f64.powi(i as i32 - 9);
            assert!((v - expected).abs() <= 1e-12 * expected, "{v} vs {expected}");
        }

        let single = InducerRange {
            lower: 5e-6,
            upper: 5e-6,
            count: 1,
        };
        assert_eq!(single.concentrations(), vec![5e-6]);
    }

    #[test]
    fn default_range_spans_six_decades_in_twenty_points() {
        let values = InducerRange::default().concentrations();
        assert_eq!(values.len(), 20);
        assert_eq!(values[0], 1e-9);
        assert_eq!(values[19], 1e-3);
    }

    #[test]
    fn range_validation_rejects_bad_bounds() {
        let zero_lower = InducerRange {
            lower: 0.0,
            ..Default::default()
        };
        assert_err_contains(zero_lower.validate(), "lower bound");

        let inverted = InducerRange {
            lower: 1e-3,
            upper: 1e-6,
            count: 4,
        };
        assert_err_contains(inverted.validate(), "upper bound");

        let empty = InducerRange {
            count: 0,
            ..Default::default()
        };
        assert_err_contains(empty.validate(), "at least one");
    }

    #[test]
    fn sweep_rejects_invalid_settings_eagerly() {
        let settings = SweepSettings {
            integrator: IntegratorSettings {
                atol: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_err_contains(
            DoseResponseSweep::from_model(model(), InducerRange::default(), settings),
            "atol",
        );
    }

    #[test]
    fn sweep_rejects_negative_baseline() {
        let baseline = SpeciesState::from_array([0.0, 1e-9, 0.0, 0.0, 0.0, -5e-8, 0.0, -1.0]);
        let range = InducerRange {
            lower: 1e-6,
            upper: 1e-6,
            count: 1,
        };
        assert_err_contains(
            DoseResponseSweep::new(model(), baseline, range, SweepSettings::default()),
            "non-negative",
        );
    }

    #[test]
    fn sweep_rejects_baseline_off_the_repressor_pool() {
        let model = model();
        let baseline = model
            .baseline_state(0.0)
            .expect("baseline")
            .with(Species::FreeRepressor, 0.0);
        assert_err_contains(
            DoseResponseSweep::new(model, baseline, InducerRange::default(), SweepSettings::default()),
            "laci_total",
        );
    }

    #[test]
    fn short_horizon_is_flagged_against_slowest_rate() {
        let horizon = SweepSettings::default().horizon;
        let slow = LacOperon::new(KineticParameters::default()).expect("model");
        let tau = undersized_horizon(&slow, &horizon).expect("reporter turnover is slow");
        assert!((tau - 1e5).abs() < 1e-6 * 1e5);
        assert_eq!(undersized_horizon(&model(), &horizon), None);
    }

    #[test]
    fn every_sweep_trajectory_conserves_pools_and_stays_non_negative() {
        let integrator = Integrator::new(IntegratorSettings::default()).expect("settings");
        let horizon = Horizon::linspace(0.0, 1000.0, 101).expect("horizon");
        let mut inducers = vec![0.0];
        inducers.extend(
            InducerRange {
                lower: 1e-9,
                upper: 1e-3,
                count: 7,
            }
            .concentrations(),
        );

        for params in [KineticParameters::default(), fast_turnover()] {
            let model = LacOperon::new(params).expect("model");
            for &inducer in &inducers {
                let initial = model.baseline_state(inducer).expect("baseline");
                let trajectory = integrator
                    .time_course(&model, &initial, &horizon)
                    .expect("integration");

                check_conservation(&trajectory, model.params(), DEFAULT_POOL_TOLERANCE)
                    .unwrap_or_else(|err| panic!("inducer {inducer:e}: {err}"));
                let (t, species, lowest) = trajectory.min_concentration().expect("samples");
                assert!(
                    lowest >= -1e-9,
                    "inducer {inducer:e}: {species:?} dipped to {lowest:e} at t = {t}"
                );
            }
        }
    }

    #[test]
    fn scenario_reporter_rises_and_settles() {
        let model = model();
        let initial = model.baseline_state(100e-6).expect("baseline");
        let horizon = Horizon::linspace(0.0, 1000.0, 1000).expect("horizon");
        let integrator = Integrator::new(IntegratorSettings::default()).expect("settings");
        let trajectory = integrator
            .time_course(&model, &initial, &horizon)
            .expect("integration");

        let reporter = trajectory.series(Species::Reporter);
        assert_eq!(reporter[0], 0.0);
        let (t_end, final_state) = trajectory.final_sample().expect("samples");
        assert_eq!(t_end, 1000.0);
        assert!(final_state[Species::Reporter] > reporter[0]);

        let report = assess(&model, final_state);
        assert!(
            report.is_converged(DEFAULT_CONVERGENCE_THRESHOLD),
            "largest derivative {:e} on {:?}",
            report.max_abs_derivative,
            report.slowest_species
        );
        assert!(report.stable);

        check_conservation(&trajectory, model.params(), DEFAULT_POOL_TOLERANCE)
            .expect("pools conserved");
        let (_, species, lowest) = trajectory.min_concentration().expect("samples");
        assert!(lowest >= -1e-9, "{species:?} dipped to {lowest:e}");
    }

    #[test]
    fn dose_response_is_monotonic_over_six_decades() {
        let curve = sweep(
            InducerRange {
                lower: 1e-9,
                upper: 1e-3,
                count: 13,
            },
            SweepSettings::default(),
        )
        .run();

        assert_eq!(curve.len(), 13);
        assert!(curve.is_complete());
        assert!(curve.inducers().windows(2).all(|w| w[1] > w[0]));
        assert!(curve.is_monotonic_nondecreasing(1e-4));

        let reporters: Vec<f64> = curve.completed().iter().map(|p| p.1).collect();
        assert!(reporters[12] > reporters[0]);
    }

    #[test]
    fn zero_inducer_stays_below_saturation() {
        let sweep = sweep(InducerRange::default(), SweepSettings::default());
        let off = sweep.run_point(0.0);
        let on = sweep.run_point(1e-3);

        let reporter = |outcome: &SweepOutcome| match outcome {
            SweepOutcome::Steady { reporter, .. } => *reporter,
            other => panic!("expected a steady point, got {other:?}"),
        };
        assert!(reporter(&off) < reporter(&on));
    }

    #[test]
    fn parallel_and_sequential_sweeps_agree() {
        let range = InducerRange {
            lower: 1e-7,
            upper: 1e-4,
            count: 4,
        };
        let parallel = sweep(range, SweepSettings::default()).run();
        let sequential = sweep(
            range,
            SweepSettings {
                parallel: false,
                ..Default::default()
            },
        )
        .run();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn failed_points_stay_as_gaps() {
        let settings = SweepSettings {
            integrator: IntegratorSettings {
                max_steps: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        let curve = sweep(
            InducerRange {
                lower: 1e-6,
                upper: 1e-4,
                count: 3,
            },
            settings,
        )
        .run();

        assert_eq!(curve.len(), 3);
        assert!(!curve.is_complete());
        assert_eq!(curve.gaps().count(), 3);
        assert_eq!(curve.reporters(), vec![None, None, None]);
        for point in &curve.points {
            match &point.outcome {
                SweepOutcome::Failed { error } => assert!(error.contains("step budget")),
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn invalid_point_inducer_is_a_failure_not_a_panic() {
        let sweep = sweep(InducerRange::default(), SweepSettings::default());
        match sweep.run_point(f64::NAN) {
            SweepOutcome::Failed { error } => assert!(error.contains("inducer")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn raised_cancel_flag_skips_every_point() {
        let sweep = sweep(InducerRange::default(), SweepSettings::default());
        let cancel = AtomicBool::new(true);
        let curve = sweep.run_until(&cancel);

        assert_eq!(curve.len(), InducerRange::default().count);
        assert!(curve
            .points
            .iter()
            .all(|p| p.outcome == SweepOutcome::Cancelled));
    }

    #[test]
    fn runner_reports_progress_and_fills_cancelled_tail() {
        let range = InducerRange {
            lower: 1e-6,
            upper: 1e-4,
            count: 3,
        };
        let mut runner = sweep(range, SweepSettings::default()).into_runner();
        assert!(!runner.is_done());

        let progress = runner.run_points(1);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, 3);
        assert!(!progress.done);

        runner.cancel();
        assert!(runner.is_done());
        assert_eq!(runner.run_points(5).completed, 1);

        let curve = runner.into_curve();
        assert_eq!(curve.len(), 3);
        assert!(curve.points[0].reporter().is_some());
        assert_eq!(curve.points[1].outcome, SweepOutcome::Cancelled);
        assert_eq!(curve.points[2].inducer, 1e-4);
    }

    #[test]
    fn runner_completes_in_batches() {
        let range = InducerRange {
            lower: 1e-6,
            upper: 1e-5,
            count: 2,
        };
        let sweep = sweep(range, SweepSettings::default());
        let expected = sweep.run();
        let mut runner = sweep.into_runner();
        while !runner.is_done() {
            runner.run_points(1);
        }
        assert_eq!(runner.into_curve(), expected);
    }

    #[test]
    fn monotonicity_check_tolerates_noise_but_not_drops() {
        let point = |inducer: f64, reporter: f64| DoseResponsePoint {
            inducer,
            outcome: SweepOutcome::Steady {
                reporter,
                final_time: 1000.0,
            },
        };
        let noisy = DoseResponseCurve {
            points: vec![point(1e-6, 1.0), point(1e-5, 1.0 - 1e-9), point(1e-4, 2.0)],
        };
        assert!(noisy.is_monotonic_nondecreasing(1e-6));

        let dropping = DoseResponseCurve {
            points: vec![
                point(1e-6, 1.0),
                DoseResponsePoint {
                    inducer: 1e-5,
                    outcome: SweepOutcome::Cancelled,
                },
                point(1e-4, 0.5),
            ],
        };
        assert!(!dropping.is_monotonic_nondecreasing(1e-6));
        assert_eq!(dropping.completed().len(), 2);
    }
}
