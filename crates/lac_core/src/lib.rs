/// The `lac_core` crate models the lac operon switch as a mass-action
/// reaction network and integrates it with a stiff BDF solver.
///
/// Key components:
/// - **Species / Params**: the eight-species state vector and the validated kinetic parameter set.
/// - **Network**: rate laws generic over `Scalar`, evaluated in `f64` and in `Dual`.
/// - **Bdf / Integrator**: variable-order BDF stepping and a sampling facade producing trajectories.
/// - **Conservation / Steady state**: post-hoc pool drift checks and equilibrium diagnostics.
/// - **Sweep**: dose-response curves over log-spaced inducer levels, optionally on rayon.
pub mod autodiff;
pub mod bdf;
pub mod conservation;
pub mod error;
pub mod integrator;
pub mod network;
pub mod params;
pub mod species;
pub mod steady_state;
pub mod sweep;
pub mod traits;

pub use error::{FailureReason, ModelError, Result};
pub use integrator::{Horizon, Integrator, IntegratorSettings, Trajectory};
pub use network::LacOperon;
pub use params::KineticParameters;
pub use species::{Species, SpeciesState};
pub use sweep::{DoseResponseCurve, DoseResponseSweep, InducerRange, SweepOutcome, SweepSettings};
