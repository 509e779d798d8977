//! Mass-action rate laws and species balances of the lac switch.
//!
//! The right-hand side is generic over [`Scalar`] so the same code path is
//! evaluated in `f64` by the integrator and in
//! [`Dual`](crate::autodiff::Dual) when the Newton iteration needs a
//! Jacobian.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::autodiff;
use crate::conservation::{Pool, DEFAULT_POOL_TOLERANCE};
use crate::error::{ModelError, Result};
use crate::params::KineticParameters;
use crate::species::{Species, SpeciesState, SPECIES_COUNT};
use crate::traits::{DynamicalSystem, Scalar};

/// Instantaneous reaction fluxes (M/s) at one state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fluxes<T> {
    /// Repressor–operator binding, forward and reverse.
    pub v1_f: T,
    pub v1_r: T,
    /// Inducer–repressor binding.
    pub v2_f: T,
    pub v2_r: T,
    /// Inducer binding to operator-bound repressor.
    pub v3_f: T,
    pub v3_r: T,
    /// ILD release back to free operator and IL.
    pub v4: T,
    /// Transcription.
    pub v5: T,
    /// Translation.
    pub v6: T,
    /// mRNA degradation.
    pub v7: T,
    /// Reporter degradation.
    pub v8: T,
}

impl<T: Scalar> Fluxes<T> {
    pub fn evaluate(p: &KineticParameters, x: &[T]) -> Self {
        let dna = x[Species::FreeDna.index()];
        let ld = x[Species::DnaRepressor.index()];
        let iptg = x[Species::Inducer.index()];
        let il = x[Species::InducerRepressor.index()];
        let ild = x[Species::InducerRepressorDna.index()];
        let laci = x[Species::FreeRepressor.index()];
        let mrna = x[Species::Mrna.index()];
        let pro = x[Species::Reporter.index()];
        let k = |v: f64| T::from(v);

        Self {
            v1_f: k(p.k_on_1) * laci * dna,
            v1_r: k(p.k_off_1) * ld,
            v2_f: k(p.k_on_2) * iptg * laci,
            v2_r: k(p.k_off_2) * il,
            v3_f: k(p.k_on_3) * iptg * ld,
            v3_r: k(p.k_off_3) * ild,
            v4: k(p.k_release) * ild,
            v5: k(p.k_tc) * dna,
            v6: k(p.k_tl) * mrna,
            v7: k(p.k_deg_mrna) * mrna,
            v8: k(p.k_deg_pro) * pro,
        }
    }

    /// Writes the signed species balances into `out`.
    pub fn balances(&self, out: &mut [T]) {
        let operator_binding = self.v1_f - self.v1_r;
        let repressor_capture = self.v2_f - self.v2_r;
        let complex_capture = self.v3_f - self.v3_r;

        out[Species::FreeDna.index()] = self.v4 - operator_binding;
        out[Species::DnaRepressor.index()] = operator_binding - complex_capture;
        out[Species::InducerRepressorDna.index()] = complex_capture - self.v4;
        out[Species::FreeRepressor.index()] = T::zero() - operator_binding - repressor_capture;
        out[Species::Inducer.index()] = T::zero() - repressor_capture - complex_capture;
        out[Species::InducerRepressor.index()] = self.v4 + repressor_capture;
        out[Species::Mrna.index()] = self.v5 - self.v7;
        out[Species::Reporter.index()] = self.v6 - self.v8;
    }
}

/// The lac switch bound to one validated parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LacOperon {
    params: KineticParameters,
}

impl LacOperon {
    /// Validates the parameters eagerly; a constructed model never sees
    /// negative rates or empty pools.
    pub fn new(params: KineticParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &KineticParameters {
        &self.params
    }

    pub fn baseline_state(&self, inducer: f64) -> Result<SpeciesState> {
        self.params.baseline_state(inducer)
    }

    /// Rejects starting states the network cannot reach: non-finite or
    /// negative concentrations, and operator or repressor pools that do not
    /// add up to the parameter totals.
    pub fn check_initial_state(&self, state: &SpeciesState) -> Result<()> {
        if let Some(species) = Species::ALL.into_iter().find(|s| !state[*s].is_finite()) {
            return Err(ModelError::InvalidParameter {
                name: species.name(),
                value: state[species],
                reason: "initial concentration must be finite",
            });
        }
        let (species, lowest) = state.min_concentration();
        if lowest < 0.0 {
            return Err(ModelError::InvalidParameter {
                name: species.name(),
                value: lowest,
                reason: "initial concentration must be non-negative",
            });
        }
        for (pool, name, reason) in [
            (
                Pool::Operator,
                "dna_total",
                "operator species in the initial state do not sum to dna_total",
            ),
            (
                Pool::Repressor,
                "laci_total",
                "repressor species in the initial state do not sum to laci_total",
            ),
        ] {
            let expected = pool.expected(&self.params, state);
            let observed = pool.total(state);
            if (observed - expected).abs() > DEFAULT_POOL_TOLERANCE * expected {
                return Err(ModelError::InvalidParameter {
                    name,
                    value: observed,
                    reason,
                });
            }
        }
        Ok(())
    }

    pub fn fluxes(&self, state: &SpeciesState) -> Fluxes<f64> {
        Fluxes::evaluate(&self.params, state.as_slice())
    }

    pub fn derivative(&self, state: &SpeciesState) -> SpeciesState {
        let mut out = SpeciesState::zeros();
        self.fluxes(state).balances(out.as_mut_slice());
        out
    }

    pub fn jacobian(&self, state: &SpeciesState) -> DMatrix<f64> {
        autodiff::jacobian(self, 0.0, state.as_slice())
    }
}

impl<T: Scalar> DynamicalSystem<T> for LacOperon {
    fn dimension(&self) -> usize {
        SPECIES_COUNT
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        Fluxes::evaluate(&self.params, x).balances(out);
    }
}
