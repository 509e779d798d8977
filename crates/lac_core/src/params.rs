//! Kinetic constants and conserved pool sizes of the lac switch.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::species::{Species, SpeciesState};

/// Rate constants (s⁻¹ or M⁻¹s⁻¹) and pool totals (M).
///
/// The defaults are a 1 nM operator, 20 nM repressor parameterisation with
/// fast binding and a very stable reporter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KineticParameters {
    /// Repressor binding to free operator.
    pub k_on_1: f64,
    pub k_off_1: f64,
    /// Inducer binding to free repressor.
    pub k_on_2: f64,
    pub k_off_2: f64,
    /// Inducer binding to operator-bound repressor.
    pub k_on_3: f64,
    pub k_off_3: f64,
    /// Release of the inducer–repressor complex from the operator.
    pub k_release: f64,
    pub k_tc: f64,
    pub k_tl: f64,
    pub k_deg_mrna: f64,
    pub k_deg_pro: f64,
    pub dna_total: f64,
    pub laci_total: f64,
}

impl Default for KineticParameters {
    fn default() -> Self {
        Self {
            k_on_1: 1e7,
            k_off_1: 0.01,
            k_on_2: 1e5,
            k_off_2: 1.0,
            k_on_3: 1e5,
            k_off_3: 1.0,
            k_release: 10.0,
            k_tc: 0.3,
            k_tl: 2.0,
            k_deg_mrna: 0.05,
            k_deg_pro: 1e-5,
            dna_total: 1e-9,
            laci_total: 2e-8,
        }
    }
}

impl KineticParameters {
    pub const NAMES: [&'static str; 13] = [
        "k_on_1",
        "k_off_1",
        "k_on_2",
        "k_off_2",
        "k_on_3",
        "k_off_3",
        "k_release",
        "k_tc",
        "k_tl",
        "k_deg_mrna",
        "k_deg_pro",
        "dna_total",
        "laci_total",
    ];

    /// Builds a parameter set from named values. Every name must appear;
    /// unknown names are rejected rather than ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut slots: [Option<f64>; 13] = [None; 13];
        for (name, value) in pairs {
            let idx = Self::NAMES
                .iter()
                .position(|n| *n == name)
                .ok_or_else(|| ModelError::UnknownParameter(name.to_string()))?;
            slots[idx] = Some(value);
        }

        let mut values = [0.0; 13];
        for (idx, slot) in slots.iter().enumerate() {
            values[idx] = slot.ok_or(ModelError::MissingParameter(Self::NAMES[idx]))?;
        }

        let params = Self {
            k_on_1: values[0],
            k_off_1: values[1],
            k_on_2: values[2],
            k_off_2: values[3],
            k_on_3: values[4],
            k_off_3: values[5],
            k_release: values[6],
            k_tc: values[7],
            k_tl: values[8],
            k_deg_mrna: values[9],
            k_deg_pro: values[10],
            dna_total: values[11],
            laci_total: values[12],
        };
        params.validate()?;
        Ok(params)
    }

    /// Named values in [`KineticParameters::NAMES`] order.
    pub fn pairs(&self) -> [(&'static str, f64); 13] {
        let values = [
            self.k_on_1,
            self.k_off_1,
            self.k_on_2,
            self.k_off_2,
            self.k_on_3,
            self.k_off_3,
            self.k_release,
            self.k_tc,
            self.k_tl,
            self.k_deg_mrna,
            self.k_deg_pro,
            self.dna_total,
            self.laci_total,
        ];
        let mut out = [("", 0.0); 13];
        for (idx, value) in values.into_iter().enumerate() {
            out[idx] = (Self::NAMES[idx], value);
        }
        out
    }

    /// Rejects negative or non-finite constants and non-positive pool totals.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.pairs() {
            if !value.is_finite() {
                return Err(ModelError::InvalidParameter {
                    name,
                    value,
                    reason: "must be finite",
                });
            }
            let is_pool = name == "dna_total" || name == "laci_total";
            if is_pool && value <= 0.0 {
                return Err(ModelError::InvalidParameter {
                    name,
                    value,
                    reason: "pool total must be positive",
                });
            }
            if value < 0.0 {
                return Err(ModelError::InvalidParameter {
                    name,
                    value,
                    reason: "rate constant must be non-negative",
                });
            }
        }
        Ok(())
    }

    /// Starting state with every operator repressed and the remaining
    /// repressor free: no inducer complexes, no transcript, no reporter.
    pub fn baseline_state(&self, inducer: f64) -> Result<SpeciesState> {
        self.validate()?;
        if self.laci_total < self.dna_total {
            return Err(ModelError::InvalidParameter {
                name: "laci_total",
                value: self.laci_total,
                reason: "baseline needs at least one repressor per operator",
            });
        }
        if !(inducer.is_finite() && inducer >= 0.0) {
            return Err(ModelError::InvalidParameter {
                name: "inducer",
                value: inducer,
                reason: "initial inducer must be a finite non-negative concentration",
            });
        }

        let mut state = SpeciesState::zeros();
        state[Species::DnaRepressor] = self.dna_total;
        state[Species::FreeRepressor] = self.laci_total - self.dna_total;
        state[Species::Inducer] = inducer;
        Ok(state)
    }

    /// The smallest non-zero first-order rate, a lower bound on how fast the
    /// slowest relaxing species settles.
    pub fn slowest_rate(&self) -> Option<f64> {
        [
            self.k_off_1,
            self.k_off_2,
            self.k_off_3,
            self.k_release,
            self.k_deg_mrna,
            self.k_deg_pro,
        ]
        .into_iter()
        .filter(|k| *k > 0.0)
        .reduce(f64::min)
    }
}
