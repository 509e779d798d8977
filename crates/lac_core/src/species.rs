//! Species of the lac switch and the fixed-size concentration vector over them.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Number of species in the network.
pub const SPECIES_COUNT: usize = 8;

/// Every species in the network, in state-vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    /// Unoccupied operator, available for transcription.
    FreeDna,
    /// Repressor bound to the operator (LD).
    DnaRepressor,
    /// Free inducer, IPTG.
    Inducer,
    /// Inducer bound to free repressor (IL).
    InducerRepressor,
    /// Inducer bound to operator-bound repressor (ILD).
    InducerRepressorDna,
    /// Free repressor, LacI.
    FreeRepressor,
    Mrna,
    /// Expressed reporter (β-galactosidase).
    Reporter,
}

impl Species {
    pub const ALL: [Species; SPECIES_COUNT] = [
        Species::FreeDna,
        Species::DnaRepressor,
        Species::Inducer,
        Species::InducerRepressor,
        Species::InducerRepressorDna,
        Species::FreeRepressor,
        Species::Mrna,
        Species::Reporter,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Species::FreeDna => "free_DNA",
            Species::DnaRepressor => "DNA_repressor",
            Species::Inducer => "inducer",
            Species::InducerRepressor => "inducer_repressor",
            Species::InducerRepressorDna => "inducer_repressor_DNA",
            Species::FreeRepressor => "free_repressor",
            Species::Mrna => "mRNA",
            Species::Reporter => "reporter_protein",
        }
    }

    pub fn from_name(name: &str) -> Option<Species> {
        Species::ALL.into_iter().find(|s| s.name() == name)
    }
}

/// Concentrations (M) of all species, indexed by [`Species`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeciesState {
    values: [f64; SPECIES_COUNT],
}

impl SpeciesState {
    pub fn zeros() -> Self {
        Self::default()
    }

    pub fn from_array(values: [f64; SPECIES_COUNT]) -> Self {
        Self { values }
    }

    /// Builds a state from a slice in [`Species::ALL`] order.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let values: [f64; SPECIES_COUNT] = values.try_into().ok()?;
        Some(Self { values })
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn get(&self, species: Species) -> f64 {
        self.values[species.index()]
    }

    pub fn set(&mut self, species: Species, value: f64) {
        self.values[species.index()] = value;
    }

    /// Copy of this state with one species replaced.
    pub fn with(mut self, species: Species, value: f64) -> Self {
        self.set(species, value);
        self
    }

    /// The lowest concentration and the species holding it.
    pub fn min_concentration(&self) -> (Species, f64) {
        Species::ALL
            .into_iter()
            .map(|s| (s, self.get(s)))
            .fold((Species::FreeDna, f64::INFINITY), |best, cur| {
                if cur.1 < best.1 {
                    cur
                } else {
                    best
                }
            })
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl Index<Species> for SpeciesState {
    type Output = f64;

    fn index(&self, species: Species) -> &f64 {
        &self.values[species.index()]
    }
}

impl IndexMut<Species> for SpeciesState {
    fn index_mut(&mut self, species: Species) -> &mut f64 {
        &mut self.values[species.index()]
    }
}
