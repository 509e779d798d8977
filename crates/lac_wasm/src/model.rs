//! Single-model bindings: time courses, rate evaluation and diagnostics.

use anyhow::Context;
use lac_core::conservation::conservation_report;
use lac_core::steady_state::assess;
use lac_core::{
    Horizon, Integrator, IntegratorSettings, LacOperon, Species, SpeciesState, Trajectory,
};
use js_sys::Float64Array;
use serde_wasm_bindgen::from_value;
use wasm_bindgen::prelude::*;

use crate::shared::{build_model, js_error, serialize};

#[wasm_bindgen]
pub struct WasmLacOperon {
    model: LacOperon,
    integrator: Integrator,
}

impl WasmLacOperon {
    fn state_from(&self, state: &[f64]) -> anyhow::Result<SpeciesState> {
        SpeciesState::from_slice(state).with_context(|| {
            format!(
                "State must hold {} concentrations, got {}",
                Species::ALL.len(),
                state.len()
            )
        })
    }

    fn final_reporter(&self, inducer: f64, t_end: f64) -> anyhow::Result<f64> {
        let initial = self.model.baseline_state(inducer)?;
        let horizon = Horizon::with_times(0.0, t_end, vec![t_end])?;
        let trajectory = self
            .integrator
            .time_course(&self.model, &initial, &horizon)
            .with_context(|| format!("No steady state for inducer {inducer:e}"))?;
        trajectory
            .final_sample()
            .map(|(_, state)| state[Species::Reporter])
            .context("Trajectory is empty")
    }

    fn run_time_course(&self, inducer: f64, t_end: f64, samples: u32) -> anyhow::Result<Trajectory> {
        let initial = self.model.baseline_state(inducer)?;
        let horizon = Horizon::linspace(0.0, t_end, samples as usize)?;
        self.integrator
            .time_course(&self.model, &initial, &horizon)
            .context("Time course failed")
    }
}

#[wasm_bindgen]
impl WasmLacOperon {
    /// Builds the model from named kinetic parameters; every name must be
    /// present exactly once.
    #[wasm_bindgen(constructor)]
    pub fn new(param_names: Vec<String>, param_values: Vec<f64>) -> Result<WasmLacOperon, JsValue> {
        console_error_panic_hook::set_once();

        let model = build_model(&param_names, &param_values).map_err(js_error)?;
        let integrator = Integrator::new(IntegratorSettings::default())
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(WasmLacOperon { model, integrator })
    }

    /// Replaces the solver settings with a serialized `IntegratorSettings`.
    pub fn set_integrator_settings(&mut self, settings_val: JsValue) -> Result<(), JsValue> {
        let settings: IntegratorSettings = from_value(settings_val)
            .map_err(|e| JsValue::from_str(&format!("Invalid integrator settings: {}", e)))?;
        self.integrator =
            Integrator::new(settings).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(())
    }

    pub fn species_names(&self) -> Vec<String> {
        Species::ALL.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn baseline_state(&self, inducer: f64) -> Result<Vec<f64>, JsValue> {
        self.model
            .baseline_state(inducer)
            .map(|s| s.as_slice().to_vec())
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn derivative(&self, state: Vec<f64>) -> Result<Vec<f64>, JsValue> {
        let state = self.state_from(&state).map_err(js_error)?;
        Ok(self.model.derivative(&state).as_slice().to_vec())
    }

    /// Row-major Jacobian of the rate laws.
    pub fn jacobian(&self, state: Vec<f64>) -> Result<Vec<f64>, JsValue> {
        let state = self.state_from(&state).map_err(js_error)?;
        let jac = self.model.jacobian(&state);
        let n = jac.nrows();
        let mut out = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                out[i * n + j] = jac[(i, j)];
            }
        }
        Ok(out)
    }

    /// Integrates from the baseline at `inducer` over `samples` evenly spaced
    /// times and returns the serialized trajectory with its pool drift.
    pub fn time_course(&self, inducer: f64, t_end: f64, samples: u32) -> Result<JsValue, JsValue> {
        let trajectory = self
            .run_time_course(inducer, t_end, samples)
            .map_err(js_error)?;
        let drift = conservation_report(&trajectory, self.model.params());

        #[derive(serde::Serialize)]
        struct TimeCourse<'a> {
            species: Vec<&'static str>,
            trajectory: &'a Trajectory,
            drift: lac_core::conservation::ConservationReport,
        }
        serialize(&TimeCourse {
            species: Species::ALL.iter().map(|s| s.name()).collect(),
            trajectory: &trajectory,
            drift,
        })
    }

    /// Reporter concentration only, for plotting without deserializing the
    /// whole trajectory.
    pub fn reporter_series(
        &self,
        inducer: f64,
        t_end: f64,
        samples: u32,
    ) -> Result<Float64Array, JsValue> {
        let trajectory = self
            .run_time_course(inducer, t_end, samples)
            .map_err(js_error)?;
        Ok(Float64Array::from(
            trajectory.series(Species::Reporter).as_slice(),
        ))
    }

    /// Reporter concentration at `t_end` starting from the baseline at
    /// `inducer`.
    pub fn steady_reporter(&self, inducer: f64, t_end: f64) -> Result<f64, JsValue> {
        self.final_reporter(inducer, t_end).map_err(js_error)
    }

    /// Serialized steady-state diagnostics at `state`.
    pub fn assess_state(&self, state: Vec<f64>) -> Result<JsValue, JsValue> {
        let state = self.state_from(&state).map_err(js_error)?;
        serialize(&assess(&self.model, &state))
    }
}
