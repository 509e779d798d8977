//! Stepped dose-response sweep runner.

use anyhow::Context;
use lac_core::sweep::SweepRunner;
use lac_core::{DoseResponseSweep, Horizon, InducerRange, IntegratorSettings, SweepSettings};
use serde_wasm_bindgen::from_value;
use wasm_bindgen::prelude::*;

use crate::shared::{build_model, js_error, serialize};

/// WASM-exported runner for dose-response sweeps.
/// Evaluates a few inducer levels per call so progress can be reported.
#[wasm_bindgen]
pub struct WasmDoseResponseRunner {
    runner: Option<SweepRunner>,
}

fn build_runner(
    param_names: &[String],
    param_values: &[f64],
    range: InducerRange,
    t_end: f64,
    integrator: IntegratorSettings,
) -> anyhow::Result<SweepRunner> {
    let model = build_model(param_names, param_values)?;
    let settings = SweepSettings {
        horizon: Horizon::with_times(0.0, t_end, vec![t_end]).context("Invalid sweep horizon")?,
        integrator,
        parallel: false,
    };
    let sweep =
        DoseResponseSweep::from_model(model, range, settings).context("Sweep init failed")?;
    Ok(sweep.into_runner())
}

#[wasm_bindgen]
impl WasmDoseResponseRunner {
    /// Create a runner over `count` log-spaced inducer levels in
    /// `[lower, upper]`, each integrated from 0 to `t_end`.
    #[wasm_bindgen(constructor)]
    pub fn new(
        param_names: Vec<String>,
        param_values: Vec<f64>,
        lower: f64,
        upper: f64,
        count: u32,
        t_end: f64,
    ) -> Result<WasmDoseResponseRunner, JsValue> {
        console_error_panic_hook::set_once();

        let range = InducerRange {
            lower,
            upper,
            count: count as usize,
        };
        let runner = build_runner(
            &param_names,
            &param_values,
            range,
            t_end,
            IntegratorSettings::default(),
        )
        .map_err(js_error)?;
        Ok(WasmDoseResponseRunner {
            runner: Some(runner),
        })
    }

    /// Same as the constructor, with serialized `IntegratorSettings`.
    pub fn with_settings(
        param_names: Vec<String>,
        param_values: Vec<f64>,
        lower: f64,
        upper: f64,
        count: u32,
        t_end: f64,
        settings_val: JsValue,
    ) -> Result<WasmDoseResponseRunner, JsValue> {
        console_error_panic_hook::set_once();

        let integrator: IntegratorSettings = from_value(settings_val)
            .map_err(|e| JsValue::from_str(&format!("Invalid integrator settings: {}", e)))?;
        let range = InducerRange {
            lower,
            upper,
            count: count as usize,
        };
        let runner = build_runner(&param_names, &param_values, range, t_end, integrator)
            .map_err(js_error)?;
        Ok(WasmDoseResponseRunner {
            runner: Some(runner),
        })
    }

    /// Check if every point has been evaluated or the sweep was cancelled.
    pub fn is_done(&self) -> bool {
        self.runner.as_ref().map_or(true, |runner| runner.is_done())
    }

    /// Evaluate up to `batch_size` more points and return progress.
    pub fn run_points(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let runner = self
            .runner
            .as_mut()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        let progress = runner.run_points(batch_size as usize);
        serialize(&progress)
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let runner = self
            .runner
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        serialize(&runner.progress())
    }

    /// Abandon the remaining points; they come back as cancelled gaps.
    pub fn cancel(&mut self) {
        if let Some(runner) = self.runner.as_mut() {
            runner.cancel();
        }
    }

    /// Get the curve. Consumes the runner.
    pub fn get_result(&mut self) -> Result<JsValue, JsValue> {
        let runner = self
            .runner
            .take()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        serialize(&runner.into_curve())
    }
}
