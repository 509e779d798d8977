//! Conversions shared by the exported types.

use anyhow::Context;
use lac_core::{KineticParameters, LacOperon};
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::JsValue;

/// Builds a validated model from parallel name/value lists.
pub(crate) fn build_model(
    param_names: &[String],
    param_values: &[f64],
) -> anyhow::Result<LacOperon> {
    if param_names.len() != param_values.len() {
        anyhow::bail!(
            "Parameter name/value count mismatch: {} names, {} values.",
            param_names.len(),
            param_values.len()
        );
    }
    let pairs = param_names
        .iter()
        .map(String::as_str)
        .zip(param_values.iter().copied());
    let params = KineticParameters::from_pairs(pairs).context("Invalid kinetic parameters")?;
    LacOperon::new(params).context("Model construction failed")
}

/// Flattens an error chain into a single JS string.
pub(crate) fn js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}
