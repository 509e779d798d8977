//! WASM bindings for the lac operon model.
//!
//! `WasmLacOperon` covers single time courses and model inspection;
//! `WasmDoseResponseRunner` drives a sweep in batches so the page can report
//! progress between calls.

mod model;
mod shared;
mod sweep_runner;

pub use model::WasmLacOperon;
pub use sweep_runner::WasmDoseResponseRunner;
