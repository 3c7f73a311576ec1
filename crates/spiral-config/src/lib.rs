//! Runtime configuration shared by SpiralTorch crates: deterministic RNG
//! derivation and tracing subscriber setup.

pub mod determinism;
pub mod tracing;

pub use determinism::{rng_from_label, rng_from_optional, DeterminismConfig};
