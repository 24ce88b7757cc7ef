//! Build script rendering and generation.

pub mod generator;
pub mod vdf;

pub use generator::{GeneratedScript, ScriptFile, ScriptGenerator, ScriptSummary};
