//! The build pipeline: process supervision, packaging, and the
//! orchestrator that drives one job from upload to artifact.

pub mod config;
pub mod orchestrator;
pub mod package;
pub mod process;
pub mod transform;
