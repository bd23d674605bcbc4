//! Domain types for the prebake build worker.
//!
//! Holds everything the pipeline and HTTP layers share: the job model and
//! its store, archive validation/extraction, per-job staging directories,
//! the signed download-token scheme, and the error taxonomy.

pub mod archive;
pub mod error;
pub mod job;
pub mod staging;
pub mod store;
pub mod token;
