//! Import, render, and publication orchestration.
//!
//! [`importer::Importer`] is the entry point for batches and connector
//! variants; [`reaper::Reaper`] removes workflow families and cleans up
//! interrupted publications.

pub mod batch;
pub mod compose;
pub mod config;
pub mod error;
pub mod generator;
pub mod importer;
pub mod lock;
pub mod materialize;
pub mod publication;
pub mod reaper;
pub mod resolver;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testing;

pub use batch::DefinitionBatch;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use importer::{BatchReport, ConnectorSpec, Importer};
pub use reaper::Reaper;
