//! Command-line worker: wires configuration into the pipeline services and
//! runs one import or maintenance command.

pub mod cli;
pub mod services;
