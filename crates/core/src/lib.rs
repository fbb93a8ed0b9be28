//! Pure domain logic for publishing generated phenotype workflows.
//!
//! Nothing in this crate performs I/O: persistence lives in
//! `phenoflow-db`, remote git access in `phenoflow-github`, and
//! orchestration in `phenoflow-pipeline`.

pub mod codelist;
pub mod definition;
pub mod descriptor;
pub mod diff;
pub mod error;
pub mod hashing;
pub mod naming;
pub mod types;
