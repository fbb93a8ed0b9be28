//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` entity struct matching the database
//! row and the create DTOs its repository accepts.

pub mod parent_link;
pub mod step;
pub mod workflow;
