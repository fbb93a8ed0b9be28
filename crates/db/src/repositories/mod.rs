//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod parent_link_repo;
pub mod step_repo;
pub mod workflow_repo;

pub use parent_link_repo::ParentLinkRepo;
pub use step_repo::StepRepo;
pub use workflow_repo::WorkflowRepo;
