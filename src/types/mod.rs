//! Core domain types for the CI worker.
//!
//! Identifiers, job descriptions and check results shared by the pipeline,
//! the reporter and the trigger surfaces.

pub mod check;
pub mod ids;
pub mod job;

pub use check::{Check, StepResult, check_name};
pub use ids::{PrNumber, RepoId, Sha};
pub use job::{JobRequest, WORKSPACE_VAR};
