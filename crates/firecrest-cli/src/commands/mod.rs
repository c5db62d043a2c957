//! CLI command implementations.

pub mod common;
pub mod jobs;
pub mod ls;
pub mod status;
pub mod submit;
pub mod tasks;
