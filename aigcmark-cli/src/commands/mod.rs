//! CLI command implementations.

pub mod embed;
pub mod recover;
