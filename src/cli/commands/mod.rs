//! CLI command implementations.

pub mod check;
pub mod journal;
pub mod staging;
