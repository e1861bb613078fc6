//! media_guard
//!
//! Reversible file operations for media libraries: every move, copy, delete
//! or rename is preflighted, staged, journaled and can be undone or rolled
//! back after a crash.

pub mod cli;
pub mod core;
pub mod error;
pub mod models;
pub mod preflight;
pub mod utils;

pub use error::{Error, Result};
