//! Data models shared across the pipeline.

pub mod command;
pub mod config;
pub mod journal;
pub mod notification;
pub mod preflight;
pub mod staging;
pub mod transaction;
