//! Core safety pipeline: commands, history, journal, staging, rollback.

pub mod commands;
pub mod invoker;
pub mod journal;
pub mod notify;
pub mod rollback;
pub mod scheduler;
pub mod staging;
