//! Command handlers.

pub mod config;
pub mod import;
pub mod serve;
