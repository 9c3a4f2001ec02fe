//! Command implementations for the Strata CLI.

pub mod config;
pub mod simulate;
