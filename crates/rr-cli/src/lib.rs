//! Machine run report CLI library.
//!
//! This crate provides the CLI interface for importing production events and
//! generating usage reports.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
