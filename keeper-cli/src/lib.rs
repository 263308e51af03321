//! Command-line front-end for bheekeeper.
//!
//! Parses arguments with `clap` and maps each subcommand onto one
//! [`keeper_executor::Keeper`] operation.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod cli;
pub mod commands;
pub mod error;

pub use cli::{Cli, Command};
pub use error::CliError;
