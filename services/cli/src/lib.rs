//! Chalkboard CLI Library Crate
//!
//! Configuration, argument parsing and backend wiring for the `chalkboard`
//! binary. The binary in `bin/chalkboard.rs` is a thin wrapper around this
//! library.

pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
