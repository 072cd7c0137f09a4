//! Tidemark CLI - Command-line interface for the Tidemark migration engine.
//!
//! This crate provides the `tidemark` binary: creating migrations, applying
//! and reverting them against SQLite or PostgreSQL, and reading the ledger
//! and audit log.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
