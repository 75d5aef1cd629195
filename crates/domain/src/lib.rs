//! Shared domain types for Courier.
//!
//! Holds the configuration tree (TOML, defaults per field, validation)
//! and the structured trace events emitted across all Courier crates.

pub mod config;
pub mod trace;
