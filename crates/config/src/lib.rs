//! Configuration module for cinedrop
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
