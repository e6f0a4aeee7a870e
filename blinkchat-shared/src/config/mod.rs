//! # Configuration
//!
//! Server configuration loading, environment overrides, and validation.

pub mod server;
