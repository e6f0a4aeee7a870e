//! Database bootstrap and health checks.

pub mod bootstrap;
