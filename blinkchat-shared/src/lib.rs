#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Models, WebSocket envelopes, and configuration shared by the BlinkChat crates.

pub mod config;
pub mod models;
