#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::multiple_crate_versions)]

//! BlinkChat server: REST API, WebSocket broker, and storage backends.

pub mod app_state;
pub mod auth;
pub mod db;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
mod tracer;
pub mod ws;
