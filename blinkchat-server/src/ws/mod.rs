//! Real-time delivery over WebSocket.
//!
//! [`client`] owns one connection and its outbound queue, [`registry`] maps
//! users to their live connections, and [`hub`] runs the serialized dispatch
//! worker and the broadcast helpers. [`handler`] is the `/ws` upgrade route.

pub mod client;
pub mod handler;
pub mod hub;
pub mod registry;

pub use client::{Client, Delivery};
pub use hub::{Hub, HubWorker};
pub use registry::Registry;
