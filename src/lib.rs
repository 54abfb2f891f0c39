//! Powered Up Bridge - Rust Implementation
//!
//! Exposes Powered Up robotics hubs over HTTP and WebSocket.
//!
//! This library provides:
//! - Hub discovery, connection and disconnect tracking
//! - Motor and LED commands with device-type validation
//! - Per-subscriber sensor event streams
//! - Server-Sent Events for hub lifecycle updates
//! - A simulated driver for running without hardware

pub mod api;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod lookup;
pub mod registry;
