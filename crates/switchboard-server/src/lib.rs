//! # switchboard-server
//!
//! Real-time connection and event routing for one user's apps, session
//! agents and machine daemons.
//!
//! - [`registry`]: live connections per user, tagged by scope
//! - [`broadcast`]: best-effort ephemeral fan-out with recipient filters
//! - [`rpc`]: method registration and request/response correlation
//! - [`gate`]: handshake validation, admission and idempotent release
//! - [`websocket`]: per-socket session loop, heartbeat and frame dispatch
//! - [`bridge`] / [`listener`]: raw splice of foreign upgrades to a gateway
//! - [`notify`]: shared-secret notification trigger
//! - Graceful shutdown via [`shutdown::ShutdownCoordinator`]

#![deny(unsafe_code)]

pub mod bridge;
pub mod broadcast;
pub mod config;
pub mod gate;
pub mod health;
pub mod listener;
pub mod metrics;
pub mod notify;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, SwitchboardServer};
