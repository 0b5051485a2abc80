//! WebSocket connection management, heartbeat, frame dispatch and the
//! per-socket session loop.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
