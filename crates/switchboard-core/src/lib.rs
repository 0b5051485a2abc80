//! # switchboard-core
//!
//! Shared vocabulary for the Switchboard connection and event-routing layer.
//!
//! - **Branded IDs**: `UserId`, `SessionId`, `MachineId`, `ConnectionId`,
//!   `RequestId` as newtypes so a session id can never be passed where a
//!   machine id is expected
//! - **Client scope**: [`ClientScope`], the tag a connection declares at
//!   handshake time
//! - **Wire frames**: [`ClientFrame`] / [`ServerFrame`], the JSON protocol
//!   spoken over the primary WebSocket transport
//! - **Ephemeral payloads**: [`EphemeralPayload`], the reserved transient
//!   event shapes
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod codes;
pub mod ephemeral;
pub mod frames;
pub mod ids;
pub mod logging;
pub mod scope;

pub use ephemeral::{EphemeralPayload, now_ms};
pub use frames::{ClientFrame, ErrorBody, ServerFrame};
pub use ids::{ConnectionId, MachineId, RequestId, SessionId, UserId};
pub use scope::ClientScope;
