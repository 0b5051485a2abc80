//! Client scope classification declared at handshake time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of client a connection represents.
///
/// Recorded once at connect time and never renegotiated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientScope {
    /// An end-user application instance (phone, desktop, web).
    #[default]
    UserScoped,
    /// An automation agent bound to a single chat session.
    SessionScoped,
    /// A machine-level daemon.
    MachineScoped,
}

impl ClientScope {
    /// Wire name, also used as the metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserScoped => "user-scoped",
            Self::SessionScoped => "session-scoped",
            Self::MachineScoped => "machine-scoped",
        }
    }
}

impl fmt::Display for ClientScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
