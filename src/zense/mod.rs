//! # Zense Controller Module
//!
//! Speaks the line-oriented TCP protocol of the Zense home-lighting controller.
//!
//! ## Why This Module Exists
//!
//! The controller accepts exactly one authenticated session and answers one
//! command at a time. Everything that touches the socket lives behind this
//! module so the rest of the bridge only ever sees typed results.
//!
//! ## Module Architecture
//!
//! ```text
//! zense/
//! ├── protocol.rs        - Command framing and strict reply decoding
//! ├── link.rs            - Typestate TCP link (Connected ──► Authenticated)
//! └── session_client.rs  - Serialized, self-healing session used by the scheduler
//! ```
//!
//! ## Error Handling Strategy
//!
//! Failures are reported as [`SessionError`]. Callers treat every error the
//! same way: the operation is "not confirmed" and nothing is published.

pub mod link;
pub mod protocol;
pub mod session_client;

#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

pub use session_client::{SessionClient, SessionSettings, SessionState};

/// Device identifier assigned by the controller.
pub type DeviceId = u32;

/// Errors raised while talking to the controller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// TCP connect failed or did not finish within the I/O timeout.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The controller answered the login request without the accepted marker.
    #[error("login rejected by controller: {0:?}")]
    LoginRejected(String),

    /// Socket error while sending or receiving (broken pipe, reset, ...).
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The controller closed the connection before terminating its reply.
    #[error("controller closed the connection")]
    Closed,

    /// No complete reply within the configured I/O timeout.
    #[error("controller did not answer within {0:?}")]
    Timeout(Duration),
}
