//! # Session Client
//!
//! Owns the single authenticated session with the controller and serializes
//! every device operation over it.
//!
//! ## Session Lifecycle
//!
//! ```text
//! Disconnected ──► Connected ──► Authenticated
//!      ▲                               │
//!      └──────── any I/O error ────────┘
//! ```
//!
//! `Connected` only exists inside a single call, as a `Link<Connected>`
//! waiting for its login reply; between calls the session is either
//! disconnected or authenticated.
//!
//! Any call made while not authenticated first opens a fresh socket and logs
//! in. A transport failure during a request drops the socket and the whole
//! operation (connect, login, resend) is retried once more. Connect and login
//! failures are not retried; the next call simply starts over.
//!
//! There is no keep-alive. A dead connection is only noticed by the next
//! request, which is exactly what the single retry is for.

use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::link::{Authenticated, Connected, Link};
use super::protocol::{self, Command};
use super::{DeviceId, SessionError};

/// Connection parameters for the controller session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    /// Pre-shared access code sent with the login request
    pub code: u32,
    /// Bound for connect and for every single read or write
    pub io_timeout: Duration,
    /// Additional attempts after a transport failure mid-request
    pub retries: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            host: "192.168.1.235".to_string(),
            port: 10001,
            code: 16713,
            io_timeout: Duration::from_secs(12),
            retries: 1,
        }
    }
}

/// Session state as seen between calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Authenticated,
}

pub struct SessionClient {
    settings: SessionSettings,
    link: Mutex<Option<Link<Authenticated>>>,
}

impl SessionClient {
    pub fn new(settings: SessionSettings) -> Self {
        info!(
            "Controller session targets {}:{} (timeout {:?})",
            settings.host, settings.port, settings.io_timeout
        );
        Self {
            settings,
            link: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Current session state. Waits for an in-flight operation to finish.
    pub async fn state(&self) -> SessionState {
        if self.link.lock().await.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Disconnected
        }
    }

    async fn establish(&self) -> Result<Link<Authenticated>, SessionError> {
        let link = Link::<Connected>::open(
            &self.settings.host,
            self.settings.port,
            self.settings.io_timeout,
        )
        .await?;
        debug!("Connected to {}, logging in", link.peer());
        link.login(self.settings.code).await
    }

    /// Sends one command and returns the raw reply.
    ///
    /// Concurrent callers queue on the session lock; only one command is ever
    /// in flight.
    pub async fn send(&self, command: Command) -> Result<String, SessionError> {
        let mut slot = self.link.lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut link = match slot.take() {
                Some(link) => link,
                None => match self.establish().await {
                    Ok(link) => link,
                    Err(e) => {
                        warn!("Controller session unavailable: {}", e);
                        return Err(e);
                    }
                },
            };

            debug!("TX {} (attempt {})", command, attempt);
            match link.request(&command).await {
                Ok(reply) => {
                    debug!("RX {:?}", reply);
                    *slot = Some(link);
                    return Ok(reply);
                }
                Err(e) => {
                    warn!("Send of {} failed: {} (attempt {})", command, e, attempt);
                    drop(link);
                    if attempt > self.settings.retries {
                        return Err(e);
                    }
                }
            }
        }
    }

    pub async fn set_off(&self, device: DeviceId) -> Result<(), SessionError> {
        self.send(Command::SetOff(device)).await.map(drop)
    }

    pub async fn set_on(&self, device: DeviceId) -> Result<(), SessionError> {
        self.send(Command::SetOn(device)).await.map(drop)
    }

    pub async fn fade(&self, device: DeviceId, level: u8) -> Result<(), SessionError> {
        self.send(Command::fade(device, level)).await.map(drop)
    }

    /// Raw level of a device; `Ok(None)` when the reply could not be decoded.
    pub async fn get_level(&self, device: DeviceId) -> Result<Option<i64>, SessionError> {
        let reply = self.send(Command::GetLevel(device)).await?;
        Ok(protocol::decode_level(&reply))
    }

    /// Device ids known to the controller; `Ok(None)` when the reply could not be decoded.
    pub async fn get_devices(&self) -> Result<Option<Vec<DeviceId>>, SessionError> {
        let reply = self.send(Command::GetDevices).await?;
        Ok(protocol::decode_devices(&reply))
    }

    /// Display name of a device, falling back to `Device_<did>` when unset.
    pub async fn get_name(&self, device: DeviceId) -> Result<String, SessionError> {
        let reply = self.send(Command::GetName(device)).await?;
        Ok(protocol::decode_name(&reply, device))
    }
}
