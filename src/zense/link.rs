//! Typestate TCP link to the controller.
//!
//! A [`Link`] only exists once the TCP connection is open. Logging in consumes
//! the `Connected` link and yields an `Authenticated` one, so device commands
//! can never be sent over an unauthenticated socket. Dropping a link closes
//! the socket.

use statum::{machine, state};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::protocol::{self, Command, FRAME_END};
use super::SessionError;

const READ_CHUNK: usize = 1024;

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Connected,
    Authenticated,
}

#[machine]
#[derive(Debug)]
pub struct Link<S: LinkState> {
    stream: TcpStream,
    peer: String,
    io_timeout: Duration,
}

impl<S: LinkState> Link<S> {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    // One framed request, then read until the terminator shows up.
    async fn exchange(&mut self, frame: &str) -> Result<String, SessionError> {
        timeout(self.io_timeout, self.stream.write_all(frame.as_bytes()))
            .await
            .map_err(|_| SessionError::Timeout(self.io_timeout))??;

        let mut reply = String::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = timeout(self.io_timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|_| SessionError::Timeout(self.io_timeout))??;
            if read == 0 {
                debug!("{} closed the connection after {:?}", self.peer, reply);
                return Err(SessionError::Closed);
            }
            reply.push_str(&String::from_utf8_lossy(&chunk[..read]));
            if reply.contains(FRAME_END) {
                return Ok(reply);
            }
        }
    }
}

impl Link<Connected> {
    /// Opens the TCP connection, bounded by `io_timeout`.
    pub async fn open(host: &str, port: u16, io_timeout: Duration) -> Result<Self, SessionError> {
        let peer = format!("{host}:{port}");
        let stream = match timeout(io_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(SessionError::Connect { addr: peer, source }),
            Err(_) => {
                return Err(SessionError::Connect {
                    addr: peer,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no connection after {io_timeout:?}"),
                    ),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", peer, e);
        }
        Ok(Self::new(stream, peer, io_timeout))
    }

    /// Sends the access code and requires the exact login-accepted marker.
    pub async fn login(mut self, code: u32) -> Result<Link<Authenticated>, SessionError> {
        let reply = self.exchange(&Command::Login(code).encode()).await?;
        if protocol::login_accepted(&reply) {
            debug!("Logged in to {}", self.peer);
            Ok(self.transition())
        } else {
            warn!("Login to {} failed: {:?}", self.peer, reply);
            Err(SessionError::LoginRejected(reply))
        }
    }
}

impl Link<Authenticated> {
    /// Sends one device command and returns the raw framed reply.
    pub async fn request(&mut self, command: &Command) -> Result<String, SessionError> {
        self.exchange(&command.encode()).await
    }
}
