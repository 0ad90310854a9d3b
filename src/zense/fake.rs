//! In-process stand-in for the Zense controller, used by the tests.
//!
//! Listens on an ephemeral localhost port, answers the wire protocol and
//! records every received frame with its arrival time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::DeviceId;

#[derive(Debug, Clone)]
pub(crate) struct FakeSetup {
    pub code: u32,
    pub devices: Vec<DeviceId>,
    pub names: HashMap<DeviceId, String>,
    pub levels: HashMap<DeviceId, i64>,
    /// Close the connection without answering when a frame contains this
    /// text, for the given number of times.
    pub drop_on: Option<(String, usize)>,
}

impl Default for FakeSetup {
    fn default() -> Self {
        Self {
            code: 1234,
            devices: vec![3, 5],
            names: HashMap::from([(3, "Kitchen".to_string())]),
            levels: HashMap::from([(3, 40), (5, 0)]),
            drop_on: None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub frame: String,
    pub at: Instant,
}

#[derive(Debug)]
struct FakeState {
    setup: FakeSetup,
    received: Vec<Received>,
    connections: usize,
}

pub(crate) struct FakeController {
    port: u16,
    code: u32,
    state: Arc<Mutex<FakeState>>,
}

impl FakeController {
    pub async fn start(setup: FakeSetup) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let code = setup.code;
        let state = Arc::new(Mutex::new(FakeState {
            setup,
            received: Vec::new(),
            connections: 0,
        }));

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.lock().unwrap().connections += 1;
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self { port, code, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.received().into_iter().map(|r| r.frame).collect()
    }

    /// Frames other than logins.
    pub fn device_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| !c.starts_with(">>Login"))
            .collect()
    }

    pub fn logins(&self) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(">>Login"))
            .count()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn set_level(&self, device: DeviceId, level: i64) {
        self.state.lock().unwrap().setup.levels.insert(device, level);
    }

    /// Waits until at least `count` non-login frames arrived.
    pub async fn wait_for_commands(&self, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let commands = self.device_commands();
            if commands.len() >= count || Instant::now() > deadline {
                return commands;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<FakeState>>) {
    let mut pending = String::new();
    let mut chunk = [0u8; 256];
    loop {
        let read = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.push_str(&String::from_utf8_lossy(&chunk[..read]));

        while let Some(end) = pending.find("<<") {
            let frame: String = pending.drain(..end + 2).collect();
            let reply = {
                let mut state = state.lock().unwrap();
                state.received.push(Received {
                    frame: frame.clone(),
                    at: Instant::now(),
                });
                if should_drop(&mut state.setup, &frame) {
                    None
                } else {
                    Some(answer(&state.setup, &frame))
                }
            };
            let Some(reply) = reply else {
                return;
            };
            if stream.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

fn should_drop(setup: &mut FakeSetup, frame: &str) -> bool {
    match &mut setup.drop_on {
        Some((needle, remaining)) if *remaining > 0 && frame.contains(needle.as_str()) => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

fn answer(setup: &FakeSetup, frame: &str) -> String {
    let body = frame.trim_start_matches(">>").trim_end_matches("<<");
    let words: Vec<&str> = body.split_whitespace().collect();
    match words.as_slice() {
        ["Login", code] => {
            if code.parse::<u32>().ok() == Some(setup.code) {
                ">>Login Ok<<".to_string()
            } else {
                ">>Login Failed<<".to_string()
            }
        }
        ["Get", "Devices"] => {
            let ids: Vec<String> = setup.devices.iter().map(ToString::to_string).collect();
            format!(">>Get Devices {}<<", ids.join(","))
        }
        ["Get", "Name", did] => {
            let name = did
                .parse::<DeviceId>()
                .ok()
                .and_then(|did| setup.names.get(&did))
                .map_or_else(|| "Timeout".to_string(), |name| format!("'{name}'"));
            format!(">>Get Name {name}<<")
        }
        ["Get", did] => {
            let level = did
                .parse::<DeviceId>()
                .ok()
                .and_then(|did| setup.levels.get(&did))
                .copied()
                .unwrap_or(0);
            format!(">>Get {level}<<")
        }
        _ => format!(">>{body} Ok<<"),
    }
}
