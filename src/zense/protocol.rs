//! Wire format of the Zense controller.
//!
//! Every request and every reply is framed as `>>...<<`. Replies are decoded
//! by locating a known prefix and the terminator; anything else decodes to
//! `None` and is treated by callers as "no data".

use std::fmt;

use super::DeviceId;

pub const FRAME_START: &str = ">>";
pub const FRAME_END: &str = "<<";

/// Upper bound of the normalized brightness scale used on the wire.
pub const BRIGHTNESS_SCALE: u8 = 100;

const LOGIN_ACCEPTED: &str = ">>Login Ok<<";
const LEVEL_PREFIX: &str = ">>Get ";
const DEVICES_PREFIX: &str = ">>Get Devices ";
const NAME_PREFIX: &str = ">>Get Name ";
const NAME_UNSET: &str = "timeout";

/// A single request understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Login(u32),
    SetOff(DeviceId),
    SetOn(DeviceId),
    Fade(DeviceId, u8),
    GetLevel(DeviceId),
    GetDevices,
    GetName(DeviceId),
}

impl Command {
    /// Builds a fade command, clamping the level to the wire scale.
    pub fn fade(device: DeviceId, level: u8) -> Self {
        Command::Fade(device, level.min(BRIGHTNESS_SCALE))
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{FRAME_START}")?;
        match self {
            Command::Login(code) => write!(f, "Login {code}")?,
            Command::SetOff(did) => write!(f, "Set {did} 0")?,
            Command::SetOn(did) => write!(f, "Set {did} {BRIGHTNESS_SCALE}")?,
            Command::Fade(did, level) => write!(f, "Fade {did} {}", level.min(&BRIGHTNESS_SCALE))?,
            Command::GetLevel(did) => write!(f, "Get {did}")?,
            Command::GetDevices => write!(f, "Get Devices")?,
            Command::GetName(did) => write!(f, "Get Name {did}")?,
        }
        write!(f, "{FRAME_END}")
    }
}

/// Text between `prefix` and the next frame terminator.
fn payload_after<'a>(reply: &'a str, prefix: &str) -> Option<&'a str> {
    let (_, rest) = reply.split_once(prefix)?;
    rest.split(FRAME_END).next()
}

pub fn login_accepted(reply: &str) -> bool {
    reply.contains(LOGIN_ACCEPTED)
}

/// Raw level reported by `Get <did>`. May exceed the normalized scale.
pub fn decode_level(reply: &str) -> Option<i64> {
    payload_after(reply, LEVEL_PREFIX)?.trim().parse().ok()
}

/// Device ids reported by `Get Devices`. Entries that are not plain digits are skipped.
pub fn decode_devices(reply: &str) -> Option<Vec<DeviceId>> {
    let list = payload_after(reply, DEVICES_PREFIX)?;
    Some(
        list.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|id| id.parse().ok())
            .collect(),
    )
}

/// Display name reported by `Get Name <did>`.
///
/// An unset name is reported by the controller as `Timeout`; that, an empty
/// name, or an undecodable reply all yield [`fallback_name`].
pub fn decode_name(reply: &str, device: DeviceId) -> String {
    payload_after(reply, NAME_PREFIX)
        .map(|name| name.trim().trim_matches('\''))
        .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case(NAME_UNSET))
        .map_or_else(|| fallback_name(device), str::to_string)
}

pub fn fallback_name(device: DeviceId) -> String {
    format!("Device_{device}")
}
