//! Command payloads for both protocol revisions.
//!
//! Every payload starts with `[version][command_id][type_byte][0x00]`
//! followed by command-specific bytes.

use crate::error::ProtocolError;
use crate::key::RegistrationKey;
use crate::{MAX_TEMP_F, MIN_TEMP_F};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CMD_REGISTER: u8 = 0x80;
pub const CMD_HELLO: u8 = 0x81;
pub const CMD_POLL: u8 = 0x40;
pub const CMD_CTRL: u8 = 0x41;
pub const CMD_SET_MODE: u8 = 0xF0;
pub const CMD_SET_HOLD_TIME: u8 = 0xF2;
pub const CMD_SET_MY_TEMP: u8 = 0xF3;
pub const CMD_STOP: u8 = 0xF4;
pub const CMD_SET_BABY_FORMULA: u8 = 0xF5;

const TYPE_HANDSHAKE: u8 = 0xD1;
const TYPE_STATUS: u8 = 0x40;
const TYPE_CONTROL: u8 = 0xA3;

/// Size of the common payload prefix.
pub const PAYLOAD_HEADER_SIZE: usize = 4;

/// Protocol revision, carried as payload byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    V0,
    #[default]
    V1,
}

impl ProtocolVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::V0 => 0,
            ProtocolVersion::V1 => 1,
        }
    }

    /// Guesses the revision from the device information service strings.
    ///
    /// Hardware `1.x.x` and later, or software `R0007V0012` and later, speak
    /// V1. Older software speaks V0. Anything unrecognized defaults to V1.
    pub fn detect(hardware: Option<&str>, software: Option<&str>) -> Self {
        if let Some(major) = hardware
            .and_then(|hw| hw.split('.').next())
            .and_then(|major| major.trim().parse::<u32>().ok())
        {
            if major >= 1 {
                return ProtocolVersion::V1;
            }
        }

        if let Some((release, version)) = software.and_then(parse_software_version) {
            return if release > 7 || (release == 7 && version >= 12) {
                ProtocolVersion::V1
            } else {
                ProtocolVersion::V0
            };
        }

        ProtocolVersion::V1
    }
}

fn parse_software_version(sw: &str) -> Option<(u32, u32)> {
    let rest = sw.strip_prefix('R')?;
    let (release, version) = rest.split_once('V')?;
    Some((release.parse().ok()?, version.parse().ok()?))
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolVersion::V0),
            1 => Ok(ProtocolVersion::V1),
            other => Err(ProtocolError::UnsupportedVersion(other)),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        version.as_u8()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Kettle heating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    GreenTea,
    Oolong,
    Coffee,
    Boil,
    MyTemp,
    /// Arbitrary temperature, V0 only.
    Heat,
}

impl Mode {
    /// Named presets that V1 can select directly.
    pub const PRESETS: [Mode; 3] = [Mode::GreenTea, Mode::Oolong, Mode::Coffee];

    pub fn as_u8(self) -> u8 {
        match self {
            Mode::GreenTea => 0x01,
            Mode::Oolong => 0x02,
            Mode::Coffee => 0x03,
            Mode::Boil => 0x04,
            Mode::MyTemp => 0x05,
            Mode::Heat => 0x06,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Mode::GreenTea),
            0x02 => Some(Mode::Oolong),
            0x03 => Some(Mode::Coffee),
            0x04 => Some(Mode::Boil),
            0x05 => Some(Mode::MyTemp),
            0x06 => Some(Mode::Heat),
            _ => None,
        }
    }

    /// Fixed target of a named preset.
    pub fn preset_temp_f(self) -> Option<u8> {
        match self {
            Mode::GreenTea => Some(180),
            Mode::Oolong => Some(195),
            Mode::Coffee => Some(205),
            Mode::Boil => Some(MAX_TEMP_F),
            Mode::MyTemp | Mode::Heat => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::GreenTea => "Green Tea",
            Mode::Oolong => "Oolong",
            Mode::Coffee => "Coffee",
            Mode::Boil => "Boil",
            Mode::MyTemp => "My Temp",
            Mode::Heat => "Heat",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Clamps a temperature into the range the kettle accepts as a target.
pub fn clamp_temp_f(temp_f: u8) -> u8 {
    temp_f.clamp(MIN_TEMP_F, MAX_TEMP_F)
}

/// How a heat request is expressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeatPlan {
    pub mode: Mode,
    pub temp_f: u8,
    /// A set-my-temp command must precede set-mode.
    pub needs_my_temp: bool,
}

/// Maps a target temperature onto a mode for the given revision.
///
/// 212 °F is boil. V0 heats to anything else directly. V1 has no generic
/// heat mode, so targets within 1 °F of a preset use that preset and the
/// rest go through my-temp.
pub fn resolve_heat_mode(version: ProtocolVersion, target_f: f32) -> HeatPlan {
    let temp_f = clamp_temp_f(target_f.round().clamp(0.0, 255.0) as u8);

    if temp_f == MAX_TEMP_F {
        return HeatPlan {
            mode: Mode::Boil,
            temp_f,
            needs_my_temp: false,
        };
    }

    if version == ProtocolVersion::V0 {
        return HeatPlan {
            mode: Mode::Heat,
            temp_f,
            needs_my_temp: false,
        };
    }

    let preset = Mode::PRESETS.into_iter().find(|mode| {
        mode.preset_temp_f()
            .is_some_and(|preset| temp_f.abs_diff(preset) < 2)
    });

    match preset {
        Some(mode) => HeatPlan {
            mode,
            temp_f,
            needs_my_temp: false,
        },
        None => HeatPlan {
            mode: Mode::MyTemp,
            temp_f,
            needs_my_temp: true,
        },
    }
}

/// Outbound commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pair a new key; the kettle must be in pairing mode.
    Register(RegistrationKey),
    /// Reconnect with an already paired key.
    Hello(RegistrationKey),
    /// Request an extended status report.
    Poll,
    /// Request a compact status report.
    RequestCompactStatus,
    SetMyTemp(u8),
    SetBabyFormula(bool),
    SetHoldTime(u16),
    SetMode {
        mode: Mode,
        temp_f: u8,
        hold_seconds: u16,
    },
    Stop,
}

impl Command {
    /// Builds a set-mode command, applying the revision's restrictions.
    ///
    /// V1 rejects the generic heat mode (sent as boil instead) and expects a
    /// zero temperature byte for every mode except my-temp.
    pub fn set_mode(version: ProtocolVersion, mode: Mode, temp_f: u8, hold_seconds: u16) -> Self {
        let (mode, temp_f) = match version {
            ProtocolVersion::V0 => (mode, temp_f),
            ProtocolVersion::V1 => {
                let mode = if mode == Mode::Heat {
                    tracing::warn!("Heat mode is not supported on v1, sending boil");
                    Mode::Boil
                } else {
                    mode
                };
                let temp_f = if mode == Mode::MyTemp { temp_f } else { 0 };
                (mode, temp_f)
            }
        };

        Command::SetMode {
            mode,
            temp_f,
            hold_seconds,
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Command::Register(_) => CMD_REGISTER,
            Command::Hello(_) => CMD_HELLO,
            Command::Poll => CMD_POLL,
            Command::RequestCompactStatus => CMD_CTRL,
            Command::SetMyTemp(_) => CMD_SET_MY_TEMP,
            Command::SetBabyFormula(_) => CMD_SET_BABY_FORMULA,
            Command::SetHoldTime(_) => CMD_SET_HOLD_TIME,
            Command::SetMode { .. } => CMD_SET_MODE,
            Command::Stop => CMD_STOP,
        }
    }

    fn type_byte(&self) -> u8 {
        match self {
            Command::Register(_) | Command::Hello(_) => TYPE_HANDSHAKE,
            Command::Poll | Command::RequestCompactStatus => TYPE_STATUS,
            _ => TYPE_CONTROL,
        }
    }

    /// Encoded payload length.
    pub fn payload_len(&self) -> usize {
        PAYLOAD_HEADER_SIZE
            + match self {
                Command::Register(_) | Command::Hello(_) => RegistrationKey::HEX_LEN,
                Command::Poll | Command::RequestCompactStatus | Command::Stop => 0,
                Command::SetMyTemp(_) | Command::SetBabyFormula(_) => 1,
                Command::SetHoldTime(_) => 4,
                Command::SetMode { .. } => 5,
            }
    }

    /// Writes the payload into `out`, returning the number of bytes written.
    pub fn encode_into(&self, version: ProtocolVersion, out: &mut [u8]) -> Result<usize, ProtocolError> {
        let len = self.payload_len();
        if out.len() < len {
            return Err(ProtocolError::BufferTooSmall {
                needed: len,
                available: out.len(),
            });
        }

        let mut writer = &mut out[..len];
        self.put_payload(version, &mut writer);
        Ok(len)
    }

    /// Encodes the payload into a new buffer.
    pub fn encode(&self, version: ProtocolVersion) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload_len());
        self.put_payload(version, &mut buf);
        buf.freeze()
    }

    fn put_payload(&self, version: ProtocolVersion, buf: &mut impl BufMut) {
        buf.put_u8(version.as_u8());
        buf.put_u8(self.id());
        buf.put_u8(self.type_byte());
        buf.put_u8(0x00);

        match self {
            Command::Register(key) | Command::Hello(key) => buf.put_slice(&key.to_ascii_hex()),
            Command::Poll | Command::RequestCompactStatus | Command::Stop => {}
            Command::SetMyTemp(temp_f) => buf.put_u8(clamp_temp_f(*temp_f)),
            Command::SetBabyFormula(enabled) => buf.put_u8(u8::from(*enabled)),
            Command::SetHoldTime(seconds) => {
                buf.put_u8(0x00);
                buf.put_u8(u8::from(*seconds > 0));
                buf.put_u16(*seconds);
            }
            Command::SetMode {
                mode,
                temp_f,
                hold_seconds,
            } => {
                buf.put_u8(mode.as_u8());
                buf.put_u8(*temp_f);
                buf.put_u8(u8::from(*hold_seconds > 0));
                buf.put_u16(*hold_seconds);
            }
        }
    }

    pub fn name(&self) -> &'static str {
        command_name(self.id()).unwrap_or("UNKNOWN")
    }
}

/// Short name for a command id, as used in logs.
pub fn command_name(id: u8) -> Option<&'static str> {
    match id {
        CMD_REGISTER => Some("REGISTER"),
        CMD_HELLO => Some("HELLO"),
        CMD_POLL => Some("POLL"),
        CMD_CTRL => Some("CTRL"),
        CMD_SET_MODE => Some("SET_MODE"),
        CMD_SET_HOLD_TIME => Some("SET_HOLD_TIME"),
        CMD_SET_MY_TEMP => Some("SET_MY_TEMP"),
        CMD_STOP => Some("STOP"),
        CMD_SET_BABY_FORMULA => Some("SET_BABY_FORMULA"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RegistrationKey {
        "00112233445566778899aabbccddeeff".parse().unwrap()
    }

    #[test]
    fn test_set_my_temp_payload() {
        let payload = Command::SetMyTemp(179).encode(ProtocolVersion::V1);
        assert_eq!(payload.as_ref(), &[0x01, 0xF3, 0xA3, 0x00, 0xB3]);
    }

    #[test]
    fn test_set_my_temp_clamps() {
        let low = Command::SetMyTemp(50).encode(ProtocolVersion::V1);
        assert_eq!(low[4], MIN_TEMP_F);
        let high = Command::SetMyTemp(250).encode(ProtocolVersion::V0);
        assert_eq!(high.as_ref(), &[0x00, 0xF3, 0xA3, 0x00, MAX_TEMP_F]);
    }

    #[test]
    fn test_hello_payload() {
        let payload = Command::Hello(key()).encode(ProtocolVersion::V1);
        assert_eq!(payload.len(), 36);
        assert_eq!(&payload[..4], &[0x01, 0x81, 0xD1, 0x00]);
        assert_eq!(&payload[4..], b"00112233445566778899aabbccddeeff");
    }

    #[test]
    fn test_register_payload() {
        let payload = Command::Register(key()).encode(ProtocolVersion::V0);
        assert_eq!(&payload[..4], &[0x00, 0x80, 0xD1, 0x00]);
        assert_eq!(payload.len(), 36);
    }

    #[test]
    fn test_status_request_payloads() {
        assert_eq!(
            Command::Poll.encode(ProtocolVersion::V1).as_ref(),
            &[0x01, 0x40, 0x40, 0x00]
        );
        assert_eq!(
            Command::RequestCompactStatus.encode(ProtocolVersion::V0).as_ref(),
            &[0x00, 0x41, 0x40, 0x00]
        );
        assert_eq!(
            Command::Stop.encode(ProtocolVersion::V1).as_ref(),
            &[0x01, 0xF4, 0xA3, 0x00]
        );
    }

    #[test]
    fn test_hold_time_payload() {
        let payload = Command::SetHoldTime(0x0258).encode(ProtocolVersion::V1);
        assert_eq!(
            payload.as_ref(),
            &[0x01, 0xF2, 0xA3, 0x00, 0x00, 0x01, 0x02, 0x58]
        );

        let disabled = Command::SetHoldTime(0).encode(ProtocolVersion::V1);
        assert_eq!(&disabled[4..], &[0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_baby_formula_payload() {
        let on = Command::SetBabyFormula(true).encode(ProtocolVersion::V1);
        assert_eq!(on.as_ref(), &[0x01, 0xF5, 0xA3, 0x00, 0x01]);
        let off = Command::SetBabyFormula(false).encode(ProtocolVersion::V1);
        assert_eq!(off[4], 0x00);
    }

    #[test]
    fn test_set_mode_payload() {
        let cmd = Command::set_mode(ProtocolVersion::V0, Mode::Heat, 160, 300);
        assert_eq!(
            cmd.encode(ProtocolVersion::V0).as_ref(),
            &[0x00, 0xF0, 0xA3, 0x00, 0x06, 0xA0, 0x01, 0x01, 0x2C]
        );
    }

    #[test]
    fn test_set_mode_v1_restrictions() {
        let cmd = Command::set_mode(ProtocolVersion::V1, Mode::Heat, 160, 0);
        assert_eq!(
            cmd,
            Command::SetMode {
                mode: Mode::Boil,
                temp_f: 0,
                hold_seconds: 0
            }
        );

        let cmd = Command::set_mode(ProtocolVersion::V1, Mode::Coffee, 205, 0);
        assert!(matches!(cmd, Command::SetMode { temp_f: 0, .. }));

        let cmd = Command::set_mode(ProtocolVersion::V1, Mode::MyTemp, 150, 0);
        assert!(matches!(cmd, Command::SetMode { temp_f: 150, .. }));
    }

    #[test]
    fn test_encode_into_too_small() {
        let mut out = [0u8; 4];
        let result = Command::SetMyTemp(180).encode_into(ProtocolVersion::V1, &mut out);
        assert!(matches!(
            result,
            Err(ProtocolError::BufferTooSmall {
                needed: 5,
                available: 4
            })
        ));

        let mut empty: [u8; 0] = [];
        assert!(Command::Poll
            .encode_into(ProtocolVersion::V1, &mut empty)
            .is_err());
    }

    #[test]
    fn test_encode_into_matches_encode() {
        let cmd = Command::set_mode(ProtocolVersion::V0, Mode::Heat, 190, 0x0258);
        let mut out = [0xEEu8; 16];
        let written = cmd.encode_into(ProtocolVersion::V0, &mut out).unwrap();

        assert_eq!(written, 9);
        assert_eq!(&out[..written], cmd.encode(ProtocolVersion::V0).as_ref());
        assert_eq!(&out[4..9], &[0x06, 190, 0x01, 0x02, 0x58]);
        assert_eq!(out[9], 0xEE);
    }

    #[test]
    fn test_resolve_heat_mode_boil() {
        let plan = resolve_heat_mode(ProtocolVersion::V1, 212.0);
        assert_eq!(plan.mode, Mode::Boil);
        let plan = resolve_heat_mode(ProtocolVersion::V0, 211.6);
        assert_eq!(plan.mode, Mode::Boil);
    }

    #[test]
    fn test_resolve_heat_mode_v0() {
        let plan = resolve_heat_mode(ProtocolVersion::V0, 150.0);
        assert_eq!(plan.mode, Mode::Heat);
        assert_eq!(plan.temp_f, 150);
        assert!(!plan.needs_my_temp);
    }

    #[test]
    fn test_resolve_heat_mode_v1_presets() {
        assert_eq!(resolve_heat_mode(ProtocolVersion::V1, 181.0).mode, Mode::GreenTea);
        assert_eq!(resolve_heat_mode(ProtocolVersion::V1, 179.0).mode, Mode::GreenTea);
        assert_eq!(resolve_heat_mode(ProtocolVersion::V1, 195.0).mode, Mode::Oolong);
        assert_eq!(resolve_heat_mode(ProtocolVersion::V1, 206.0).mode, Mode::Coffee);

        let plan = resolve_heat_mode(ProtocolVersion::V1, 182.0);
        assert_eq!(plan.mode, Mode::MyTemp);
        assert!(plan.needs_my_temp);
        assert_eq!(plan.temp_f, 182);
    }

    #[test]
    fn test_resolve_heat_mode_clamps() {
        let plan = resolve_heat_mode(ProtocolVersion::V0, 20.0);
        assert_eq!(plan.temp_f, MIN_TEMP_F);
        let plan = resolve_heat_mode(ProtocolVersion::V0, 400.0);
        assert_eq!(plan.mode, Mode::Boil);
    }

    #[test]
    fn test_detect_protocol_version() {
        assert_eq!(ProtocolVersion::detect(None, None), ProtocolVersion::V1);
        assert_eq!(
            ProtocolVersion::detect(Some("1.0.00"), Some("R0001V0001")),
            ProtocolVersion::V1
        );
        assert_eq!(
            ProtocolVersion::detect(Some("0.9.00"), Some("R0007V0011")),
            ProtocolVersion::V0
        );
        assert_eq!(
            ProtocolVersion::detect(None, Some("R0007V0012")),
            ProtocolVersion::V1
        );
        assert_eq!(
            ProtocolVersion::detect(None, Some("R0008V0000")),
            ProtocolVersion::V1
        );
        assert_eq!(
            ProtocolVersion::detect(None, Some("R0006V0099")),
            ProtocolVersion::V0
        );
        assert_eq!(
            ProtocolVersion::detect(Some("abc"), Some("garbage")),
            ProtocolVersion::V1
        );
    }

    #[test]
    fn test_protocol_version_serde() {
        let json = serde_json::to_string(&ProtocolVersion::V0).unwrap();
        assert_eq!(json, "0");
        let parsed: ProtocolVersion = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, ProtocolVersion::V1);
        assert!(serde_json::from_str::<ProtocolVersion>("2").is_err());
    }

    #[test]
    fn test_mode_table() {
        for value in 1..=6 {
            let mode = Mode::from_u8(value).unwrap();
            assert_eq!(mode.as_u8(), value);
        }
        assert!(Mode::from_u8(0).is_none());
        assert_eq!(Mode::Oolong.preset_temp_f(), Some(195));
        assert_eq!(Mode::MyTemp.preset_temp_f(), None);
        assert_eq!(Mode::GreenTea.to_string(), "Green Tea");
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::Stop.name(), "STOP");
        assert_eq!(command_name(0x41), Some("CTRL"));
        assert_eq!(command_name(0x99), None);
    }
}
