//! Registration key used by the register and hello handshakes.

use crate::error::ProtocolError;
use crate::frame::{HEADER_SIZE, MAGIC};
use crate::message::CMD_HELLO;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 16-byte pairing key.
///
/// On the wire the key travels as 32 lowercase ASCII hex characters; in
/// configuration it is written the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationKey([u8; 16]);

impl RegistrationKey {
    /// Length of the ASCII hex encoding.
    pub const HEX_LEN: usize = 32;

    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase ASCII hex encoding, high nibble first.
    pub fn to_ascii_hex(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // Output is exactly twice the key length.
        let _ = hex::encode_to_slice(self.0, &mut out);
        out
    }

    /// Recovers the key from the three BLE writes the vendor app sends when
    /// it says hello: 20 bytes, 20 bytes, then 2 bytes, each given as hex.
    ///
    /// Spaces and colons in the input are ignored. The first packet must be
    /// the start of a hello frame; the key's ASCII hex follows the 4-byte
    /// payload header and runs to the end of the third packet.
    pub fn from_capture(first: &str, second: &str, third: &str) -> Result<Self, ProtocolError> {
        let first = clean_hex(first);
        let second = clean_hex(second);
        let third = clean_hex(third);

        for (name, packet, expected) in [
            ("first", &first, 40),
            ("second", &second, 40),
            ("third", &third, 4),
        ] {
            if packet.len() != expected {
                return Err(ProtocolError::InvalidCapture(format!(
                    "{} packet must be {} hex characters, got {}",
                    name,
                    expected,
                    packet.len()
                )));
            }
        }

        let head = hex::decode(&first)?;
        hex::decode(&second)?;
        hex::decode(&third)?;

        if head[0] != MAGIC {
            return Err(ProtocolError::InvalidCapture(format!(
                "first packet starts with {:#04x}, expected {:#04x}",
                head[0], MAGIC
            )));
        }
        let command = &head[HEADER_SIZE + 1..HEADER_SIZE + 4];
        if command != [CMD_HELLO, 0xD1, 0x00] {
            return Err(ProtocolError::InvalidCapture(format!(
                "first packet is not a hello command (got {})",
                hex::encode(command)
            )));
        }

        let key_offset = (HEADER_SIZE + 4) * 2;
        let ascii = hex::decode(format!("{}{}{}", &first[key_offset..], second, third))?;
        let text = std::str::from_utf8(&ascii)
            .map_err(|_| ProtocolError::InvalidCapture("key is not ASCII".to_string()))?;
        text.parse()
    }
}

fn clean_hex(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

impl FromStr for RegistrationKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = clean_hex(s);
        if cleaned.len() != Self::HEX_LEN {
            return Err(ProtocolError::InvalidKey(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                cleaned.len()
            )));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(&cleaned, &mut bytes)
            .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 16]> for RegistrationKey {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl Serialize for RegistrationKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RegistrationKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
