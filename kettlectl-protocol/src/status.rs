//! Status report parsers.
//!
//! Compact reports arrive as message frames with command 0x41 and carry only
//! temperature and stage. Extended reports are the ack to a 0x40 poll and
//! add my-temp, on-base, hold time and baby-formula fields. Firmware
//! revisions disagree on where the hold-time and baby-formula fields live,
//! so extended parsing goes through an explicit [`StatusLayout`].

use crate::message::{Mode, CMD_CTRL, CMD_POLL};
use crate::{MAX_TEMP_F, MIN_TEMP_F};
use serde::{Deserialize, Serialize};

/// Lowest plausible sensor reading (°F).
pub const MIN_VALID_READING_F: u8 = 40;

/// Highest plausible sensor reading (°F).
pub const MAX_VALID_READING_F: u8 = 230;

const COMPACT_MIN_LEN: usize = 9;
const EXTENDED_MIN_LEN: usize = 8;

fn plausible_reading(temp_f: u8) -> bool {
    (MIN_VALID_READING_F..=MAX_VALID_READING_F).contains(&temp_f)
}

/// Abbreviated status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStatus {
    pub stage: u8,
    pub mode: u8,
    pub setpoint_f: u8,
    pub temp_f: u8,
    pub status: u8,
}

impl CompactStatus {
    /// Parses a compact report payload.
    ///
    /// Returns `None` for short payloads, the wrong command, or an
    /// implausible temperature reading.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < COMPACT_MIN_LEN || payload[1] != CMD_CTRL {
            return None;
        }

        let temp_f = payload[7];
        if !plausible_reading(temp_f) {
            return None;
        }

        Some(Self {
            stage: payload[4],
            mode: payload[5],
            setpoint_f: payload[6],
            temp_f,
            status: payload[8],
        })
    }

    pub fn is_heating(&self) -> bool {
        self.stage != 0
    }

    pub fn mode(&self) -> Option<Mode> {
        Mode::from_u8(self.mode)
    }
}

/// Full status report. Fields the payload was too short to carry are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedStatus {
    pub stage: u8,
    pub mode: u8,
    pub setpoint_f: u8,
    pub temp_f: u8,
    pub my_temp_f: Option<u8>,
    pub on_base: Option<bool>,
    pub configured_hold_seconds: Option<u16>,
    pub remaining_hold_seconds: Option<u16>,
    pub baby_formula: Option<bool>,
}

impl ExtendedStatus {
    pub fn is_heating(&self) -> bool {
        self.stage != 0
    }

    pub fn mode(&self) -> Option<Mode> {
        Mode::from_u8(self.mode)
    }
}

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy)]
struct U16Field {
    offset: usize,
    order: ByteOrder,
}

impl U16Field {
    fn read(&self, payload: &[u8]) -> Option<u16> {
        let bytes = payload.get(self.offset..self.offset + 2)?;
        let pair = [bytes[0], bytes[1]];
        Some(match self.order {
            ByteOrder::Big => u16::from_be_bytes(pair),
            ByteOrder::Little => u16::from_le_bytes(pair),
        })
    }
}

/// Field offsets of one extended status layout.
#[derive(Debug, Clone, Copy)]
struct LayoutTable {
    my_temp: usize,
    on_base: usize,
    configured_hold: U16Field,
    remaining_hold: U16Field,
    baby_formula: usize,
}

const CURRENT_LAYOUT: LayoutTable = LayoutTable {
    my_temp: 8,
    on_base: 14,
    configured_hold: U16Field {
        offset: 10,
        order: ByteOrder::Little,
    },
    remaining_hold: U16Field {
        offset: 12,
        order: ByteOrder::Little,
    },
    baby_formula: 26,
};

// Single big-endian hold field, reported as both configured and remaining.
const LEGACY_LAYOUT: LayoutTable = LayoutTable {
    my_temp: 8,
    on_base: 14,
    configured_hold: U16Field {
        offset: 15,
        order: ByteOrder::Big,
    },
    remaining_hold: U16Field {
        offset: 15,
        order: ByteOrder::Big,
    },
    baby_formula: 28,
};

/// Extended status layout selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLayout {
    /// Little-endian configured/remaining hold at 10/12, baby formula at 26.
    #[default]
    Current,
    /// Big-endian hold at 15, baby formula at 28.
    Legacy,
}

impl StatusLayout {
    fn table(self) -> &'static LayoutTable {
        match self {
            StatusLayout::Current => &CURRENT_LAYOUT,
            StatusLayout::Legacy => &LEGACY_LAYOUT,
        }
    }

    /// Parses an extended report payload.
    ///
    /// Requires at least the 8-byte core (header, stage, mode, setpoint,
    /// temperature) and a plausible temperature; optional fields are filled
    /// in only when the payload is long enough to carry them.
    pub fn parse_extended(self, payload: &[u8]) -> Option<ExtendedStatus> {
        if payload.len() < EXTENDED_MIN_LEN || payload[1] != CMD_POLL {
            return None;
        }

        let temp_f = payload[7];
        if !plausible_reading(temp_f) {
            return None;
        }

        let table = self.table();
        Some(ExtendedStatus {
            stage: payload[4],
            mode: payload[5],
            setpoint_f: payload[6],
            temp_f,
            my_temp_f: payload
                .get(table.my_temp)
                .copied()
                .filter(|t| (MIN_TEMP_F..=MAX_TEMP_F).contains(t)),
            on_base: payload.get(table.on_base).map(|b| *b == 0x00),
            configured_hold_seconds: table.configured_hold.read(payload),
            remaining_hold_seconds: table.remaining_hold.read(payload),
            baby_formula: payload.get(table.baby_formula).map(|b| *b == 0x01),
        })
    }
}
