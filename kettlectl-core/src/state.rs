//! Kettle state as seen by the engine.

use kettlectl_protocol::message::{CMD_SET_BABY_FORMULA, CMD_SET_HOLD_TIME, CMD_SET_MY_TEMP};
use kettlectl_protocol::{CompactStatus, ExtendedStatus, MAX_TEMP_F};
use serde::{Deserialize, Serialize};

/// Default custom temperature (°F).
pub const DEFAULT_MY_TEMP_F: u8 = 179;

/// Last known kettle readings plus the user's intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KettleState {
    pub current_temp_f: u8,
    pub kettle_setpoint_f: u8,
    /// Temperature the user wants the next heat to reach.
    pub target_setpoint_f: f32,
    pub hold_time_seconds: u16,
    pub remaining_hold_time_seconds: u16,
    pub my_temp_f: u8,
    pub baby_formula_enabled: bool,
    pub on_base: bool,
    pub heating: bool,
    /// A status report arrived recently enough to trust the readings.
    pub status_received: bool,
    pub no_response_count: u32,
}

impl Default for KettleState {
    fn default() -> Self {
        Self {
            current_temp_f: 0,
            kettle_setpoint_f: 0,
            target_setpoint_f: f32::from(MAX_TEMP_F),
            hold_time_seconds: 0,
            remaining_hold_time_seconds: 0,
            my_temp_f: DEFAULT_MY_TEMP_F,
            baby_formula_enabled: false,
            on_base: false,
            heating: false,
            status_received: false,
            no_response_count: 0,
        }
    }
}

/// Locally changed fields awaiting device confirmation.
///
/// While a flag is set, status reports must not overwrite the field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFlags {
    pub hold_time: bool,
    pub my_temp: bool,
    pub baby_formula: bool,
}

impl PendingFlags {
    pub fn any(&self) -> bool {
        self.hold_time || self.my_temp || self.baby_formula
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Owns [`KettleState`] and its pending flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    kettle: KettleState,
    pending: PendingFlags,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kettle(&self) -> &KettleState {
        &self.kettle
    }

    pub fn pending(&self) -> &PendingFlags {
        &self.pending
    }

    pub fn set_target_setpoint(&mut self, temp_f: f32) {
        self.kettle.target_setpoint_f = temp_f;
    }

    pub fn set_hold_time(&mut self, seconds: u16) {
        self.kettle.hold_time_seconds = seconds;
        self.pending.hold_time = true;
    }

    pub fn set_my_temp(&mut self, temp_f: u8) {
        self.kettle.my_temp_f = temp_f;
        self.pending.my_temp = true;
    }

    pub fn set_baby_formula(&mut self, enabled: bool) {
        self.kettle.baby_formula_enabled = enabled;
        self.pending.baby_formula = true;
    }

    /// Clears the pending flag matching an acknowledged command id.
    ///
    /// Returns `true` if a flag was cleared.
    pub fn confirm(&mut self, command_id: u8) -> bool {
        let flag = match command_id {
            CMD_SET_HOLD_TIME => &mut self.pending.hold_time,
            CMD_SET_MY_TEMP => &mut self.pending.my_temp,
            CMD_SET_BABY_FORMULA => &mut self.pending.baby_formula,
            _ => return false,
        };
        std::mem::replace(flag, false)
    }

    pub fn apply_compact(&mut self, status: &CompactStatus) {
        self.kettle.current_temp_f = status.temp_f;
        self.kettle.kettle_setpoint_f = status.setpoint_f;
        self.kettle.heating = status.is_heating();
        self.mark_responsive();
    }

    pub fn apply_extended(&mut self, status: &ExtendedStatus) {
        let kettle = &mut self.kettle;
        kettle.current_temp_f = status.temp_f;
        kettle.kettle_setpoint_f = status.setpoint_f;
        kettle.heating = status.is_heating();

        if let Some(on_base) = status.on_base {
            kettle.on_base = on_base;
        }
        if let Some(remaining) = status.remaining_hold_seconds {
            kettle.remaining_hold_time_seconds = remaining;
        }
        if !self.pending.my_temp {
            if let Some(my_temp) = status.my_temp_f {
                kettle.my_temp_f = my_temp;
            }
        }
        if !self.pending.hold_time {
            if let Some(hold) = status.configured_hold_seconds {
                kettle.hold_time_seconds = hold;
            }
        }
        if !self.pending.baby_formula {
            if let Some(enabled) = status.baby_formula {
                kettle.baby_formula_enabled = enabled;
            }
        }

        self.mark_responsive();
    }

    fn mark_responsive(&mut self) {
        self.kettle.status_received = true;
        self.kettle.no_response_count = 0;
    }

    /// Counts one status poll sent since the last report.
    ///
    /// Returns `true` on the poll at which the readings become stale.
    pub fn tick_liveness(&mut self, threshold: u32) -> bool {
        let kettle = &mut self.kettle;
        if kettle.no_response_count < threshold {
            kettle.no_response_count += 1;
        }

        if kettle.no_response_count >= threshold && kettle.status_received {
            kettle.status_received = false;
            return true;
        }
        false
    }

    /// Forgets link-scoped state; user intent survives.
    pub fn reset_link(&mut self) {
        self.kettle.status_received = false;
        self.kettle.no_response_count = 0;
        self.pending.clear();
    }
}
