//! Command sequencing states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of the command state machine.
///
/// ```text
/// handshake: HandshakeStart -> HandshakeWaitChunks -> HandshakePoll -> Idle
/// heat:      [HeatSetTemp] -> HeatStart -> HeatPoll -> HeatPollRepeat -> HeatComplete -> Idle
/// stop:      Stop -> StopPoll -> StopRepeat -> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    #[default]
    Idle,
    HandshakeStart,
    HandshakeWaitChunks,
    HandshakePoll,
    HeatSetTemp,
    HeatStart,
    HeatPoll,
    HeatPollRepeat,
    HeatComplete,
    Stop,
    StopPoll,
    StopRepeat,
}

impl CommandState {
    /// Number of declared states; bounds same-tick re-dispatch.
    pub const COUNT: usize = 12;

    pub fn is_idle(&self) -> bool {
        matches!(self, CommandState::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Idle => "idle",
            CommandState::HandshakeStart => "handshake_start",
            CommandState::HandshakeWaitChunks => "handshake_wait_chunks",
            CommandState::HandshakePoll => "handshake_poll",
            CommandState::HeatSetTemp => "heat_set_temp",
            CommandState::HeatStart => "heat_start",
            CommandState::HeatPoll => "heat_poll",
            CommandState::HeatPollRepeat => "heat_poll_repeat",
            CommandState::HeatComplete => "heat_complete",
            CommandState::Stop => "stop",
            CommandState::StopPoll => "stop_poll",
            CommandState::StopRepeat => "stop_repeat",
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for state in [
            CommandState::Idle,
            CommandState::HandshakeWaitChunks,
            CommandState::HeatPollRepeat,
            CommandState::StopRepeat,
        ] {
            let yaml = serde_yaml::to_string(&state).unwrap();
            assert_eq!(yaml.trim(), state.to_string());
        }
    }

    #[test]
    fn test_default_is_idle() {
        assert!(CommandState::default().is_idle());
        assert!(!CommandState::Stop.is_idle());
    }
}
