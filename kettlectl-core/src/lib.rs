//! # kettlectl-core
//!
//! Command engine for Cosori BLE kettles.
//!
//! This crate provides:
//! - The handshake, heat and stop command sequences
//! - Single in-flight send sessions with chunk-by-chunk write gating
//! - Device state tracking with pending flags and liveness
//! - Engine configuration loading

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod state;
pub mod transport;

pub use command::CommandState;
pub use config::{BridgeConfig, Config, ConfigError, EngineConfig, TimingConfig};
pub use engine::{EngineSnapshot, KettleEngine};
pub use error::CoreError;
pub use session::{SendSession, WriteOutcome};
pub use state::{DeviceState, KettleState, PendingFlags};
pub use transport::{Outbox, Transport};
