//! kettlectl-cli - Offline tooling for the Cosori kettle protocol
//!
//! Decodes captured traffic, builds packets, recovers registration keys and
//! inspects configuration without touching a kettle.

mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use kettlectl_protocol::{Mode, ProtocolVersion, StatusLayout};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kettlectl-cli")]
#[command(about = "Offline tooling for the Cosori BLE kettle protocol")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode captured bytes into frames and status reports
    Decode {
        /// Extended status layout
        #[arg(short, long, value_enum, default_value = "current")]
        layout: LayoutArg,

        /// Hex bytes; several arguments are concatenated
        #[arg(required = true)]
        hex: Vec<String>,
    },

    /// Build an outbound packet and show its BLE chunks
    Build {
        #[command(flatten)]
        opts: BuildOpts,

        #[command(subcommand)]
        command: BuildCommand,
    },

    /// Show how a target temperature maps onto a kettle mode
    Plan {
        /// Protocol version (0 or 1)
        #[arg(short = 'p', long, default_value = "1", value_parser = parse_version)]
        protocol_version: ProtocolVersion,

        /// Target temperature (°F)
        target: f32,
    },

    /// Recover the registration key from a captured vendor-app hello
    KeyFromCapture {
        /// First 20-byte write, as hex
        first: String,
        /// Second 20-byte write, as hex
        second: String,
        /// Final 2-byte write, as hex
        third: String,
    },

    /// Guess the protocol version from device information strings
    DetectVersion {
        /// Hardware revision string (e.g. 1.0.00)
        #[arg(long)]
        hardware: Option<String>,

        /// Software revision string (e.g. R0007V0012)
        #[arg(long)]
        software: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Config file (defaults to KETTLECTL_CONFIG)
        #[arg(short, long, env = "KETTLECTL_CONFIG")]
        file: Option<PathBuf>,
    },
}

#[derive(Args, Clone, Copy)]
pub struct BuildOpts {
    /// Protocol version (0 or 1)
    #[arg(short = 'p', long, default_value = "1", value_parser = parse_version, global = true)]
    protocol_version: ProtocolVersion,

    /// Sequence number
    #[arg(short, long, default_value = "0", global = true)]
    seq: u8,

    /// Send as an ack-type frame
    #[arg(long, global = true)]
    ack: bool,
}

#[derive(Subcommand, Clone)]
pub enum BuildCommand {
    /// Pairing request
    Register {
        /// 32 hex character key
        key: String,
    },
    /// Reconnect with a paired key
    Hello {
        /// 32 hex character key
        key: String,
    },
    /// Extended status poll
    Poll,
    /// Compact status request
    Compact,
    /// Set the custom temperature
    MyTemp {
        /// Temperature (°F)
        temp: u8,
    },
    /// Toggle baby-formula mode
    Baby {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Set the keep-warm hold time
    Hold {
        /// Seconds (0 disables)
        seconds: u16,
    },
    /// Select a heating mode
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,

        /// Temperature byte (°F)
        #[arg(short, long, default_value = "0")]
        temp: u8,

        /// Hold time in seconds
        #[arg(long, default_value = "0")]
        hold: u16,
    },
    /// Stop heating
    Stop,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LayoutArg {
    Current,
    Legacy,
}

impl From<LayoutArg> for StatusLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Current => StatusLayout::Current,
            LayoutArg::Legacy => StatusLayout::Legacy,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Switch {
    On,
    Off,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModeArg {
    GreenTea,
    Oolong,
    Coffee,
    Boil,
    MyTemp,
    Heat,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::GreenTea => Mode::GreenTea,
            ModeArg::Oolong => Mode::Oolong,
            ModeArg::Coffee => Mode::Coffee,
            ModeArg::Boil => Mode::Boil,
            ModeArg::MyTemp => Mode::MyTemp,
            ModeArg::Heat => Mode::Heat,
        }
    }
}

fn parse_version(s: &str) -> Result<ProtocolVersion, String> {
    let value: u8 = s.parse().map_err(|_| format!("invalid protocol version: {}", s))?;
    ProtocolVersion::try_from(value).map_err(|e| e.to_string())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match commands::execute(cli.command) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
