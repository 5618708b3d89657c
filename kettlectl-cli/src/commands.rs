//! Command execution.

use crate::{BuildCommand, BuildOpts, Commands, Switch};
use colored::Colorize;
use kettlectl_core::Config;
use kettlectl_protocol::message::command_name;
use kettlectl_protocol::{
    resolve_heat_mode, AckStatus, Command, Decoder, Encoder, Frame, FrameType, ProtocolVersion,
    RegistrationKey, StatusLayout, BUFFER_CAPACITY, CHUNK_SIZE, MAX_PAYLOAD_SIZE,
};
use std::fmt::Write as _;

type CliResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub fn execute(cmd: Commands) -> CliResult {
    match cmd {
        Commands::Decode { layout, hex } => decode(&hex.concat(), layout.into()),

        Commands::Build { opts, command } => build(opts, command),

        Commands::Plan {
            protocol_version,
            target,
        } => {
            let plan = resolve_heat_mode(protocol_version, target);
            let mut out = format!(
                "{} {}°F on {}: mode {} at {}°F",
                "Target".bold(),
                target,
                protocol_version,
                plan.mode.to_string().cyan(),
                plan.temp_f
            );
            if plan.needs_my_temp {
                out.push_str(" (set my-temp first)");
            }
            Ok(out)
        }

        Commands::KeyFromCapture {
            first,
            second,
            third,
        } => {
            let key = RegistrationKey::from_capture(&first, &second, &third)?;
            Ok(key.to_string())
        }

        Commands::DetectVersion { hardware, software } => {
            let version = ProtocolVersion::detect(hardware.as_deref(), software.as_deref());
            Ok(format!("{} {}", "Protocol".bold(), version.to_string().cyan()))
        }

        Commands::Config { file } => {
            let config = match file {
                Some(path) => {
                    let mut config = Config::from_file(path)?;
                    config.apply_overrides(|key| std::env::var(key).ok());
                    config
                }
                None => Config::from_env(),
            };
            config.validate()?;
            Ok(serde_yaml::to_string(&config)?.trim_end().to_string())
        }
    }
}

fn decode(input: &str, layout: StatusLayout) -> CliResult {
    let bytes = parse_hex(input)?;
    tracing::debug!("Decoding {} bytes", bytes.len());
    let mut decoder = Decoder::with_limits(BUFFER_CAPACITY, MAX_PAYLOAD_SIZE);
    let mut frames = Vec::new();

    for chunk in bytes.chunks(CHUNK_SIZE) {
        decoder.compact();
        decoder.append(chunk);
        while let Some(frame) = decoder.next_frame() {
            frames.push(frame);
        }
    }

    if frames.is_empty() {
        return Ok("(no frames)".dimmed().to_string());
    }

    let mut out = String::new();
    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        describe_frame(&mut out, frame, layout);
    }
    Ok(out)
}

fn describe_frame(out: &mut String, frame: &Frame, layout: StatusLayout) {
    let command_id = frame.command_id();
    let name = command_id.and_then(command_name).unwrap_or("UNKNOWN");

    let _ = writeln!(
        out,
        "{} seq={:#04x} len={} {}",
        frame.frame_type.to_string().bold(),
        frame.seq,
        frame.payload.len(),
        name.cyan()
    );
    let _ = write!(out, "  payload: {}", spaced_hex(&frame.payload));

    let Some(command_id) = command_id else {
        return;
    };

    match frame.frame_type {
        FrameType::Ack => {
            let status = AckStatus::from_payload(&frame.payload);
            let rendered = if status.is_ok() {
                status.to_string().green()
            } else {
                status.to_string().red()
            };
            let _ = write!(out, "\n  ack: {} ({})", rendered, status.describe(command_id));

            if let Some(status) = layout.parse_extended(&frame.payload) {
                let _ = write!(
                    out,
                    "\n  extended: stage={} mode={} setpoint={}°F temp={}°F",
                    status.stage,
                    mode_label(status.mode),
                    status.setpoint_f,
                    status.temp_f
                );
                if let Some(my_temp) = status.my_temp_f {
                    let _ = write!(out, " my_temp={}°F", my_temp);
                }
                if let Some(on_base) = status.on_base {
                    let _ = write!(out, " on_base={}", on_base);
                }
                if let (Some(configured), Some(remaining)) =
                    (status.configured_hold_seconds, status.remaining_hold_seconds)
                {
                    let _ = write!(out, " hold={}s/{}s", remaining, configured);
                }
                if let Some(baby) = status.baby_formula {
                    let _ = write!(out, " baby_formula={}", baby);
                }
            }
        }
        FrameType::Message => {
            if let Some(status) = kettlectl_protocol::CompactStatus::parse(&frame.payload) {
                let _ = write!(
                    out,
                    "\n  compact: stage={} mode={} setpoint={}°F temp={}°F status={:#04x}",
                    status.stage,
                    mode_label(status.mode),
                    status.setpoint_f,
                    status.temp_f,
                    status.status
                );
            }
        }
    }
}

fn build(opts: BuildOpts, command: BuildCommand) -> CliResult {
    let version = opts.protocol_version;
    let command = match command {
        BuildCommand::Register { key } => Command::Register(key.parse()?),
        BuildCommand::Hello { key } => Command::Hello(key.parse()?),
        BuildCommand::Poll => Command::Poll,
        BuildCommand::Compact => Command::RequestCompactStatus,
        BuildCommand::MyTemp { temp } => {
            Command::SetMyTemp(kettlectl_protocol::message::clamp_temp_f(temp))
        }
        BuildCommand::Baby { state } => Command::SetBabyFormula(matches!(state, Switch::On)),
        BuildCommand::Hold { seconds } => Command::SetHoldTime(seconds),
        BuildCommand::Mode { mode, temp, hold } => {
            Command::set_mode(version, mode.into(), temp, hold)
        }
        BuildCommand::Stop => Command::Stop,
    };

    let payload = command.encode(version);
    let frame = if opts.ack {
        Frame::ack(opts.seq, payload)
    } else {
        Frame::message(opts.seq, payload)
    };

    let mut encoder = Encoder::new();
    encoder.build(&frame)?;

    let mut out = format!(
        "{} {} ({}, {}, seq={:#04x})\n{}",
        "Packet".bold(),
        command.name().cyan(),
        version,
        frame.frame_type,
        frame.seq,
        spaced_hex(encoder.as_bytes())
    );
    let _ = write!(out, "\n{} {}", "Chunks:".bold(), encoder.chunk_count());
    for (i, chunk) in encoder.chunks().enumerate() {
        let _ = write!(out, "\n  [{}] {}", i, hex::encode(chunk));
    }
    Ok(out)
}

fn mode_label(mode: u8) -> String {
    match kettlectl_protocol::Mode::from_u8(mode) {
        Some(mode) => mode.to_string(),
        None => format!("{:#04x}", mode),
    }
}

/// Parses hex, ignoring whitespace, colons and an optional `0x` prefix.
fn parse_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let input = input.trim();
    let input = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(cleaned)
}

fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
