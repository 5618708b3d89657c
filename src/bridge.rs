//! Line protocol between a BLE host process and the engine.
//!
//! Input, one event per line:
//!
//! ```text
//! connected | disconnected | notify <hex> | written ok|fail
//! heat [temp] | stop | target <f> | hold <secs> | mytemp <f>
//! baby on|off | pair | hello | status | state
//! ```
//!
//! Output: `write <hex>` for each chunk to put on the wire, `state <json>`
//! whenever the engine snapshot changes, and `error <CODE> <message>` for
//! rejected commands or unparseable lines.

use kettlectl_core::{CoreError, EngineSnapshot, KettleEngine, Outbox};
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// One input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Disconnected,
    Notify(Vec<u8>),
    Written(bool),
    Heat(Option<f32>),
    Stop,
    Target(f32),
    Hold(u16),
    MyTemp(u8),
    Baby(bool),
    Pair,
    Hello,
    Status,
    State,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("missing argument for {0}")]
    MissingArgument(&'static str),

    #[error("invalid argument for {event}: {value}")]
    InvalidArgument { event: &'static str, value: String },

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

fn parse_arg<V: FromStr>(event: &'static str, arg: Option<&str>) -> Result<V, ParseError> {
    let value = arg.ok_or(ParseError::MissingArgument(event))?;
    value.parse().map_err(|_| ParseError::InvalidArgument {
        event,
        value: value.to_string(),
    })
}

fn parse_switch(event: &'static str, arg: Option<&str>, on: &str, off: &str) -> Result<bool, ParseError> {
    match arg {
        Some(v) if v.eq_ignore_ascii_case(on) => Ok(true),
        Some(v) if v.eq_ignore_ascii_case(off) => Ok(false),
        Some(v) => Err(ParseError::InvalidArgument {
            event,
            value: v.to_string(),
        }),
        None => Err(ParseError::MissingArgument(event)),
    }
}

impl FromStr for Event {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Err(ParseError::Empty);
        };
        let arg = parts.clone().next();

        let event = match name.to_lowercase().as_str() {
            "connected" => Event::Connected,
            "disconnected" => Event::Disconnected,
            "notify" => {
                let hex: String = parts.collect::<String>().replace(':', "");
                if hex.is_empty() {
                    return Err(ParseError::MissingArgument("notify"));
                }
                Event::Notify(hex::decode(hex)?)
            }
            "written" => Event::Written(parse_switch("written", arg, "ok", "fail")?),
            "heat" => match arg {
                Some(_) => Event::Heat(Some(parse_arg("heat", arg)?)),
                None => Event::Heat(None),
            },
            "stop" => Event::Stop,
            "target" => Event::Target(parse_arg("target", arg)?),
            "hold" => Event::Hold(parse_arg("hold", arg)?),
            "mytemp" => Event::MyTemp(parse_arg("mytemp", arg)?),
            "baby" => Event::Baby(parse_switch("baby", arg, "on", "off")?),
            "pair" => Event::Pair,
            "hello" => Event::Hello,
            "status" => Event::Status,
            "state" => Event::State,
            other => return Err(ParseError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}

/// Drives a [`KettleEngine`] from parsed events and reports on `out`.
pub struct Bridge<W> {
    engine: KettleEngine<Outbox>,
    out: W,
    last_snapshot: EngineSnapshot,
}

impl<W: AsyncWrite + Unpin> Bridge<W> {
    pub fn new(engine: KettleEngine<Outbox>, out: W) -> Self {
        let last_snapshot = engine.snapshot();
        Self {
            engine,
            out,
            last_snapshot,
        }
    }

    pub fn engine(&self) -> &KettleEngine<Outbox> {
        &self.engine
    }

    /// Handles one input line. Only output failures are errors.
    pub async fn handle_line(&mut self, line: &str) -> std::io::Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }

        match line.parse::<Event>() {
            Ok(Event::State) => {
                self.flush_chunks().await?;
                self.write_state().await?;
            }
            Ok(event) => {
                if let Err(e) = self.apply(event) {
                    self.write_line(&format!("error {} {}", e.error_code(), e)).await?;
                }
                self.flush().await?;
            }
            Err(e) => {
                tracing::debug!("Unparseable line {:?}: {}", line, e);
                self.write_line(&format!("error PARSE {}", e)).await?;
            }
        }
        Ok(())
    }

    pub async fn tick(&mut self, now_ms: u64) -> std::io::Result<()> {
        self.engine.tick(now_ms);
        self.flush().await
    }

    fn apply(&mut self, event: Event) -> Result<(), CoreError> {
        let engine = &mut self.engine;
        match event {
            Event::Connected => engine.on_connected(),
            Event::Disconnected => engine.on_disconnected(),
            Event::Notify(bytes) => engine.on_notify(&bytes),
            Event::Written(ok) => engine.on_write_complete(ok),
            Event::Heat(target) => {
                if let Some(temp_f) = target {
                    engine.set_target_setpoint(temp_f);
                }
                engine.start_heating()?;
            }
            Event::Stop => engine.stop_heating()?,
            Event::Target(temp_f) => engine.set_target_setpoint(temp_f),
            Event::Hold(seconds) => engine.set_hold_time(seconds)?,
            Event::MyTemp(temp_f) => engine.set_my_temp(temp_f)?,
            Event::Baby(enabled) => engine.set_baby_formula(enabled)?,
            Event::Pair => engine.pair()?,
            Event::Hello => engine.hello()?,
            Event::Status => engine.request_status()?,
            Event::State => {}
        }
        Ok(())
    }

    /// Writes queued chunks, then the snapshot if it changed.
    async fn flush(&mut self) -> std::io::Result<()> {
        self.flush_chunks().await?;
        if self.engine.snapshot() != self.last_snapshot {
            self.write_state().await?;
        }
        Ok(())
    }

    async fn flush_chunks(&mut self) -> std::io::Result<()> {
        let chunks: Vec<Vec<u8>> = self.engine.transport_mut().drain().collect();
        for chunk in chunks {
            self.write_line(&format!("write {}", hex::encode(chunk))).await?;
        }
        Ok(())
    }

    async fn write_state(&mut self) -> std::io::Result<()> {
        let snapshot = self.engine.snapshot();
        let json = serde_json::to_string(&snapshot)?;
        self.write_line(&format!("state {}", json)).await?;
        self.last_snapshot = snapshot;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kettlectl_core::EngineConfig;
    use kettlectl_protocol::{Decoder, Frame, FrameType};

    const KEY: &str = "0123456789abcdeffedcba9876543210";

    fn bridge() -> Bridge<Vec<u8>> {
        let config = EngineConfig {
            registration_key: Some(KEY.parse().unwrap()),
            ..Default::default()
        };
        Bridge::new(KettleEngine::new(config, Outbox::new()), Vec::new())
    }

    fn take_output(bridge: &mut Bridge<Vec<u8>>) -> Vec<String> {
        let out = std::mem::take(&mut bridge.out);
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn written_frames(lines: &[String]) -> Vec<Frame> {
        let mut decoder = Decoder::new();
        for line in lines {
            if let Some(hex) = line.strip_prefix("write ") {
                decoder.append(&hex::decode(hex).unwrap());
            }
        }
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    #[test]
    fn test_parse_events() {
        assert_eq!("connected".parse::<Event>().unwrap(), Event::Connected);
        assert_eq!(
            "notify a5:22 b5".parse::<Event>().unwrap(),
            Event::Notify(vec![0xA5, 0x22, 0xB5])
        );
        assert_eq!("written fail".parse::<Event>().unwrap(), Event::Written(false));
        assert_eq!("heat".parse::<Event>().unwrap(), Event::Heat(None));
        assert_eq!("heat 180".parse::<Event>().unwrap(), Event::Heat(Some(180.0)));
        assert_eq!("hold 600".parse::<Event>().unwrap(), Event::Hold(600));
        assert_eq!("BABY On".parse::<Event>().unwrap(), Event::Baby(true));
        assert_eq!("mytemp 150".parse::<Event>().unwrap(), Event::MyTemp(150));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("".parse::<Event>(), Err(ParseError::Empty)));
        assert!(matches!("boil".parse::<Event>(), Err(ParseError::UnknownEvent(_))));
        assert!(matches!("hold".parse::<Event>(), Err(ParseError::MissingArgument("hold"))));
        assert!(matches!(
            "hold forever".parse::<Event>(),
            Err(ParseError::InvalidArgument { event: "hold", .. })
        ));
        assert!(matches!("notify zz".parse::<Event>(), Err(ParseError::Hex(_))));
        assert!(matches!("notify".parse::<Event>(), Err(ParseError::MissingArgument(_))));
        assert!(matches!("baby maybe".parse::<Event>(), Err(ParseError::InvalidArgument { .. })));
    }

    #[test]
    fn test_rejected_command_reports_error() {
        let config = EngineConfig::default();
        let engine = KettleEngine::new(config, Outbox::new());
        let out = tokio_test::io::Builder::new()
            .write(b"error NOT_CONNECTED kettle not connected\n")
            .build();
        let mut bridge = Bridge::new(engine, out);
        tokio_test::block_on(bridge.handle_line("stop")).unwrap();
    }

    #[test]
    fn test_handshake_over_lines() {
        let mut bridge = bridge();
        tokio_test::block_on(async {
            bridge.handle_line("connected").await.unwrap();
            bridge.tick(1_000).await.unwrap();
        });

        let lines = take_output(&mut bridge);
        assert!(lines[0].starts_with("state "));
        assert!(lines.iter().any(|l| l.starts_with("write a522")));

        // Complete the remaining chunk writes.
        let mut all = lines;
        tokio_test::block_on(async {
            bridge.handle_line("written ok").await.unwrap();
            bridge.handle_line("written ok").await.unwrap();
            bridge.handle_line("written ok").await.unwrap();
        });
        all.extend(take_output(&mut bridge));

        let frames = written_frames(&all);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::Message);
        assert_eq!(&frames[0].payload[4..], KEY.as_bytes());
    }

    #[test]
    fn test_state_line_on_request() {
        let mut bridge = bridge();
        tokio_test::block_on(bridge.handle_line("state")).unwrap();
        let lines = take_output(&mut bridge);
        assert_eq!(lines.len(), 1);

        let json = lines[0].strip_prefix("state ").unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["connected"], false);
        assert_eq!(value["command"], "idle");
        assert_eq!(value["state"]["my_temp_f"], 179);
    }

    #[test]
    fn test_target_changes_state_without_writes() {
        let mut bridge = bridge();
        tokio_test::block_on(bridge.handle_line("target 180")).unwrap();
        let lines = take_output(&mut bridge);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"target_setpoint_f\":180.0"));
        assert_eq!(bridge.engine().state().target_setpoint_f, 180.0);

        // Same value again: no change, no output.
        tokio_test::block_on(bridge.handle_line("target 180")).unwrap();
        assert!(take_output(&mut bridge).is_empty());
    }

    #[test]
    fn test_nan_target_ignored() {
        let mut bridge = bridge();
        tokio_test::block_on(bridge.handle_line("target NaN")).unwrap();
        assert!(take_output(&mut bridge).is_empty());
        assert_eq!(bridge.engine().state().target_setpoint_f, 212.0);

        tokio_test::block_on(bridge.tick(1_000)).unwrap();
        assert!(take_output(&mut bridge).is_empty());
    }

    #[test]
    fn test_parse_error_line() {
        let mut bridge = bridge();
        tokio_test::block_on(bridge.handle_line("frobnicate")).unwrap();
        let lines = take_output(&mut bridge);
        assert_eq!(lines, vec!["error PARSE unknown event: frobnicate".to_string()]);
    }
}
