//! Kettle engine - owns the codec, the send session and the command sequences.
//!
//! All mutation happens through `&mut self` on one execution context: the
//! host forwards transport callbacks (`on_connected`, `on_notify`,
//! `on_write_complete`, `on_disconnected`) and calls `tick` periodically.
//! Nothing here blocks; every wait is explicit state re-checked on the next
//! callback or tick.

use crate::command::CommandState;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::session::{SendSession, WriteOutcome};
use crate::state::{DeviceState, KettleState, PendingFlags};
use crate::transport::Transport;
use kettlectl_protocol::message::{clamp_temp_f, CMD_CTRL, CMD_POLL};
use kettlectl_protocol::{
    resolve_heat_mode, AckStatus, Command, CompactStatus, Decoder, Frame, FrameType, HeatPlan,
    Mode, ProtocolVersion, BUFFER_CAPACITY, MAX_TEMP_F, MIN_TEMP_F,
};
use serde::Serialize;

/// Point-in-time view of the engine for hosts and UIs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub connected: bool,
    pub command: CommandState,
    pub state: KettleState,
    pub pending: PendingFlags,
    pub last_ack_status: Option<AckStatus>,
}

/// Protocol engine for a single kettle connection.
pub struct KettleEngine<T: Transport> {
    config: EngineConfig,
    transport: T,
    decoder: Decoder,
    session: SendSession,
    device: DeviceState,

    command: CommandState,
    /// Entry time of `command`; `None` until the first tick after a sequence
    /// was started from the command surface.
    entered_at: Option<u64>,
    now_ms: u64,

    connected: bool,
    handshake_sent: bool,
    use_register: bool,
    awaiting_ack: Option<u8>,
    last_ack_status: Option<AckStatus>,

    tx_seq: u8,
    last_rx_seq: u8,
    last_status_seq: u8,

    heat_plan: Option<HeatPlan>,
    last_poll_at: Option<u64>,
}

impl<T: Transport> KettleEngine<T> {
    pub fn new(config: EngineConfig, transport: T) -> Self {
        let decoder = Decoder::with_limits(BUFFER_CAPACITY, config.max_payload_size);
        let use_register = config.use_register;
        Self {
            config,
            transport,
            decoder,
            session: SendSession::new(),
            device: DeviceState::new(),
            command: CommandState::Idle,
            entered_at: None,
            now_ms: 0,
            connected: false,
            handshake_sent: false,
            use_register,
            awaiting_ack: None,
            last_ack_status: None,
            tx_seq: 0,
            last_rx_seq: 0,
            last_status_seq: 0,
            heat_plan: None,
            last_poll_at: None,
        }
    }

    // =========================================================================
    // Transport callbacks
    // =========================================================================

    /// The link is up. Starts the handshake when a key is configured.
    pub fn on_connected(&mut self) {
        self.connected = true;
        tracing::info!("Kettle connected");

        if self.config.registration_key.is_none() {
            tracing::warn!("No registration key configured, skipping handshake");
            return;
        }
        if let Err(e) = self.start_handshake(self.config.use_register) {
            tracing::warn!("Could not start handshake: {}", e);
        }
    }

    /// The link dropped. Resets all in-flight protocol state; user intent
    /// (target setpoint, custom temperature, hold time) is kept.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.handshake_sent = false;
        self.decoder.clear();
        self.session.reset();
        self.device.reset_link();
        self.command = CommandState::Idle;
        self.entered_at = None;
        self.awaiting_ack = None;
        self.heat_plan = None;
        self.last_poll_at = None;
        self.tx_seq = 0;
        self.last_rx_seq = 0;
        self.last_status_seq = 0;
        tracing::info!("Kettle disconnected, protocol state reset");
    }

    /// Feeds inbound notification bytes and dispatches every complete frame.
    pub fn on_notify(&mut self, data: &[u8]) {
        self.decoder.append(data);
        while let Some(frame) = self.decoder.next_frame() {
            self.handle_frame(&frame);
        }
        self.decoder.compact();
    }

    /// The transport finished writing the most recent chunk.
    pub fn on_write_complete(&mut self, success: bool) {
        match self.session.on_write_complete(success) {
            WriteOutcome::Continue => {
                if let Err(e) = self.pump() {
                    tracing::warn!("Failed to send next chunk: {}", e);
                }
            }
            WriteOutcome::Finished => tracing::trace!("Frame fully written"),
            WriteOutcome::Failed => tracing::warn!("Write failed, frame abandoned"),
            WriteOutcome::Ignored => tracing::trace!("Ignoring write completion with no write outstanding"),
        }
    }

    /// Periodic driver: liveness, sequence timing and idle polling.
    pub fn tick(&mut self, now_ms: u64) {
        self.now_ms = now_ms;

        if !self.connected || !self.handshake_sent {
            return;
        }

        self.run_state_machine(now_ms);

        if self.handshake_sent
            && self.command.is_idle()
            && !self.session.is_active()
            && self.poll_due(now_ms)
        {
            let threshold = self.config.liveness_threshold;
            if self.device.tick_liveness(threshold) {
                tracing::warn!("No status from kettle after {} polls, readings are stale", threshold);
            }
            if let Err(e) = self.send_poll() {
                tracing::warn!("Failed to send status poll: {}", e);
            }
        }
    }

    // =========================================================================
    // Command surface
    // =========================================================================

    /// Sets the temperature the next heat will target. Local only.
    pub fn set_target_setpoint(&mut self, temp_f: f32) {
        if !temp_f.is_finite() {
            tracing::warn!("Ignoring non-finite target setpoint {}", temp_f);
            return;
        }
        let temp_f = temp_f.clamp(f32::from(MIN_TEMP_F), f32::from(MAX_TEMP_F));
        self.device.set_target_setpoint(temp_f);
        tracing::info!("Target setpoint changed to {:.0}°F", temp_f);
    }

    /// Starts the heat sequence toward the target setpoint.
    pub fn start_heating(&mut self) -> Result<(), CoreError> {
        self.ensure_ready("start heating")?;

        let plan = resolve_heat_mode(
            self.config.protocol_version,
            self.device.kettle().target_setpoint_f,
        );
        tracing::info!(
            "Starting kettle at {}°F using mode {}",
            plan.temp_f,
            plan.mode
        );

        self.heat_plan = Some(plan);
        self.begin_sequence(if plan.needs_my_temp {
            CommandState::HeatSetTemp
        } else {
            CommandState::HeatStart
        });
        Ok(())
    }

    /// Starts the stop sequence.
    pub fn stop_heating(&mut self) -> Result<(), CoreError> {
        self.ensure_ready("stop heating")?;
        tracing::info!("Stopping kettle");
        self.begin_sequence(CommandState::Stop);
        Ok(())
    }

    pub fn set_hold_time(&mut self, seconds: u16) -> Result<(), CoreError> {
        self.ensure_ready("set hold time")?;
        self.send_next(&Command::SetHoldTime(seconds))?;
        self.device.set_hold_time(seconds);
        tracing::info!("Hold time changed to {} seconds", seconds);
        Ok(())
    }

    /// Sets the custom (my-temp) temperature, clamped to the accepted range.
    pub fn set_my_temp(&mut self, temp_f: u8) -> Result<(), CoreError> {
        self.ensure_ready("set my temp")?;
        let temp_f = clamp_temp_f(temp_f);
        self.send_next(&Command::SetMyTemp(temp_f))?;
        self.device.set_my_temp(temp_f);
        tracing::info!("My temp changed to {}°F", temp_f);
        Ok(())
    }

    pub fn set_baby_formula(&mut self, enabled: bool) -> Result<(), CoreError> {
        self.ensure_ready("set baby formula")?;
        self.send_next(&Command::SetBabyFormula(enabled))?;
        self.device.set_baby_formula(enabled);
        tracing::info!(
            "Baby formula mode {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Requests an extended status report now.
    pub fn request_status(&mut self) -> Result<(), CoreError> {
        self.ensure_ready("request status")?;
        self.send_poll()
    }

    /// Registers the configured key. The kettle must be in pairing mode.
    pub fn pair(&mut self) -> Result<(), CoreError> {
        self.start_handshake(true)
    }

    /// Reconnects with an already paired key.
    pub fn hello(&mut self) -> Result<(), CoreError> {
        self.start_handshake(false)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> &KettleState {
        self.device.kettle()
    }

    pub fn pending(&self) -> &PendingFlags {
        self.device.pending()
    }

    pub fn command_state(&self) -> CommandState {
        self.command
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Status of the most recent handshake ack.
    pub fn last_ack_status(&self) -> Option<AckStatus> {
        self.last_ack_status
    }

    /// Returns whether a new command would be accepted right now.
    pub fn can_send_command(&self) -> bool {
        self.connected && self.handshake_sent && self.command.is_idle() && !self.session.is_active()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            connected: self.connected,
            command: self.command,
            state: self.device.kettle().clone(),
            pending: *self.device.pending(),
            last_ack_status: self.last_ack_status,
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn handle_frame(&mut self, frame: &Frame) {
        let payload = &frame.payload;
        if payload.len() < 2 {
            tracing::debug!("Dropping {} frame with {}-byte payload", frame.frame_type, payload.len());
            return;
        }

        self.last_rx_seq = frame.seq;
        let command_id = payload[1];

        match frame.frame_type {
            FrameType::Ack => {
                self.handle_ack(frame, command_id);
                if command_id == CMD_POLL {
                    self.handle_extended_status(frame);
                }
            }
            FrameType::Message => {
                if command_id == CMD_CTRL {
                    self.handle_compact_status(frame);
                }
            }
        }
    }

    fn handle_ack(&mut self, frame: &Frame, command_id: u8) {
        let status = AckStatus::from_payload(&frame.payload);

        if self.awaiting_ack == Some(frame.seq) {
            self.awaiting_ack = None;
            self.last_ack_status = Some(status);
            tracing::info!("ACK complete: seq={:02x}, status={}", frame.seq, status);
        }

        if self.device.confirm(command_id) {
            tracing::info!(
                "{} confirmed by kettle ({})",
                kettlectl_protocol::message::command_name(command_id).unwrap_or("command"),
                status
            );
        }
    }

    fn handle_compact_status(&mut self, frame: &Frame) {
        match CompactStatus::parse(&frame.payload) {
            Some(status) => {
                self.device.apply_compact(&status);
                self.last_status_seq = frame.seq;
            }
            None => tracing::debug!("Discarding invalid compact status (seq={:02x})", frame.seq),
        }
    }

    fn handle_extended_status(&mut self, frame: &Frame) {
        match self.config.status_layout.parse_extended(&frame.payload) {
            Some(status) => {
                self.device.apply_extended(&status);
                self.last_status_seq = frame.seq;
            }
            None => tracing::debug!("Discarding invalid extended status (seq={:02x})", frame.seq),
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn ensure_ready(&self, action: &str) -> Result<(), CoreError> {
        let result = if !self.connected {
            Err(CoreError::NotConnected)
        } else if !self.handshake_sent {
            Err(CoreError::HandshakeRequired)
        } else if !self.command.is_idle() {
            Err(CoreError::SequenceInProgress(self.command))
        } else if self.session.is_active() {
            Err(self.session.busy_error())
        } else {
            Ok(())
        };

        if let Err(ref e) = result {
            tracing::warn!("Cannot {}: {}", action, e);
        }
        result
    }

    fn start_handshake(&mut self, use_register: bool) -> Result<(), CoreError> {
        if !self.connected {
            return Err(CoreError::NotConnected);
        }
        if self.config.registration_key.is_none() {
            tracing::error!("Registration key not set, cannot send hello/register");
            return Err(CoreError::MissingRegistrationKey);
        }
        if !self.command.is_idle() {
            return Err(CoreError::SequenceInProgress(self.command));
        }
        if self.session.is_active() {
            return Err(self.session.busy_error());
        }

        tracing::info!(
            "Starting handshake ({})",
            if use_register { "register" } else { "hello" }
        );
        self.use_register = use_register;
        self.handshake_sent = true;
        self.awaiting_ack = None;
        self.last_ack_status = None;
        self.begin_sequence(CommandState::HandshakeStart);
        Ok(())
    }

    fn next_tx_seq(&mut self) -> u8 {
        self.tx_seq = if self.tx_seq == 0 && self.last_rx_seq != 0 {
            self.last_rx_seq.wrapping_add(1)
        } else {
            self.tx_seq.wrapping_add(1)
        };
        self.tx_seq
    }

    /// Seq for the first compact request of a sequence: echo the last status.
    fn status_seq_base(&self) -> u8 {
        if self.last_status_seq != 0 {
            self.last_status_seq
        } else {
            self.last_rx_seq
        }
    }

    /// Sends `command` as a message frame with a fresh sequence number.
    fn send_next(&mut self, command: &Command) -> Result<(), CoreError> {
        let seq = self.next_tx_seq();
        self.send_command(FrameType::Message, seq, command)
    }

    fn send_poll(&mut self) -> Result<(), CoreError> {
        self.send_next(&Command::Poll)?;
        self.last_poll_at = Some(self.now_ms);
        Ok(())
    }

    /// Compact status requests travel as ack frames.
    fn send_compact_request(&mut self, seq: u8) -> Result<(), CoreError> {
        self.send_command(FrameType::Ack, seq, &Command::RequestCompactStatus)
    }

    fn send_command(&mut self, frame_type: FrameType, seq: u8, command: &Command) -> Result<(), CoreError> {
        if self.session.is_active() {
            let err = self.session.busy_error();
            tracing::warn!("Cannot send {}: {}", command.name(), err);
            return Err(err);
        }

        let payload = command.encode(self.config.protocol_version);
        let frame = Frame::new(frame_type, seq, payload);
        let chunks = self.session.begin(&frame)?;
        tracing::info!(
            "Sending {} (seq={:02x}, {} chunk{})",
            command.name(),
            seq,
            chunks,
            if chunks == 1 { "" } else { "s" }
        );
        self.pump()
    }

    /// Hands the next chunk of the open session to the transport.
    fn pump(&mut self) -> Result<(), CoreError> {
        if let Some(chunk) = self.session.next_chunk() {
            tracing::trace!("TX chunk {:02x?}", chunk);
            if let Err(e) = self.transport.send(chunk) {
                self.session.reset();
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn poll_due(&self, now_ms: u64) -> bool {
        self.last_poll_at
            .map_or(true, |at| now_ms.saturating_sub(at) >= self.config.timing.poll_interval_ms)
    }

    // =========================================================================
    // Sequencing
    // =========================================================================

    /// Starts a sequence from the command surface; timing begins on the
    /// next tick.
    fn begin_sequence(&mut self, state: CommandState) {
        self.command = state;
        self.entered_at = None;
    }

    fn enter(&mut self, state: CommandState) {
        tracing::debug!("Command state {} -> {}", self.command, state);
        self.command = state;
        self.entered_at = Some(self.now_ms);
    }

    /// Dispatches the current state, re-dispatching after each transition so
    /// zero-delay steps settle within one tick.
    fn run_state_machine(&mut self, now_ms: u64) {
        for _ in 0..CommandState::COUNT {
            let entered_at = *self.entered_at.get_or_insert(now_ms);
            let elapsed = now_ms.saturating_sub(entered_at);
            let before = self.command;

            self.step(elapsed);

            if self.command == before {
                if !before.is_idle() && elapsed >= self.config.timing.idle_timeout_ms {
                    tracing::error!("Command state {} stuck for {} ms, forcing idle", before, elapsed);
                    self.abort_sequence();
                }
                return;
            }
        }
        tracing::warn!(
            "Command state machine did not settle within {} steps",
            CommandState::COUNT
        );
    }

    fn step(&mut self, elapsed: u64) {
        match self.command {
            CommandState::Idle => {}
            CommandState::HandshakeStart => self.handshake_start(),
            CommandState::HandshakeWaitChunks => self.handshake_wait_chunks(elapsed),
            CommandState::HandshakePoll => self.handshake_poll(elapsed),
            CommandState::HeatSetTemp => self.heat_set_temp(elapsed),
            CommandState::HeatStart => self.heat_start(elapsed),
            CommandState::HeatPoll => self.heat_poll(elapsed),
            CommandState::HeatPollRepeat => self.heat_poll_repeat(elapsed),
            CommandState::HeatComplete => self.heat_complete(elapsed),
            CommandState::Stop => self.stop(),
            CommandState::StopPoll => self.stop_poll(elapsed),
            CommandState::StopRepeat => self.stop_repeat(elapsed),
        }
    }

    fn abort_sequence(&mut self) {
        if matches!(
            self.command,
            CommandState::HandshakeStart | CommandState::HandshakeWaitChunks | CommandState::HandshakePoll
        ) {
            self.handshake_sent = false;
            self.awaiting_ack = None;
        }
        self.heat_plan = None;
        self.enter(CommandState::Idle);
    }

    fn handshake_name(&self) -> &'static str {
        if self.use_register {
            "registration"
        } else {
            "handshake"
        }
    }

    fn handshake_timed_out(&mut self, elapsed: u64) -> bool {
        if elapsed >= self.config.timing.handshake_timeout_ms {
            tracing::error!("{} timeout after {} ms", self.handshake_name(), elapsed);
            self.abort_sequence();
            return true;
        }
        false
    }

    fn handshake_start(&mut self) {
        let Some(key) = self.config.registration_key else {
            tracing::error!("Registration key not set, abandoning {}", self.handshake_name());
            self.abort_sequence();
            return;
        };
        if self.session.is_active() {
            return;
        }

        let command = if self.use_register {
            Command::Register(key)
        } else {
            Command::Hello(key)
        };
        if let Err(e) = self.send_command(FrameType::Message, 0, &command) {
            tracing::warn!("Failed to send {}: {}", command.name(), e);
            self.abort_sequence();
            return;
        }

        self.awaiting_ack = Some(0);
        self.enter(CommandState::HandshakeWaitChunks);
    }

    fn handshake_wait_chunks(&mut self, elapsed: u64) {
        if self.handshake_timed_out(elapsed) {
            return;
        }
        if self.awaiting_ack.is_some() || self.session.is_active() {
            return;
        }
        self.enter(CommandState::HandshakePoll);
    }

    fn handshake_poll(&mut self, elapsed: u64) {
        if self.handshake_timed_out(elapsed) {
            return;
        }
        if self.awaiting_ack.is_some() {
            return;
        }

        if let Some(status @ AckStatus::Failed(_)) = self.last_ack_status {
            let command_id = if self.use_register {
                kettlectl_protocol::message::CMD_REGISTER
            } else {
                kettlectl_protocol::message::CMD_HELLO
            };
            tracing::error!(
                "Error in {}: {} ({})",
                self.handshake_name(),
                status,
                status.describe(command_id)
            );
            self.abort_sequence();
            return;
        }

        if self.session.is_active() {
            return;
        }
        if let Err(e) = self.send_poll() {
            tracing::warn!("Failed to send status poll: {}", e);
        }
        self.enter(CommandState::Idle);
        tracing::info!(
            "{} complete",
            if self.use_register {
                "Device registration"
            } else {
                "Registration handshake"
            }
        );
    }

    fn heat_set_temp(&mut self, elapsed: u64) {
        if elapsed < self.config.timing.pre_setpoint_delay_ms {
            return;
        }
        let Some(plan) = self.heat_plan else {
            self.abort_sequence();
            return;
        };
        if self.config.protocol_version != ProtocolVersion::V1 || plan.mode != Mode::MyTemp {
            self.enter(CommandState::HeatStart);
            return;
        }
        if self.session.is_active() {
            return;
        }

        match self.send_next(&Command::SetMyTemp(plan.temp_f)) {
            Ok(()) => {
                self.device.set_my_temp(plan.temp_f);
                self.enter(CommandState::HeatStart);
            }
            Err(e) => {
                tracing::warn!("Failed to send set my temp: {}", e);
                self.abort_sequence();
            }
        }
    }

    fn heat_start(&mut self, elapsed: u64) {
        if elapsed < self.config.timing.pre_setpoint_delay_ms
            || self.device.pending().my_temp
            || self.session.is_active()
        {
            return;
        }
        let Some(plan) = self.heat_plan else {
            self.abort_sequence();
            return;
        };

        let command = Command::set_mode(
            self.config.protocol_version,
            plan.mode,
            plan.temp_f,
            self.device.kettle().hold_time_seconds,
        );
        match self.send_next(&command) {
            Ok(()) => self.enter(CommandState::HeatPoll),
            Err(e) => {
                tracing::warn!("Failed to send SETPOINT: {}", e);
                self.abort_sequence();
            }
        }
    }

    fn heat_poll(&mut self, elapsed: u64) {
        if elapsed < self.config.timing.post_setpoint_delay_ms || self.session.is_active() {
            return;
        }
        let seq = self.status_seq_base();
        match self.send_compact_request(seq) {
            Ok(()) => self.enter(CommandState::HeatPollRepeat),
            Err(e) => {
                tracing::warn!("Failed to request compact status: {}", e);
                self.abort_sequence();
            }
        }
    }

    fn heat_poll_repeat(&mut self, elapsed: u64) {
        if elapsed < self.config.timing.control_delay_ms || self.session.is_active() {
            return;
        }
        let seq = self.next_tx_seq();
        match self.send_compact_request(seq) {
            Ok(()) => self.enter(CommandState::HeatComplete),
            Err(e) => {
                tracing::warn!("Failed to request compact status: {}", e);
                self.abort_sequence();
            }
        }
    }

    fn heat_complete(&mut self, elapsed: u64) {
        if elapsed < self.config.timing.control_delay_ms {
            return;
        }
        self.heat_plan = None;
        self.enter(CommandState::Idle);
        tracing::info!("Start heating sequence complete");
    }

    fn stop(&mut self) {
        if self.session.is_active() {
            return;
        }
        match self.send_next(&Command::Stop) {
            Ok(()) => self.enter(CommandState::StopPoll),
            Err(e) => {
                tracing::warn!("Failed to send STOP: {}", e);
                self.abort_sequence();
            }
        }
    }

    fn stop_poll(&mut self, elapsed: u64) {
        if elapsed < self.config.timing.control_delay_ms || self.session.is_active() {
            return;
        }
        let seq = self.status_seq_base();
        match self.send_compact_request(seq) {
            Ok(()) => self.enter(CommandState::StopRepeat),
            Err(e) => {
                tracing::warn!("Failed to request compact status: {}", e);
                self.abort_sequence();
            }
        }
    }

    fn stop_repeat(&mut self, elapsed: u64) {
        if elapsed < self.config.timing.control_delay_ms || self.session.is_active() {
            return;
        }
        if let Err(e) = self.send_next(&Command::Stop) {
            tracing::warn!("Failed to send STOP: {}", e);
        }
        self.enter(CommandState::Idle);
        tracing::info!("Stop heating sequence complete");
    }
}
