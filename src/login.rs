// MIT License - Copyright (c) 2026 Peter Wright

//! The logon handshake state machine.
//!
//! Phases run strictly in order; any failed success predicate drops the
//! machine through Logout to Offline and the whole handshake must be
//! restarted by the caller - there is no partial retry within a phase.
//! Every sending phase submits its packet as a `Logon` request through the
//! communicator and interprets the matched response itself, which couples
//! phase identity to response routing.
//!
//! The transition table lives in [`LoginStateMachine::run`]: one match arm
//! per phase, auditable in one place.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants::*;
use crate::crypto::{EncryptionHandler, KEY_SIZE};
use crate::error::{LogonFailure, ParadoxError, Result};
use crate::protocol::{self, RequestType};
use crate::transport::Communicator;

/// Identity blob the panel returns in the Step4 probe response. Captured
/// once, never mutated; Step7 derives its initialization packet from the
/// Step6 copy of the same message.
#[derive(Debug, Clone)]
pub struct PanelInfo {
    raw: Vec<u8>,
}

impl PanelInfo {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn module_address(&self) -> u8 {
        self.raw[1]
    }

    pub fn product_id(&self) -> u8 {
        self.raw[4]
    }

    pub fn software_version(&self) -> u8 {
        self.raw[5]
    }

    pub fn serial_number(&self) -> [u8; 4] {
        [self.raw[12], self.raw[13], self.raw[14], self.raw[15]]
    }
}

/// Handshake phases. Step7 carries the raw Step6 response forward because
/// its packet is a byte-rearrangement of that message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPhase {
    Start,
    Step2,
    Step3,
    Step4,
    Step5,
    Step6,
    Step7 { init_message: Vec<u8> },
    InitializeData,
    Online,
    Logout,
    Offline,
}

/// Drives the handshake over an established communicator.
pub struct LoginStateMachine {
    phase: LoginPhase,
    panel_password: String,
    pc_password: [u8; 2],
    panel_info: Option<PanelInfo>,
    failure: Option<ParadoxError>,
}

impl LoginStateMachine {
    pub fn new(panel_password: &str, pc_password: [u8; 2]) -> Self {
        Self {
            phase: LoginPhase::Start,
            panel_password: panel_password.to_string(),
            pc_password,
            panel_info: None,
            failure: None,
        }
    }

    pub fn phase(&self) -> &LoginPhase {
        &self.phase
    }

    /// The panel identity captured in Step4, available once past that phase.
    pub fn panel_info(&self) -> Option<&PanelInfo> {
        self.panel_info.as_ref()
    }

    /// Execute the handshake to completion.
    ///
    /// `load_memory_map` is the external callback the InitializeData phase
    /// invokes before the machine marks the communicator online. On any
    /// phase failure the machine logs the classification, transitions
    /// through Logout to Offline (tearing the communicator down), and
    /// returns the error.
    pub async fn run<F, Fut>(&mut self, comm: &Communicator, load_memory_map: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut load_memory_map = Some(load_memory_map);

        loop {
            let phase = std::mem::replace(&mut self.phase, LoginPhase::Offline);
            let next = match phase {
                LoginPhase::Start => self.phase_start(comm).await,
                LoginPhase::Step2 => self.empty_ip_phase(comm, IP_LOGIN_1, LoginPhase::Step3).await,
                LoginPhase::Step3 => self.empty_ip_phase(comm, IP_LOGIN_2, LoginPhase::Step4).await,
                LoginPhase::Step4 => self.phase_step4(comm).await,
                LoginPhase::Step5 => self.phase_step5(comm).await,
                LoginPhase::Step6 => self.phase_step6(comm).await,
                LoginPhase::Step7 { init_message } => self.phase_step7(comm, init_message).await,
                LoginPhase::InitializeData => match load_memory_map.take() {
                    Some(load) => load().await.map(|_| LoginPhase::Online),
                    None => Ok(LoginPhase::Online),
                },
                LoginPhase::Online => {
                    comm.set_online(true);
                    info!("Logon complete, communicator online");
                    self.phase = LoginPhase::Online;
                    return Ok(());
                }
                LoginPhase::Logout => Ok(LoginPhase::Offline),
                LoginPhase::Offline => {
                    comm.set_online(false);
                    comm.shutdown().await;
                    self.phase = LoginPhase::Offline;
                    return Err(self.failure.take().unwrap_or(ParadoxError::Offline));
                }
            };

            match next {
                Ok(phase) => self.phase = phase,
                Err(e) => {
                    warn!("Logon failed: {}", e);
                    self.failure = Some(e);
                    self.phase = LoginPhase::Logout;
                }
            }
        }
    }

    /// Start: send the (optionally pre-encrypted) password with the connect
    /// command, classify the result byte, and roll the session key.
    async fn phase_start(&mut self, comm: &Communicator) -> Result<LoginPhase> {
        // Rolling key, step one: the configured password keys the cipher
        // before the connect packet is built.
        if comm.is_encrypted() {
            comm.update_key(&EncryptionHandler::key_from_password(&self.panel_password))
                .await;
        }
        let frame = comm
            .encode(IP_CONNECT, MSG_IP_CONTROL, self.panel_password.as_bytes())
            .await;
        let response = comm.roundtrip(RequestType::Logon, frame).await?;

        let session_key = handle_start_response(response.payload())?;
        // Rolling key, step two: the panel-supplied session key replaces
        // the password key.
        if comm.is_encrypted() {
            comm.update_key(&session_key).await;
        }
        debug!("Connect accepted");
        Ok(LoginPhase::Step2)
    }

    /// Step2/Step3: empty-payload login commands. No explicit failure
    /// decoding on these replies; the sequence simply continues.
    async fn empty_ip_phase(
        &mut self,
        comm: &Communicator,
        command: u8,
        next: LoginPhase,
    ) -> Result<LoginPhase> {
        let frame = comm.encode(command, MSG_IP_CONTROL, &[]).await;
        comm.roundtrip(RequestType::Logon, frame).await?;
        Ok(next)
    }

    /// Step4: first identity probe. The response parameterizes nothing yet
    /// but is captured as the immutable panel identity.
    async fn phase_step4(&mut self, comm: &Communicator) -> Result<LoginPhase> {
        let frame = comm
            .encode(
                SERIAL_START_COMMUNICATION,
                MSG_SERIAL_REQUEST,
                &protocol::probe_packet(),
            )
            .await;
        let response = comm.roundtrip(RequestType::Logon, frame).await?;

        let identity = handle_probe_response(response.payload())?;
        let info = PanelInfo::new(identity);
        debug!(
            "Panel identity captured: product {:#04X}, firmware {:#04X}",
            info.product_id(),
            info.software_version()
        );
        self.panel_info = Some(info);
        Ok(LoginPhase::Step5)
    }

    /// Step5: tell the module the serial connection is initiated.
    async fn phase_step5(&mut self, comm: &Communicator) -> Result<LoginPhase> {
        let frame = comm
            .encode(
                IP_SERIAL_CONNECTION,
                MSG_IP_CONTROL,
                &SERIAL_CONNECTION_PAYLOAD,
            )
            .await;
        comm.roundtrip(RequestType::Logon, frame).await?;
        Ok(LoginPhase::Step6)
    }

    /// Step6: second identity probe; the raw response travels into Step7.
    async fn phase_step6(&mut self, comm: &Communicator) -> Result<LoginPhase> {
        let frame = comm
            .encode(
                SERIAL_START_COMMUNICATION,
                MSG_SERIAL_REQUEST,
                &protocol::probe_packet(),
            )
            .await;
        let response = comm.roundtrip(RequestType::Logon, frame).await?;

        let init_message = handle_probe_response(response.payload())?;
        Ok(LoginPhase::Step7 { init_message })
    }

    /// Step7: derive the initialization packet from the Step6 response,
    /// send it, validate the ack nibble, and flush the ghost packet.
    async fn phase_step7(
        &mut self,
        comm: &Communicator,
        init_message: Vec<u8>,
    ) -> Result<LoginPhase> {
        let packet = protocol::initialize_packet(&init_message, self.pc_password).ok_or(
            ParadoxError::ShortHandshakeResponse {
                got: init_message.len(),
                need: PROBE_LEN,
            },
        )?;
        let frame = comm
            .encode(SERIAL_INITIALIZE, MSG_SERIAL_REQUEST, &packet)
            .await;
        let response = comm.roundtrip(RequestType::Logon, frame).await?;

        handle_initialize_ack(response.payload())?;

        // The panel emits one stray packet shortly after the final ack; it
        // must be flushed or later reads desynchronize.
        comm.drain_one(Duration::from_millis(GHOST_PACKET_DELAY_MS))
            .await?;
        Ok(LoginPhase::InitializeData)
    }
}

/// Validate the connect response and extract the panel-supplied session
/// key. The result byte doubles as the serial command byte, so any refusal
/// still classifies under the logon nibble set.
fn handle_start_response(payload: Option<&[u8]>) -> Result<[u8; KEY_SIZE]> {
    let Some(payload) = payload else {
        return Err(ParadoxError::LogonFailed(LogonFailure::Refused));
    };
    match payload.first() {
        Some(&LOGON_GRANTED) => {}
        Some(&code) => {
            return Err(ParadoxError::LogonFailed(LogonFailure::from_result_byte(
                code,
            )));
        }
        None => return Err(ParadoxError::LogonFailed(LogonFailure::Refused)),
    }
    if payload.len() < KEY_SIZE {
        return Err(ParadoxError::LogonFailed(LogonFailure::Refused));
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&payload[..KEY_SIZE]);
    Ok(key)
}

/// Validate a start-communication probe response: anything shorter than the
/// identity message cannot parameterize the initialization packet.
fn handle_probe_response(payload: Option<&[u8]>) -> Result<Vec<u8>> {
    match payload {
        Some(p) if p.len() >= PROBE_LEN => Ok(p.to_vec()),
        Some(p) => Err(ParadoxError::ShortHandshakeResponse {
            got: p.len(),
            need: PROBE_LEN,
        }),
        None => Err(ParadoxError::LogonFailed(LogonFailure::Refused)),
    }
}

/// The final ack must carry a 0x1-nibble command.
fn handle_initialize_ack(payload: Option<&[u8]>) -> Result<()> {
    match payload.and_then(|p| p.first()) {
        Some(&command) if command >> 4 == 0x1 => Ok(()),
        _ => Err(ParadoxError::LogonFailed(LogonFailure::Refused)),
    }
}
