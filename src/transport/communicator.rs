// MIT License - Copyright (c) 2026 Peter Wright

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, timeout};
use tracing::{debug, error, warn};

use crate::constants::{HEADER_SIZE, RESPONSE_EXPIRY_MS, SOCKET_TIMEOUT_MS};
use crate::crypto::EncryptionHandler;
use crate::error::{ParadoxError, Result};
use crate::event::{EventSender, PanelEvent};
use crate::protocol::{self, RequestType};
use crate::queue::{Request, Response, SyncQueue};
use crate::transport::direct::DirectTcpTransport;

/// Control messages handed to the I/O task.
enum IoCommand {
    Submit(Request),
    /// Sleep, perform one receive, discard whatever arrives. Used to flush
    /// the unsolicited packet the panel emits after the final handshake
    /// step; proceeding without the flush desynchronizes later reads.
    DrainOne {
        delay: Duration,
        done: oneshot::Sender<()>,
    },
}

/// Serialized request/response path for one panel connection.
///
/// Owns the transport and the [`SyncQueue`] inside a single I/O task: every
/// send and receive for this connection happens there, in the iterative
/// drain loop. Receives take priority whenever a request is in flight; a
/// new send only goes out once the receive queue is empty. This mirrors the
/// panel firmware, which cannot handle pipelined commands.
///
/// Session encryption state lives behind a lock shared with the login
/// sequence, which replaces the key twice during the Start phase.
pub struct Communicator {
    control_tx: mpsc::Sender<IoCommand>,
    crypto: Option<Arc<Mutex<EncryptionHandler>>>,
    online: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    io_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Communicator {
    /// Take ownership of a connected transport and spawn the I/O task.
    ///
    /// `encrypted` is negotiated once per connection (firmware dependent);
    /// in plaintext mode the encryption engine is bypassed entirely.
    pub fn new(
        transport: DirectTcpTransport,
        encrypted: bool,
        panel_password: &str,
        event_tx: EventSender,
    ) -> Self {
        let crypto = encrypted
            .then(|| Arc::new(Mutex::new(EncryptionHandler::new(panel_password))));
        let online = Arc::new(AtomicBool::new(false));
        let (control_tx, control_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let io_handle = tokio::spawn(run_io_loop(
            transport,
            crypto.clone(),
            control_rx,
            shutdown_rx,
            event_tx,
            online.clone(),
        ));

        Self {
            control_tx,
            crypto,
            online,
            shutdown_tx,
            io_handle: Some(io_handle),
        }
    }

    /// Submit a pre-built frame and wait for its matched response.
    pub async fn roundtrip(&self, request_type: RequestType, frame: Vec<u8>) -> Result<Response> {
        let (request, rx) = Request::new(request_type, frame);
        self.control_tx
            .send(IoCommand::Submit(request))
            .await
            .map_err(|_| ParadoxError::ChannelClosed)?;

        // The I/O task resolves every request well inside this bound; the
        // outer timeout only guards against the task dying mid-flight.
        let outer = Duration::from_millis(SOCKET_TIMEOUT_MS + RESPONSE_EXPIRY_MS + 1000);
        match timeout(outer, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ParadoxError::ChannelClosed),
            Err(_) => Err(ParadoxError::ResponseExpired {
                age_ms: outer.as_millis() as u64,
            }),
        }
    }

    /// Build a frame, encrypting the payload when this connection operates
    /// in encrypted mode.
    pub async fn encode(&self, command: u8, message_type: u8, payload: &[u8]) -> Vec<u8> {
        match &self.crypto {
            Some(crypto) => {
                let handler = crypto.lock().await;
                protocol::encode(command, message_type, payload, Some(&handler))
            }
            None => protocol::encode(command, message_type, payload, None),
        }
    }

    /// Replace the session key. No-op in plaintext mode.
    pub async fn update_key(&self, key: &[u8]) {
        if let Some(crypto) = &self.crypto {
            crypto.lock().await.update_key(key);
        }
    }

    /// Whether this connection operates in encrypted mode.
    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }

    /// Flush one unsolicited packet after `delay`, discarding it.
    pub async fn drain_one(&self, delay: Duration) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.control_tx
            .send(IoCommand::DrainOne {
                delay,
                done: done_tx,
            })
            .await
            .map_err(|_| ParadoxError::ChannelClosed)?;
        done_rx.await.map_err(|_| ParadoxError::ChannelClosed)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Shut the I/O task down; it fails all queued requests and tears the
    /// transport down best-effort.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        // Give the task a moment to run its teardown path
        sleep(Duration::from_millis(20)).await;
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        if let Some(handle) = self.io_handle.take() {
            handle.abort();
        }
    }
}

/// The drain loop. Iterative on purpose: a recursive formulation grows the
/// stack under backlog.
async fn run_io_loop(
    mut transport: DirectTcpTransport,
    crypto: Option<Arc<Mutex<EncryptionHandler>>>,
    mut control_rx: mpsc::Receiver<IoCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    event_tx: EventSender,
    online: Arc<AtomicBool>,
) {
    let mut queue = SyncQueue::new();
    let expiry = Duration::from_millis(RESPONSE_EXPIRY_MS);

    let fatal = loop {
        if *shutdown_rx.borrow() {
            break None;
        }

        let in_flight_deadline = queue
            .in_flight()
            .map(|flight| tokio::time::Instant::from_std(flight.sent_at + expiry));

        if let Some(deadline) = in_flight_deadline {
            tokio::select! {
                result = transport.receive() => match result {
                    Ok(bytes) => route_frames(&bytes, &mut queue, &crypto).await,
                    Err(ParadoxError::SocketTimeout) => {
                        warn!("Socket timeout while awaiting response");
                        let _ = event_tx.send(PanelEvent::SocketTimeout);
                        if let Some(request) = queue.complete() {
                            let _ = request.responder.send(Err(ParadoxError::SocketTimeout));
                        }
                    }
                    Err(e) => break Some(e),
                },
                _ = sleep_until(deadline) => {
                    if let Some(flight) = queue.expire_stale(expiry) {
                        let age_ms = flight.age().as_millis() as u64;
                        warn!("Abandoning request after {}ms without a response", age_ms);
                        let _ = flight
                            .request
                            .responder
                            .send(Err(ParadoxError::ResponseExpired { age_ms }));
                    }
                },
                cmd = control_rx.recv() => match cmd {
                    Some(cmd) => handle_control(cmd, &mut queue, &mut transport).await,
                    None => break None,
                },
                _ = shutdown_rx.changed() => break None,
            }
        } else if let Some(request) = queue.pop_sendable() {
            debug!(
                "Sending {:?} request ({} bytes)",
                request.request_type,
                request.frame.len()
            );
            match transport.send(&request.frame).await {
                Ok(()) => {
                    let _ = queue.mark_in_flight(request);
                }
                Err(ParadoxError::SocketTimeout) => {
                    warn!("Socket timeout on send");
                    let _ = event_tx.send(PanelEvent::SocketTimeout);
                    let _ = request.responder.send(Err(ParadoxError::SocketTimeout));
                }
                Err(e) => {
                    let _ = request.responder.send(Err(ParadoxError::Disconnected));
                    break Some(e);
                }
            }
        } else {
            tokio::select! {
                cmd = control_rx.recv() => match cmd {
                    Some(cmd) => handle_control(cmd, &mut queue, &mut transport).await,
                    None => break None,
                },
                _ = shutdown_rx.changed() => break None,
            }
        }
    };

    if let Some(e) = fatal {
        error!("Communication lost: {}", e);
        let _ = event_tx.send(PanelEvent::CommunicationFailure {
            reason: e.to_string(),
        });
    }

    queue.fail_all(|| ParadoxError::Disconnected);
    online.store(false, Ordering::SeqCst);
    let _ = event_tx.send(PanelEvent::Disconnected);
    transport.close().await;
}

async fn handle_control(cmd: IoCommand, queue: &mut SyncQueue, transport: &mut DirectTcpTransport) {
    match cmd {
        IoCommand::Submit(request) => {
            let _ = queue.submit(request);
        }
        IoCommand::DrainOne { delay, done } => {
            sleep(delay).await;
            match transport.receive().await {
                Ok(bytes) => debug!("Drained and discarded {} stray bytes", bytes.len()),
                Err(e) => debug!("Nothing to drain: {}", e),
            }
            let _ = done.send(());
        }
    }
}

/// Split a receive buffer and deliver the first frame that matches the
/// outstanding request. Everything else in the buffer is a live event or
/// garbage; it is logged and dropped, never an error.
async fn route_frames(
    bytes: &[u8],
    queue: &mut SyncQueue,
    crypto: &Option<Arc<Mutex<EncryptionHandler>>>,
) {
    let Some(request_type) = queue.in_flight().map(|f| f.request.request_type) else {
        debug!("Unsolicited {} bytes with nothing in flight", bytes.len());
        return;
    };

    for frame in protocol::split_frames(bytes) {
        let plain = decrypt_frame(frame, crypto).await;
        if protocol::decode(&plain, request_type).is_some() {
            if let Some(request) = queue.complete() {
                let _ = request
                    .responder
                    .send(Ok(Response::new(request_type, plain)));
            }
            return;
        }
        debug!(
            "Discarding frame not matching {:?} ({} bytes)",
            request_type,
            frame.len()
        );
    }
}

/// Rebuild a plaintext frame from a possibly encrypted one. Only the
/// payload inside the declared length is ciphered; absorbed trailing
/// padding stays as-is and is dropped here.
async fn decrypt_frame(frame: &[u8], crypto: &Option<Arc<Mutex<EncryptionHandler>>>) -> Vec<u8> {
    if frame.len() <= HEADER_SIZE || !protocol::is_encrypted(frame) {
        return frame.to_vec();
    }
    let Some(crypto) = crypto else {
        return frame.to_vec();
    };

    let declared = (frame[1] as usize).min(frame.len());
    let handler = crypto.lock().await;
    let mut plain = frame[..HEADER_SIZE].to_vec();
    plain.extend_from_slice(&handler.decrypt(&frame[HEADER_SIZE..declared]));
    plain
}
