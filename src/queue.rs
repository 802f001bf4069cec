// MIT License - Copyright (c) 2026 Peter Wright

//! Request/response synchronization for a single panel connection.
//!
//! The panel firmware cannot pipeline: a new command sent while a response
//! is outstanding desynchronizes the session. [`SyncQueue`] enforces that
//! with two bounded FIFOs - requests wait in the send queue, and at most
//! one request sits at the head of the receive queue awaiting its response.
//! The communicator drains the pair iteratively: receive first whenever a
//! request is in flight, send the next queued request only once the receive
//! queue is empty.
//!
//! Each connection owns its queue pair; there is no process-global state,
//! so multiple simultaneous panel connections stay independent.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::constants::{RECEIVE_QUEUE_CAPACITY, SEND_QUEUE_CAPACITY};
use crate::error::{ParadoxError, Result};
use crate::protocol::{self, RequestType};

/// One queued unit of traffic: the frame to put on the wire and the channel
/// its response is delivered on.
#[derive(Debug)]
pub struct Request {
    pub request_type: RequestType,
    pub frame: Vec<u8>,
    pub responder: oneshot::Sender<Result<Response>>,
    pub created_at: Instant,
}

impl Request {
    /// Create a request and the receiving half of its response channel.
    pub fn new(
        request_type: RequestType,
        frame: Vec<u8>,
    ) -> (Self, oneshot::Receiver<Result<Response>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request_type,
                frame,
                responder: tx,
                created_at: Instant::now(),
            },
            rx,
        )
    }
}

/// A response matched to its originating request.
///
/// `header()` and `payload()` return `None` when the raw bytes do not match
/// the request type's expected command-nibble pattern - the "not my packet"
/// signal. Callers treat that as an unrelated or garbled frame and keep
/// reading, never as a protocol error.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_type: RequestType,
    pub raw: Vec<u8>,
    header_len: Option<usize>,
    payload_len: usize,
}

impl Response {
    pub fn new(request_type: RequestType, raw: Vec<u8>) -> Self {
        let (header_len, payload_len) = match protocol::decode(&raw, request_type) {
            Some(frame) => (Some(frame.header.len()), frame.payload.len()),
            None => (None, 0),
        };
        Self {
            request_type,
            raw,
            header_len,
            payload_len,
        }
    }

    pub fn header(&self) -> Option<&[u8]> {
        self.header_len.map(|len| &self.raw[..len])
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.header_len
            .map(|len| &self.raw[len..len + self.payload_len])
    }

    /// Whether the raw bytes matched the expected pattern at all.
    pub fn is_matched(&self) -> bool {
        self.header_len.is_some()
    }
}

/// A request that has been written to the wire and awaits its response.
#[derive(Debug)]
pub struct InFlight {
    pub request: Request,
    pub sent_at: Instant,
}

impl InFlight {
    pub fn age(&self) -> Duration {
        self.sent_at.elapsed()
    }
}

/// The send/receive queue pair. Owned by one communicator; never shared.
#[derive(Debug)]
pub struct SyncQueue {
    send_queue: VecDeque<Request>,
    receive_queue: VecDeque<InFlight>,
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncQueue {
    pub fn new() -> Self {
        Self {
            send_queue: VecDeque::new(),
            receive_queue: VecDeque::new(),
        }
    }

    /// Append a request to the send queue. On overflow the request's
    /// responder is notified before the error returns, so no caller is left
    /// awaiting a response that will never come.
    pub fn submit(&mut self, request: Request) -> Result<()> {
        if self.send_queue.len() >= SEND_QUEUE_CAPACITY {
            let _ = request.responder.send(Err(ParadoxError::SendQueueFull {
                capacity: SEND_QUEUE_CAPACITY,
            }));
            return Err(ParadoxError::SendQueueFull {
                capacity: SEND_QUEUE_CAPACITY,
            });
        }
        self.send_queue.push_back(request);
        Ok(())
    }

    /// Take the next request to put on the wire.
    ///
    /// Returns `None` while a response is outstanding: sends never overtake
    /// an in-flight request.
    pub fn pop_sendable(&mut self) -> Option<Request> {
        if self.receive_queue.is_empty() {
            self.send_queue.pop_front()
        } else {
            None
        }
    }

    /// Move a just-sent request into the receive queue, stamping the time
    /// its response window opened. The bound can only trip if the
    /// one-in-flight invariant is broken elsewhere; the responder is
    /// notified before the error returns.
    pub fn mark_in_flight(&mut self, request: Request) -> Result<()> {
        if self.receive_queue.len() >= RECEIVE_QUEUE_CAPACITY {
            let _ = request.responder.send(Err(ParadoxError::ReceiveQueueFull {
                capacity: RECEIVE_QUEUE_CAPACITY,
            }));
            return Err(ParadoxError::ReceiveQueueFull {
                capacity: RECEIVE_QUEUE_CAPACITY,
            });
        }
        self.receive_queue.push_back(InFlight {
            request,
            sent_at: Instant::now(),
        });
        Ok(())
    }

    /// The request currently awaiting its response, if any.
    pub fn in_flight(&self) -> Option<&InFlight> {
        self.receive_queue.front()
    }

    /// Pop the in-flight request once its response arrived.
    pub fn complete(&mut self) -> Option<Request> {
        self.receive_queue.pop_front().map(|f| f.request)
    }

    /// Pop the in-flight request if it has waited at least `max_age`.
    /// Stale requests are abandoned rather than awaited forever.
    pub fn expire_stale(&mut self, max_age: Duration) -> Option<InFlight> {
        if self.receive_queue.front().is_some_and(|f| f.age() >= max_age) {
            self.receive_queue.pop_front()
        } else {
            None
        }
    }

    pub fn has_in_flight(&self) -> bool {
        !self.receive_queue.is_empty()
    }

    pub fn pending_sends(&self) -> usize {
        self.send_queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.send_queue.is_empty() && self.receive_queue.is_empty()
    }

    /// Fail everything still queued or in flight, e.g. on disconnect.
    pub fn fail_all(&mut self, make_error: impl Fn() -> ParadoxError) {
        for flight in self.receive_queue.drain(..) {
            let _ = flight.request.responder.send(Err(make_error()));
        }
        for request in self.send_queue.drain(..) {
            let _ = request.responder.send(Err(make_error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HEADER_SIZE;

    fn request(tag: u8) -> (Request, oneshot::Receiver<Result<Response>>) {
        Request::new(RequestType::Logon, vec![tag; HEADER_SIZE])
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = SyncQueue::new();
        let (a, _ra) = request(0xA0);
        let (b, _rb) = request(0xB0);
        queue.submit(a).unwrap();
        queue.submit(b).unwrap();

        let first = queue.pop_sendable().expect("A is sendable");
        assert_eq!(first.frame[0], 0xA0);
        queue.mark_in_flight(first).unwrap();

        // B must not be sendable while A awaits its response
        assert!(queue.pop_sendable().is_none());

        queue.complete().expect("A completes");
        let second = queue.pop_sendable().expect("B sendable after A");
        assert_eq!(second.frame[0], 0xB0);
    }

    #[test]
    fn test_no_send_while_in_flight() {
        let mut queue = SyncQueue::new();
        let (a, _ra) = request(0xA0);
        queue.submit(a).unwrap();
        let a = queue.pop_sendable().unwrap();
        queue.mark_in_flight(a).unwrap();

        let (b, _rb) = request(0xB0);
        queue.submit(b).unwrap();
        assert!(queue.has_in_flight());
        assert!(queue.pop_sendable().is_none());
        assert_eq!(queue.pending_sends(), 1);
    }

    #[test]
    fn test_expiry() {
        let mut queue = SyncQueue::new();
        let (a, _ra) = request(0xA0);
        queue.submit(a).unwrap();
        let a = queue.pop_sendable().unwrap();
        queue.mark_in_flight(a).unwrap();

        // Fresh request is not stale
        assert!(queue.expire_stale(Duration::from_secs(60)).is_none());
        // Zero threshold expires immediately
        let stale = queue.expire_stale(Duration::ZERO);
        assert!(stale.is_some());
        assert!(!queue.has_in_flight());
    }

    #[test]
    fn test_send_queue_bound() {
        let mut queue = SyncQueue::new();
        for _ in 0..SEND_QUEUE_CAPACITY {
            let (r, _rx) = request(0x00);
            queue.submit(r).unwrap();
        }
        let (overflow, _rx) = request(0xFF);
        assert!(matches!(
            queue.submit(overflow),
            Err(ParadoxError::SendQueueFull { .. })
        ));
    }

    #[test]
    fn test_fail_all_notifies_responders() {
        let mut queue = SyncQueue::new();
        let (a, mut ra) = request(0xA0);
        let (b, mut rb) = request(0xB0);
        queue.submit(a).unwrap();
        queue.submit(b).unwrap();
        let a = queue.pop_sendable().unwrap();
        queue.mark_in_flight(a).unwrap();

        queue.fail_all(|| ParadoxError::Disconnected);
        assert!(queue.is_idle());
        assert!(matches!(ra.try_recv(), Ok(Err(ParadoxError::Disconnected))));
        assert!(matches!(rb.try_recv(), Ok(Err(ParadoxError::Disconnected))));
    }

    #[test]
    fn test_response_slicing() {
        use crate::constants::MSG_SERIAL_RESPONSE;
        let payload = [0x42u8, 0x01, 0x00];
        let frame = protocol::encode(0x00, MSG_SERIAL_RESPONSE, &payload, None);

        let matched = Response::new(RequestType::PartitionCommand, frame.clone());
        assert!(matched.is_matched());
        assert_eq!(matched.header().unwrap().len(), HEADER_SIZE);
        assert_eq!(matched.payload().unwrap(), &payload);

        // Same bytes against the wrong outstanding type: not my packet
        let unmatched = Response::new(RequestType::ZoneCommand, frame);
        assert!(!unmatched.is_matched());
        assert!(unmatched.header().is_none());
        assert!(unmatched.payload().is_none());
    }
}
