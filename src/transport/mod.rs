// MIT License - Copyright (c) 2026 Peter Wright

//! Socket ownership and the serialized request/response path.
//!
//! [`direct::DirectTcpTransport`] owns the socket and performs timed byte
//! I/O; [`communicator::Communicator`] layers the [`crate::queue::SyncQueue`]
//! drain loop and session encryption on top, so that all traffic for one
//! panel flows through a single I/O task.

pub mod communicator;
pub mod direct;

pub use communicator::Communicator;
pub use direct::DirectTcpTransport;
