// MIT License - Copyright (c) 2026 Peter Wright

use std::fmt;

/// Why the panel refused the logon sequence.
///
/// Derived from the result byte of the connect response, or from the shape
/// of a later handshake reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogonFailure {
    /// Result byte 0x01 - the configured panel password was rejected
    InvalidPassword,
    /// Result byte 0x02 - another session holds the module
    Busy,
    /// Result byte 0x04 - the module believes a session is already open
    AlreadyConnected,
    /// Any other non-zero result byte, or a malformed handshake reply
    Refused,
}

impl LogonFailure {
    /// Classify the result byte of the connect response payload.
    pub fn from_result_byte(byte: u8) -> Self {
        match byte {
            crate::constants::LOGON_INVALID_PASSWORD => Self::InvalidPassword,
            crate::constants::LOGON_BUSY => Self::Busy,
            crate::constants::LOGON_ALREADY_CONNECTED => Self::AlreadyConnected,
            _ => Self::Refused,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidPassword => "invalid panel password",
            Self::Busy => "panel busy with another session",
            Self::AlreadyConnected => "a session is already connected",
            Self::Refused => "connection refused by panel",
        }
    }
}

impl fmt::Display for LogonFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// All errors that can occur in the paradox-lan-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum ParadoxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection failed: {details}")]
    ConnectionFailed { details: String },

    #[error("Socket timeout")]
    SocketTimeout,

    #[error("Response timeout: request expired after {age_ms}ms")]
    ResponseExpired { age_ms: u64 },

    #[error("Logon failed: {0}")]
    LogonFailed(LogonFailure),

    #[error("Handshake response too short: got {got} bytes, need {need}")]
    ShortHandshakeResponse { got: usize, need: usize },

    #[error("Garbled receive: {details}")]
    GarbledReceive { details: String },

    #[error("Send queue full ({capacity} entries)")]
    SendQueueFull { capacity: usize },

    #[error("Receive queue full ({capacity} entries)")]
    ReceiveQueueFull { capacity: usize },

    #[error("Socket disconnected")]
    Disconnected,

    #[error("Communicator is offline")]
    Offline,

    #[error("Invalid device id: {id} (max: {max})")]
    InvalidDeviceId { id: u32, max: u32 },

    #[error("Channel closed")]
    ChannelClosed,
}

impl ParadoxError {
    /// Whether the error is transient and a reconnect attempt makes sense.
    ///
    /// Logon refusals are not retryable: a wrong password stays wrong, and
    /// hammering a busy module keeps it busy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ParadoxError::Io(_)
                | ParadoxError::ConnectionFailed { .. }
                | ParadoxError::SocketTimeout
                | ParadoxError::ResponseExpired { .. }
                | ParadoxError::GarbledReceive { .. }
                | ParadoxError::Disconnected
                | ParadoxError::ChannelClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, ParadoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logon_failure_classification() {
        assert_eq!(
            LogonFailure::from_result_byte(0x01),
            LogonFailure::InvalidPassword
        );
        assert_eq!(LogonFailure::from_result_byte(0x02), LogonFailure::Busy);
        assert_eq!(
            LogonFailure::from_result_byte(0x04),
            LogonFailure::AlreadyConnected
        );
        assert_eq!(LogonFailure::from_result_byte(0x7F), LogonFailure::Refused);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ParadoxError::SocketTimeout.is_retryable());
        assert!(ParadoxError::Disconnected.is_retryable());
        assert!(ParadoxError::ResponseExpired { age_ms: 2000 }.is_retryable());
        assert!(!ParadoxError::LogonFailed(LogonFailure::InvalidPassword).is_retryable());
        assert!(!ParadoxError::Offline.is_retryable());
    }
}
