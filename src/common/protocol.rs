//! # Protocol Definitions
//!
//! Shared constants, enums, and error types for the difframe node protocol.
//!
//! The protocol runs over plain TCP with a UDP side channel for discovery.
//! All exchanges are strictly alternating request/response pairs between a
//! coordinator ("server") and worker nodes ("clients"), so the framing in
//! [`crate::common::wire`] never has to disambiguate interleaved messages.

use thiserror::Error;

/// Default TCP port for the coordinator's dispatch listener.
pub const DEFAULT_PORT: u16 = 11000;

/// UDP port the coordinator listens on for discovery probes.
pub const DISCOVERY_PORT: u16 = 11500;

/// TCP port for on-demand frame downloads.
pub const DOWNLOAD_PORT: u16 = 11501;

/// Broadcast payload a worker sends when looking for a coordinator.
pub const DISCOVERY_PROBE: &str = "Difframe Node:Client";

/// Unicast payload the coordinator answers discovery probes with.
pub const DISCOVERY_REPLY: &str = "Difframe Node:Server";

/// How long a worker waits for a discovery reply before re-broadcasting.
pub const DISCOVERY_TIMEOUT_SECS: u64 = 2;

/// Maximum handshake attempts before a connection is abandoned.
pub const HANDSHAKE_ATTEMPTS: u32 = 10;

/// Maximum coordinator connection attempts before a worker gives up.
pub const CONNECT_ATTEMPTS: u32 = 10;

/// Maximum frame indices dispatched to a worker in one range.
pub const DISPATCH_RANGE_LIMIT: usize = 10;

/// Hard cap on flagged blocks extracted into a single result upload.
pub const WIRE_BLOCK_LIMIT: usize = 300;

/// Preferred flagged-block extraction size per upload.
pub const WIRE_BLOCK_PREFERRED: usize = 250;

/// Maximum integers carried in a single collection chunk.
pub const CHUNK_INT_LIMIT: usize = 60;

/// Upper bound on a serialized chunk frame (count word plus payload).
pub const CHUNK_BUFFER_SIZE: usize = 1200;

/// Which side of the protocol a node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Coordinator,
    Worker,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Coordinator => "coordinator",
            NodeRole::Worker => "worker",
        }
    }
}

/// Coordinator verdict closing a handshake round.
///
/// The wire strings are fixed; anything else a peer sends is a
/// [`ProtocolError::UnknownReply`] rather than an implicit failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeReply {
    Ok,
    Fail,
}

impl HandshakeReply {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeReply::Ok => "OK",
            HandshakeReply::Fail => "FAIL",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        match raw {
            "OK" => Ok(HandshakeReply::Ok),
            "FAIL" => Ok(HandshakeReply::Fail),
            other => Err(ProtocolError::UnknownReply {
                reply: other.to_string(),
            }),
        }
    }
}

/// Errors raised by protocol logic, distinct from transport I/O failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("peer echoed {got} but {sent} was sent")]
    EchoMismatch { sent: String, got: String },

    #[error("handshake failed after {attempts} attempts")]
    HandshakeExhausted { attempts: u32 },

    #[error("unknown handshake reply: {reply:?}")]
    UnknownReply { reply: String },

    #[error("chunk declares {count} integers, limit is {limit}")]
    OversizedChunk { count: usize, limit: usize },

    #[error("transfer of {size} bytes exceeds the {limit} byte limit")]
    OversizedTransfer { size: usize, limit: usize },

    #[error("flagged block payload of {len} integers is not triple-aligned")]
    TripleMisaligned { len: usize },
}

/// Bounded retry schedule for connection and handshake loops.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_ms,
        }
    }

    /// Policy for handshake rounds: bounded attempts, no delay between them.
    pub fn handshake() -> Self {
        Self::new(HANDSHAKE_ATTEMPTS, 0)
    }

    /// Policy for a worker's top-level connect loop: bounded attempts with
    /// a base delay, jittered by the caller, between them.
    pub fn connection() -> Self {
        Self::new(CONNECT_ATTEMPTS, 1000)
    }

    /// Iterator over attempt numbers, starting at 1.
    pub fn attempts(&self) -> impl Iterator<Item = u32> {
        1..=self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_reply_round_trip() {
        assert_eq!(HandshakeReply::parse("OK").unwrap(), HandshakeReply::Ok);
        assert_eq!(HandshakeReply::parse("FAIL").unwrap(), HandshakeReply::Fail);
        assert_eq!(HandshakeReply::Ok.as_str(), "OK");
        assert_eq!(HandshakeReply::Fail.as_str(), "FAIL");
    }

    #[test]
    fn test_handshake_reply_rejects_unknown() {
        let err = HandshakeReply::parse("MAYBE").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownReply { .. }));
    }

    #[test]
    fn test_retry_policy_attempt_count() {
        let policy = RetryPolicy::handshake();
        assert_eq!(policy.attempts().count(), HANDSHAKE_ATTEMPTS as usize);
        assert_eq!(policy.attempts().next(), Some(1));
        assert_eq!(policy.attempts().last(), Some(HANDSHAKE_ATTEMPTS));
    }
}
