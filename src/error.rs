use crate::types::Rank;

pub type Result<T> = std::result::Result<T, OverlayError>;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("{algorithm} declined: {reason}")]
    TryNext {
        algorithm: &'static str,
        reason: String,
    },

    #[error("{operation} is not implemented by {algorithm}")]
    NotImplemented {
        operation: &'static str,
        algorithm: &'static str,
    },

    #[error("out of resources: {0}")]
    OutOfResource(String),

    #[error("protocol violation in {operation}: {reason}")]
    ProtocolViolation {
        operation: &'static str,
        reason: String,
    },

    #[error("distance {distance} already received (seq {seq})")]
    DistanceAlreadyReceived { distance: u32, seq: u64 },

    #[error("rank {rank} is not a participant of this collective")]
    NotParticipant { rank: Rank },

    #[error("invalid rank {rank}: group size is {group_size}")]
    InvalidRank { rank: Rank, group_size: u32 },

    #[error("group must have at least one member")]
    EmptyGroup,

    #[error("peer {rank} unreachable: {reason}")]
    PeerUnreachable { rank: Rank, reason: String },

    #[error("peer {rank} lost")]
    PeerLost { rank: Rank },

    #[error("lifeline {rank} lost")]
    LifelineLost { rank: Rank },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("message encode failed: {0}")]
    EncodeFailed(String),

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("overlay group shut down")]
    Shutdown,
}

impl OverlayError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn violation(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether the dispatcher should fall through to the next algorithm.
    pub fn is_fallthrough(&self) -> bool {
        matches!(self, Self::TryNext { .. } | Self::NotImplemented { .. })
    }
}
