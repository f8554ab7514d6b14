use crate::protocol::ErrorKind;
use thiserror::Error;

/// Faults a room operation can surface to a caller. Commands that are merely
/// dropped (stale senders, coalesced playback commands) never appear here.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("identity could not be resolved")]
    Unauthorized,
    /// Internal sequencing invariant violated; fatal to the affected room only.
    #[error("chat sequencer fault: {0}")]
    SequencerFault(String),
}

impl RoomError {
    /// Wire-level error kind delivered to the originating connection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoomError::RoomNotFound => ErrorKind::NotFound,
            RoomError::RoomFull => ErrorKind::Full,
            RoomError::Unauthorized => ErrorKind::Unauthorized,
            RoomError::SequencerFault(_) => ErrorKind::RoomTerminated,
        }
    }
}
