//! Error types for the playback core.
//!
//! Decoder, playlist, controller and transport failures each get their own
//! `thiserror` enum so callers can branch on the expected cases
//! (`PlaylistError::Empty`, `TransportError::Cancelled`) without string matching.
//! Collaborator traits keep using `anyhow::Result`.

use thiserror::Error;

/// Errors produced while reading a DCA frame container.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The metadata length prefix was zero or negative
    #[error("invalid metadata block")]
    InvalidMetadata,

    /// The metadata block may only be read once, before any frame
    #[error("metadata can only be read before the first frame")]
    NotFirstFrame,

    /// A frame length prefix was negative (corrupted stream)
    #[error("negative frame size: {0}")]
    NegativeFrameSize(i16),

    /// The decoder was closed
    #[error("decoder is closed")]
    DecoderClosed,

    /// The stream ended before the metadata header
    #[error("end of stream")]
    EndOfStream,

    /// The metadata block is not valid JSON
    #[error("malformed metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaylistError {
    /// 1-based position outside `1..=len`
    #[error("invalid position {position} (playlist has {len} tracks)")]
    InvalidPosition { position: usize, len: usize },

    /// Sentinel: nothing left to play
    #[error("playlist is empty")]
    Empty,
}

/// Errors surfaced by the playback controller and the guild player.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("already playing")]
    AlreadyPlaying,

    #[error("not playing")]
    NotPlaying,

    #[error("not paused")]
    NotPaused,

    /// `run` was called while another loop owns the event queue
    #[error("event loop already running")]
    AlreadyRunning,

    /// The player's event loop is gone
    #[error("player is closed")]
    Closed,

    /// The parent shutdown token was cancelled
    #[error("player cancelled")]
    Cancelled,

    #[error("state storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum TransportError {
    /// The send was interrupted by Stop/Skip; expected, not a failure
    #[error("operation was cancelled")]
    Cancelled,

    #[error("not connected to a voice channel")]
    NotConnected,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;
