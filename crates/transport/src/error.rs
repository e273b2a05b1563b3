use std::fmt;
use std::time::Duration;

use crate::{TrackKind, TransportPosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Track,
    Pattern,
    Tick,
    Column,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexKind::Track => "Track",
            IndexKind::Pattern => "Pattern",
            IndexKind::Tick => "Tick",
            IndexKind::Column => "Column",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Command,
    StateInfo,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Command => f.write_str("command"),
            ChannelKind::StateInfo => f.write_str("state info"),
        }
    }
}

/// Failure reported by an audio backend while opening a client or
/// registering/unregistering a port.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TeqError {
    #[error("{kind} index out of bounds: {index}. Valid bound: {bound}")]
    IndexOutOfRange {
        kind: IndexKind,
        index: usize,
        bound: usize,
    },

    #[error("Track name already in use: '{0}'")]
    NameConflict(String),

    #[error("The {0} channel is full")]
    ChannelFull(ChannelKind),

    #[error("No acknowledgment from the process callback within {0:?}")]
    CommandTimeout(Duration),

    #[error("Backend resource failure: {0}")]
    BackendResourceFailure(#[from] BackendError),

    #[error("No state info available")]
    NoStateAvailable,

    #[error("Invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: f64 },

    #[error("Invalid loop range: start {start:?} is after end {end:?}")]
    InvalidLoopRange {
        start: TransportPosition,
        end: TransportPosition,
    },

    #[error("Track {track} is a {found:?} track, expected {expected:?}")]
    TrackKindMismatch {
        track: usize,
        expected: TrackKind,
        found: TrackKind,
    },

    #[error("Pattern does not match the song's tracks: {0}")]
    PatternMismatch(String),

    #[error("Too many tracks: the engine supports at most {max}")]
    TooManyTracks { max: usize },
}

impl TeqError {
    pub fn out_of_range(kind: IndexKind, index: usize, bound: usize) -> Self {
        TeqError::IndexOutOfRange { kind, index, bound }
    }
}
