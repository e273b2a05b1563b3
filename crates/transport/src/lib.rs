mod error;
mod event;
mod pattern;
mod sequence;
mod song;
mod track;

pub use error::{BackendError, ChannelKind, IndexKind, TeqError};
pub use event::{
    ControlEvent, ControlEventKind, CvEvent, CvEventKind, Event, MIDI_DATA_MAX, MidiEvent,
    MAX_TICK_RATE, MidiEventKind, PITCH_BEND_MAX, validate_tempo,
};
pub use pattern::{Pattern, PatternList};
pub use sequence::{EventGrid, MAX_COLUMNS, Sequence};
pub use song::Song;
pub use track::{MidiTrackSettings, Track, TrackKind, TrackList, TrackSettings};

/// Tempo used when nothing else sets one, in ticks per second.
pub const DEFAULT_GLOBAL_TEMPO: f32 = 8.0;

/// Opaque handle of a backend output port, handed out by the backend when the
/// port is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

impl PortId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A playable slot in the song. Ordered by pattern, then tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportPosition {
    pub pattern: usize,
    pub tick: usize,
}

impl TransportPosition {
    pub fn new(pattern: usize, tick: usize) -> Self {
        Self { pattern, tick }
    }
}

/// Region playback wraps within. `end` is exclusive: reaching it jumps back to
/// `start`. A range with `start == end` is a zero-length loop which keeps the
/// transport on `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopRange {
    pub start: TransportPosition,
    pub end: TransportPosition,
    pub enabled: bool,
}

impl LoopRange {
    pub fn new(start: TransportPosition, end: TransportPosition, enabled: bool) -> Self {
        Self {
            start,
            end,
            enabled,
        }
    }

    pub fn is_zero_length(&self) -> bool {
        self.start == self.end
    }

    pub fn validate(&self) -> Result<(), TeqError> {
        if self.enabled && self.start > self.end {
            return Err(TeqError::InvalidLoopRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }
}

/// Where the transport takes its clock from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportSource {
    /// Tick timing comes from the engine's own tempo.
    #[default]
    Internal,
    /// Position and rolling state follow the backend's transport.
    External,
}

/// Transport snapshot published by the process callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateInfo {
    pub transport_state: TransportState,
    pub transport_source: TransportSource,
    pub transport_position: TransportPosition,
    pub loop_range: LoopRange,
    pub global_tempo: f32,
    pub relative_tempo: f32,
    /// Frames processed since the engine started, including the offset within
    /// the current block for tick boundaries.
    pub frame_time: u64,
    pub is_tick_boundary: bool,
}

impl Default for StateInfo {
    fn default() -> Self {
        Self {
            transport_state: TransportState::Stopped,
            transport_source: TransportSource::Internal,
            transport_position: TransportPosition::default(),
            loop_range: LoopRange::default(),
            global_tempo: DEFAULT_GLOBAL_TEMPO,
            relative_tempo: 1.0,
            frame_time: 0,
            is_tick_boundary: false,
        }
    }
}
