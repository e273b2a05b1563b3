use std::fmt;

use teq_transport::{BackendError, PortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Midi,
    Cv,
}

/// The backend had no room left for a MIDI event in this block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiWriteError;

impl fmt::Display for MidiWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("midi port buffer is full")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalTempo {
    pub beats_per_minute: f64,
    pub ticks_per_beat: f64,
}

/// Position of the backend's own transport at the start of a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalTransport {
    pub rolling: bool,
    pub frame: u64,
    pub tempo: Option<ExternalTempo>,
}

/// Everything the process callback needs from the backend for one block.
/// Called on the audio thread only.
pub trait ProcessIo {
    fn sample_rate(&self) -> u32;

    fn clear_midi(&mut self, port: PortId);

    fn write_midi(&mut self, port: PortId, frame: u32, bytes: &[u8]) -> Result<(), MidiWriteError>;

    /// CV output buffer of `port` for the current block.
    fn cv_buffer(&mut self, port: PortId) -> Option<&mut [f32]>;

    fn transport(&self) -> Option<ExternalTransport> {
        None
    }
}

/// Control-side port management.
pub trait PortRegistry {
    fn register_port(&mut self, name: &str, kind: PortKind) -> Result<PortId, BackendError>;

    fn unregister_port(&mut self, port: PortId) -> Result<(), BackendError>;
}
