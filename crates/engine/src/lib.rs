pub mod command;
mod engine;
pub mod io;
#[cfg(feature = "jack")]
pub mod jack_backend;
pub mod midi;
pub mod scheduler;
pub mod state_info;

use std::sync::Arc;
use std::time::Duration;

use basedrop::Collector;
use teq_transport::{DEFAULT_GLOBAL_TEMPO, Song};

pub use command::{Command, CommandReceiver, CommandSender};
pub use engine::{CvRuntime, Engine, EngineState, MidiRuntime, TrackRuntime};
pub use io::{ExternalTempo, ExternalTransport, MidiWriteError, PortKind, PortRegistry, ProcessIo};
pub use midi::MidiMessage;
pub use scheduler::{Advance, MAX_TICKS_PER_FRAME, Transport, advance_position};
pub use state_info::{StateInfoReceiver, StateInfoSender};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub command_buffer_size: usize,
    pub state_info_buffer_size: usize,
    pub command_timeout: Duration,
    pub max_tracks: usize,
    pub global_tempo: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 1024,
            state_info_buffer_size: 1024,
            command_timeout: Duration::from_millis(1000),
            max_tracks: 256,
            global_tempo: DEFAULT_GLOBAL_TEMPO,
        }
    }
}

/// Control-side ends of the engine's channels.
pub struct EngineHandle {
    pub commands: CommandSender,
    pub state_info: StateInfoReceiver,
    /// Frees consumed commands. Only ever collected off the audio thread.
    pub collector: Collector,
}

/// Creates an engine playing `song` and the handle that controls it. The
/// engine is meant to be moved into a backend's process callback.
pub fn create(song: Arc<Song>, config: &EngineConfig) -> (Engine, EngineHandle) {
    let collector = Collector::new();

    let (commands, command_rx) = command::channel(
        config.command_buffer_size,
        collector.handle(),
        config.command_timeout,
    );
    let (state_info_tx, state_info) = state_info::channel(config.state_info_buffer_size);

    let state = EngineState::new(song, config.max_tracks, config.global_tempo);
    log::debug!(
        "engine created: {} command slots, {} state info slots, {} tracks max",
        config.command_buffer_size,
        config.state_info_buffer_size,
        config.max_tracks
    );

    (
        Engine::new(command_rx, state_info_tx, state),
        EngineHandle {
            commands,
            state_info,
            collector,
        },
    )
}
