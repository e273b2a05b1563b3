pub mod config;
pub mod heap;
pub mod session;

pub use config::{ConfigError, TeqConfig};
pub use heap::Heap;
pub use session::{EventSlot, Session};

pub use teq_engine::{Engine, EngineState, PortKind, PortRegistry, ProcessIo};
pub use teq_transport::{
    BackendError, ControlEvent, CvEvent, Event, LoopRange, MidiEvent, Pattern, PortId, Song,
    StateInfo, TeqError, TrackKind, TransportPosition, TransportSource, TransportState,
};
