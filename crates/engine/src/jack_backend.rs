//! JACK backend: MIDI and CV output ports driven by the engine from the JACK
//! process callback, with the JACK transport as the external clock.

use jack::{AudioOut, Client, ClientOptions, MidiOut, Port, ProcessScope, RawMidi};
use teq_transport::{BackendError, PortId};

use crate::io::{
    ExternalTempo, ExternalTransport, MidiWriteError, PortKind, PortRegistry, ProcessIo,
};
use crate::Engine;

/// MIDI events buffered per block before they are written to the ports.
const MIDI_EVENTS_PER_BLOCK: usize = 4096;

enum JackPort {
    Midi(Port<MidiOut>),
    Cv(Port<AudioOut>),
}

enum PortMessage {
    Add(PortId, JackPort),
    Remove(PortId),
}

struct Notifications;

impl jack::NotificationHandler for Notifications {
    unsafe fn shutdown(&mut self, status: jack::ClientStatus, reason: &str) {
        log::warn!("JACK client shutdown: {:?} - {}", status, reason);
    }
}

/// Owns the engine inside the JACK process callback.
struct JackProcessor {
    engine: Engine,
    ports: Vec<Option<JackPort>>,
    port_messages: rtrb::Consumer<PortMessage>,
    released: rtrb::Producer<JackPort>,
    midi_events: Vec<(PortId, u32, [u8; 3])>,
    sample_rate: u32,
}

impl JackProcessor {
    fn apply_port_messages(&mut self) {
        while let Ok(message) = self.port_messages.pop() {
            match message {
                PortMessage::Add(id, port) => {
                    if let Some(slot) = self.ports.get_mut(id.index()) {
                        *slot = Some(port);
                    }
                }
                PortMessage::Remove(id) => {
                    if let Some(port) = self.ports.get_mut(id.index()).and_then(Option::take) {
                        // Unregistered by the control side
                        let _ = self.released.push(port);
                    }
                }
            }
        }
    }
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, client: &Client, ps: &ProcessScope) -> jack::Control {
        self.apply_port_messages();
        self.midi_events.clear();

        let mut io = JackIo {
            client,
            ps,
            ports: &mut self.ports,
            midi_events: &mut self.midi_events,
            sample_rate: self.sample_rate,
        };
        self.engine.process(&mut io, ps.n_frames());

        for (index, slot) in self.ports.iter_mut().enumerate() {
            let Some(JackPort::Midi(port)) = slot else {
                continue;
            };
            // Creating the writer clears the port buffer
            let mut writer = port.writer(ps);
            for (_, time, bytes) in self
                .midi_events
                .iter()
                .filter(|(id, _, _)| id.index() == index)
            {
                let _ = writer.write(&RawMidi {
                    time: *time,
                    bytes,
                });
            }
        }

        jack::Control::Continue
    }
}

struct JackIo<'a> {
    client: &'a Client,
    ps: &'a ProcessScope,
    ports: &'a mut [Option<JackPort>],
    midi_events: &'a mut Vec<(PortId, u32, [u8; 3])>,
    sample_rate: u32,
}

impl ProcessIo for JackIo<'_> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clear_midi(&mut self, port: PortId) {
        self.midi_events.retain(|(id, _, _)| *id != port);
    }

    fn write_midi(&mut self, port: PortId, frame: u32, bytes: &[u8]) -> Result<(), MidiWriteError> {
        let [status, data1, data2] = bytes else {
            return Err(MidiWriteError);
        };
        if self.midi_events.len() >= MIDI_EVENTS_PER_BLOCK {
            return Err(MidiWriteError);
        }
        self.midi_events.push((port, frame, [*status, *data1, *data2]));
        Ok(())
    }

    fn cv_buffer(&mut self, port: PortId) -> Option<&mut [f32]> {
        let ps = self.ps;
        match self.ports.get_mut(port.index())?.as_mut()? {
            JackPort::Cv(port) => Some(port.as_mut_slice(ps)),
            JackPort::Midi(_) => None,
        }
    }

    fn transport(&self) -> Option<ExternalTransport> {
        let status = self.client.transport().query().ok()?;
        let tempo = status.pos.bbt().map(|bbt| ExternalTempo {
            beats_per_minute: bbt.bpm,
            ticks_per_beat: bbt.ticks_per_beat,
        });
        Some(ExternalTransport {
            rolling: matches!(status.state, jack::TransportState::Rolling),
            frame: status.pos.frame() as u64,
            tempo,
        })
    }
}

/// A JACK client whose ports are managed by the control side and whose process
/// callback runs the engine once activated.
pub struct JackBackend {
    client: Option<Client>,
    active: Option<jack::AsyncClient<Notifications, JackProcessor>>,
    port_messages: rtrb::Producer<PortMessage>,
    pending_setup: Option<(rtrb::Consumer<PortMessage>, rtrb::Producer<JackPort>)>,
    released: rtrb::Consumer<JackPort>,
    free_ids: Vec<u32>,
    next_id: u32,
    max_ports: usize,
}

impl JackBackend {
    /// Opens a client without starting a JACK server. At most `max_ports`
    /// ports can be registered at a time.
    pub fn open(name: &str, max_ports: usize) -> Result<Self, BackendError> {
        let (client, status) = Client::new(name, ClientOptions::NO_START_SERVER)
            .map_err(|e| BackendError::new(format!("failed to open JACK client '{name}': {e}")))?;
        log::info!(
            "opened JACK client '{}' ({:?}) at {} Hz",
            client.name(),
            status,
            client.sample_rate()
        );

        let (port_tx, port_rx) = rtrb::RingBuffer::new(max_ports.max(1) * 2);
        let (released_tx, released_rx) = rtrb::RingBuffer::new(max_ports.max(1));

        Ok(Self {
            client: Some(client),
            active: None,
            port_messages: port_tx,
            pending_setup: Some((port_rx, released_tx)),
            released: released_rx,
            free_ids: Vec::new(),
            next_id: 0,
            max_ports,
        })
    }

    fn client(&self) -> Option<&Client> {
        match &self.active {
            Some(active) => Some(active.as_client()),
            None => self.client.as_ref(),
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.client().map(|client| client.sample_rate() as u32)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Moves `engine` into the process callback and starts processing.
    pub fn activate(&mut self, engine: Engine) -> Result<(), BackendError> {
        let (Some(client), Some((port_messages, released))) =
            (self.client.take(), self.pending_setup.take())
        else {
            return Err(BackendError::new("JACK client is already active"));
        };

        let processor = JackProcessor {
            engine,
            ports: (0..self.max_ports).map(|_| None).collect(),
            port_messages,
            released,
            midi_events: Vec::with_capacity(MIDI_EVENTS_PER_BLOCK),
            sample_rate: client.sample_rate() as u32,
        };
        let active = client
            .activate_async(Notifications, processor)
            .map_err(|e| BackendError::new(format!("failed to activate JACK client: {e}")))?;
        log::info!("JACK client activated");
        self.active = Some(active);
        Ok(())
    }

    /// Unregisters ports the process callback has let go of.
    fn release_ports(&mut self) {
        while let Ok(port) = self.released.pop() {
            let Some(client) = self.client() else {
                return;
            };
            let result = match port {
                JackPort::Midi(port) => client.unregister_port(port),
                JackPort::Cv(port) => client.unregister_port(port),
            };
            if let Err(e) = result {
                log::warn!("failed to unregister JACK port: {e}");
            }
        }
    }

    fn allocate_id(&mut self) -> Option<PortId> {
        if let Some(id) = self.free_ids.pop() {
            return Some(PortId(id));
        }
        if (self.next_id as usize) < self.max_ports {
            self.next_id += 1;
            return Some(PortId(self.next_id - 1));
        }
        None
    }
}

impl PortRegistry for JackBackend {
    fn register_port(&mut self, name: &str, kind: PortKind) -> Result<PortId, BackendError> {
        self.release_ports();

        let id = self
            .allocate_id()
            .ok_or_else(|| BackendError::new(format!("no free port slot for '{name}'")))?;
        let client = self
            .client()
            .ok_or_else(|| BackendError::new("JACK client is closed"))?;

        let registered = match kind {
            PortKind::Midi => client.register_port(name, MidiOut::default()).map(JackPort::Midi),
            PortKind::Cv => client.register_port(name, AudioOut::default()).map(JackPort::Cv),
        };
        let port = match registered {
            Ok(port) => port,
            Err(e) => {
                self.free_ids.push(id.0);
                return Err(BackendError::new(format!(
                    "failed to register JACK port '{name}': {e}"
                )));
            }
        };

        if let Err(rtrb::PushError::Full(PortMessage::Add(_, port))) =
            self.port_messages.push(PortMessage::Add(id, port))
        {
            if let Some(client) = self.client() {
                let _ = match port {
                    JackPort::Midi(port) => client.unregister_port(port),
                    JackPort::Cv(port) => client.unregister_port(port),
                };
            }
            self.free_ids.push(id.0);
            return Err(BackendError::new("JACK port queue is full"));
        }

        log::debug!("registered JACK {kind:?} port '{name}' as {id:?}");
        Ok(id)
    }

    fn unregister_port(&mut self, port: PortId) -> Result<(), BackendError> {
        self.port_messages
            .push(PortMessage::Remove(port))
            .map_err(|_| BackendError::new("JACK port queue is full"))?;
        self.free_ids.push(port.0);
        self.release_ports();
        log::debug!("released JACK port {port:?}");
        Ok(())
    }
}
