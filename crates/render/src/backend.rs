use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use teq_engine::{ExternalTransport, MidiWriteError, PortKind, PortRegistry, ProcessIo};
use teq_transport::{BackendError, PortId};

/// One MIDI message written during a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiRecord {
    pub port: PortId,
    pub frame: u32,
    pub bytes: [u8; 3],
}

/// Output of one processed block.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBlock {
    /// Number of blocks processed before this one.
    pub index: u64,
    /// Frame time at the start of the block.
    pub frame_time: u64,
    pub nframes: u32,
    pub midi: Vec<MidiRecord>,
    pub cv: Vec<(PortId, Vec<f32>)>,
}

impl RenderedBlock {
    pub fn midi_for(&self, port: PortId) -> impl Iterator<Item = &MidiRecord> + '_ {
        self.midi.iter().filter(move |record| record.port == port)
    }

    pub fn cv_for(&self, port: PortId) -> Option<&[f32]> {
        self.cv
            .iter()
            .find(|(id, _)| *id == port)
            .map(|(_, samples)| samples.as_slice())
    }
}

/// Concatenated CV output of `port` over `blocks`.
pub fn cv_samples(blocks: &[RenderedBlock], port: PortId) -> Vec<f32> {
    blocks
        .iter()
        .filter_map(|block| block.cv_for(port))
        .flatten()
        .copied()
        .collect()
}

#[derive(Debug)]
struct OfflinePort {
    name: String,
    kind: PortKind,
    midi: Vec<MidiRecord>,
    cv: Vec<f32>,
}

#[derive(Debug, Default)]
struct PortTable {
    ports: Vec<Option<OfflinePort>>,
    max_ports: Option<usize>,
    midi_capacity: Option<usize>,
    external: Option<ExternalTransport>,
}

impl PortTable {
    fn registered(&self) -> usize {
        self.ports.iter().flatten().count()
    }
}

/// In-memory backend. Clones share the same port table, so one clone can be
/// handed to the session as its port registry and another to the thread that
/// runs the engine.
#[derive(Debug, Clone)]
pub struct OfflineBackend {
    table: Arc<Mutex<PortTable>>,
    sample_rate: u32,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            table: Arc::new(Mutex::new(PortTable::default())),
            sample_rate,
        }
    }

    /// Fails registrations once `max_ports` ports exist.
    pub fn with_max_ports(self, max_ports: usize) -> Self {
        self.lock().max_ports = Some(max_ports);
        self
    }

    /// Limits the number of MIDI messages per port and block.
    pub fn set_midi_capacity(&self, capacity: Option<usize>) {
        self.lock().midi_capacity = capacity;
    }

    /// Transport reported to the engine as the external clock.
    pub fn set_external_transport(&self, transport: Option<ExternalTransport>) {
        self.lock().external = transport;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn port_count(&self) -> usize {
        self.lock().registered()
    }

    pub fn port_name(&self, port: PortId) -> Option<String> {
        self.lock()
            .ports
            .get(port.index())?
            .as_ref()
            .map(|p| p.name.clone())
    }

    pub fn port_kind(&self, port: PortId) -> Option<PortKind> {
        self.lock().ports.get(port.index())?.as_ref().map(|p| p.kind)
    }

    fn lock(&self) -> MutexGuard<'_, PortTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Prepares the buffers of one block. The port table stays locked until
    /// the block is finished.
    pub fn block(&self, nframes: u32) -> OfflineBlock<'_> {
        let mut table = self.lock();
        for port in table.ports.iter_mut().flatten() {
            port.midi.clear();
            port.cv.clear();
            port.cv.resize(nframes as usize, 0.0);
        }
        OfflineBlock {
            table,
            sample_rate: self.sample_rate,
            nframes,
        }
    }
}

impl PortRegistry for OfflineBackend {
    fn register_port(&mut self, name: &str, kind: PortKind) -> Result<PortId, BackendError> {
        let mut table = self.lock();
        if table.max_ports.is_some_and(|max| table.registered() >= max) {
            return Err(BackendError::new(format!(
                "cannot register port '{name}': port limit reached"
            )));
        }
        if table.ports.iter().flatten().any(|port| port.name == name) {
            return Err(BackendError::new(format!("port '{name}' already exists")));
        }

        let port = OfflinePort {
            name: name.to_string(),
            kind,
            midi: Vec::new(),
            cv: Vec::new(),
        };
        let index = match table.ports.iter().position(Option::is_none) {
            Some(index) => {
                table.ports[index] = Some(port);
                index
            }
            None => {
                table.ports.push(Some(port));
                table.ports.len() - 1
            }
        };
        log::debug!("registered offline {kind:?} port '{name}' as {index}");
        Ok(PortId(index as u32))
    }

    fn unregister_port(&mut self, port: PortId) -> Result<(), BackendError> {
        let mut table = self.lock();
        match table.ports.get_mut(port.index()).and_then(Option::take) {
            Some(removed) => {
                log::debug!("unregistered offline port '{}'", removed.name);
                Ok(())
            }
            None => Err(BackendError::new(format!("unknown port {port:?}"))),
        }
    }
}

/// Buffers of one block, handed to [`teq_engine::Engine::process`].
pub struct OfflineBlock<'a> {
    table: MutexGuard<'a, PortTable>,
    sample_rate: u32,
    nframes: u32,
}

impl OfflineBlock<'_> {
    /// Collects what the engine wrote into this block.
    pub fn finish(self, index: u64, frame_time: u64) -> RenderedBlock {
        let mut midi = Vec::new();
        let mut cv = Vec::new();
        for (id, port) in self.table.ports.iter().enumerate() {
            let Some(port) = port else {
                continue;
            };
            match port.kind {
                PortKind::Midi => midi.extend(port.midi.iter().copied()),
                PortKind::Cv => cv.push((PortId(id as u32), port.cv.clone())),
            }
        }
        // Stable, so events of one port stay in the order they were written
        midi.sort_by_key(|record| record.frame);
        RenderedBlock {
            index,
            frame_time,
            nframes: self.nframes,
            midi,
            cv,
        }
    }
}

impl ProcessIo for OfflineBlock<'_> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clear_midi(&mut self, port: PortId) {
        if let Some(Some(port)) = self.table.ports.get_mut(port.index()) {
            port.midi.clear();
        }
    }

    fn write_midi(&mut self, port: PortId, frame: u32, bytes: &[u8]) -> Result<(), MidiWriteError> {
        let capacity = self.table.midi_capacity;
        let Some(Some(target)) = self.table.ports.get_mut(port.index()) else {
            return Err(MidiWriteError);
        };
        let ([status, data1, data2], PortKind::Midi) = (bytes, target.kind) else {
            return Err(MidiWriteError);
        };
        if capacity.is_some_and(|capacity| target.midi.len() >= capacity) {
            return Err(MidiWriteError);
        }
        target.midi.push(MidiRecord {
            port,
            frame,
            bytes: [*status, *data1, *data2],
        });
        Ok(())
    }

    fn cv_buffer(&mut self, port: PortId) -> Option<&mut [f32]> {
        match self.table.ports.get_mut(port.index())? {
            Some(port) if port.kind == PortKind::Cv => Some(port.cv.as_mut_slice()),
            _ => None,
        }
    }

    fn transport(&self) -> Option<ExternalTransport> {
        self.table.external
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_reuses_free_slots() {
        let mut backend = OfflineBackend::new(48_000);
        let a = backend.register_port("a", PortKind::Midi).unwrap();
        let b = backend.register_port("b", PortKind::Cv).unwrap();
        assert_eq!((a, b), (PortId(0), PortId(1)));

        backend.unregister_port(a).unwrap();
        assert_eq!(backend.port_count(), 1);
        let c = backend.register_port("c", PortKind::Midi).unwrap();
        assert_eq!(c, PortId(0));
        assert_eq!(backend.port_name(c).as_deref(), Some("c"));
        assert!(backend.unregister_port(PortId(9)).is_err());
    }

    #[test]
    fn test_port_limit() {
        let mut backend = OfflineBackend::new(48_000).with_max_ports(1);
        backend.register_port("a", PortKind::Midi).unwrap();
        assert!(backend.register_port("b", PortKind::Midi).is_err());
    }

    #[test]
    fn test_block_collects_midi_and_cv() {
        let mut backend = OfflineBackend::new(48_000);
        let midi = backend.register_port("midi", PortKind::Midi).unwrap();
        let cv = backend.register_port("cv", PortKind::Cv).unwrap();

        let mut block = backend.block(4);
        block.write_midi(midi, 2, &[0x90, 60, 100]).unwrap();
        block.write_midi(midi, 1, &[0x80, 59, 0]).unwrap();
        assert!(block.write_midi(cv, 0, &[0x90, 1, 1]).is_err());
        block.cv_buffer(cv).unwrap()[3] = 0.5;
        assert!(block.cv_buffer(midi).is_none());

        let rendered = block.finish(0, 0);
        let frames: Vec<u32> = rendered.midi_for(midi).map(|r| r.frame).collect();
        assert_eq!(frames, vec![1, 2]);
        assert_eq!(rendered.cv_for(cv), Some(&[0.0, 0.0, 0.0, 0.5][..]));
    }

    #[test]
    fn test_midi_capacity() {
        let mut backend = OfflineBackend::new(48_000);
        let midi = backend.register_port("midi", PortKind::Midi).unwrap();
        backend.set_midi_capacity(Some(1));
        let mut block = backend.block(4);
        assert!(block.write_midi(midi, 0, &[0x90, 60, 100]).is_ok());
        assert_eq!(block.write_midi(midi, 1, &[0x80, 60, 0]), Err(MidiWriteError));
    }
}
