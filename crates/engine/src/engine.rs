use std::sync::Arc;

use teq_transport::{
    ControlEventKind, CvEventKind, LoopRange, MAX_COLUMNS, MidiEvent, MidiEventKind,
    MidiTrackSettings, PortId, Sequence, Song, TrackKind, TransportPosition, TransportSource,
    TransportState,
};

use crate::command::CommandReceiver;
use crate::io::ProcessIo;
use crate::midi::MidiMessage;
use crate::scheduler::{Advance, MAX_TICKS_PER_FRAME, TICK_EPSILON, Transport, advance_position};
use crate::state_info::StateInfoSender;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiRuntime {
    /// Note currently sounding in each column.
    pub last_notes: [Option<u8>; MAX_COLUMNS],
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CvRuntime {
    /// Value written to the output on every frame.
    pub value: f32,
    /// Second value of an interval event, applied on the following tick.
    pub pending: Option<f32>,
}

/// Per-track playback state that lives next to the song on the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackRuntime {
    Midi(MidiRuntime),
    Cv(CvRuntime),
    Control,
}

impl TrackRuntime {
    pub fn for_kind(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Midi => TrackRuntime::Midi(MidiRuntime {
                last_notes: [None; MAX_COLUMNS],
            }),
            TrackKind::Cv => TrackRuntime::Cv(CvRuntime::default()),
            TrackKind::Control => TrackRuntime::Control,
        }
    }
}

/// Everything the process callback reads and the queued commands edit.
pub struct EngineState {
    song: Arc<Song>,
    tracks: Vec<TrackRuntime>,
    max_tracks: usize,
    transport: Transport,
}

impl EngineState {
    /// `max_tracks` runtime slots are reserved up front, so track edits never
    /// allocate on the audio thread.
    pub fn new(song: Arc<Song>, max_tracks: usize, global_tempo: f32) -> Self {
        let max_tracks = max_tracks.max(song.tracks.len());
        let mut tracks = Vec::with_capacity(max_tracks);
        tracks.extend(song.tracks.iter().map(|track| TrackRuntime::for_kind(track.kind())));
        Self {
            song,
            tracks,
            max_tracks,
            transport: Transport::new(global_tempo),
        }
    }

    pub fn song(&self) -> &Arc<Song> {
        &self.song
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn track_runtime(&self, index: usize) -> Option<&TrackRuntime> {
        self.tracks.get(index)
    }

    pub fn track_runtimes(&self) -> &[TrackRuntime] {
        &self.tracks
    }

    /// Swaps in a new song version. The previous version is only released
    /// here, the heap keeps it alive until the next collection.
    pub fn set_song(&mut self, song: Arc<Song>) {
        self.song = song;
    }

    pub fn insert_track_runtime(&mut self, index: usize, kind: TrackKind) {
        if self.tracks.len() < self.max_tracks && index <= self.tracks.len() {
            self.tracks.insert(index, TrackRuntime::for_kind(kind));
        }
    }

    pub fn remove_track_runtime(&mut self, index: usize) {
        if index < self.tracks.len() {
            self.tracks.remove(index);
        }
    }

    pub fn move_track_runtime(&mut self, from: usize, to: usize) {
        if from < self.tracks.len() && to < self.tracks.len() {
            let runtime = self.tracks.remove(from);
            self.tracks.insert(to, runtime);
        }
    }

    pub fn set_loop_range(&mut self, loop_range: LoopRange) {
        self.transport.loop_range = loop_range;
    }

    pub fn set_global_tempo(&mut self, tempo: f32) {
        self.transport.global_tempo = tempo;
    }

    pub fn set_relative_tempo(&mut self, tempo: f32) {
        self.transport.relative_tempo = tempo;
    }

    pub fn set_transport_state(&mut self, state: TransportState) {
        self.transport.state = state;
    }

    /// Moves the transport; the tick at `position` is due immediately.
    pub fn set_transport_position(&mut self, position: TransportPosition) {
        self.transport.position = position;
        self.transport.time_until_next_tick = 0.0;
    }

    pub fn set_transport_source(&mut self, source: TransportSource) {
        self.transport.source = source;
    }

    pub fn set_notes_off_on_loop(&mut self, enabled: bool) {
        self.transport.notes_off_on_loop = enabled;
    }

    pub fn set_notes_off_on_stop(&mut self, enabled: bool) {
        self.transport.notes_off_on_stop = enabled;
    }
}

/// The audio-thread half of the sequencer. Owned by the backend's process
/// callback.
pub struct Engine {
    commands: CommandReceiver,
    state_info: StateInfoSender,
    state: EngineState,
}

impl Engine {
    pub fn new(commands: CommandReceiver, state_info: StateInfoSender, state: EngineState) -> Self {
        Self {
            commands,
            state_info,
            state,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn has_pending_commands(&self) -> bool {
        self.commands.has_pending() || self.commands.ack_pending()
    }

    /// Runs one block of `nframes` frames. Never blocks, allocates or frees.
    pub fn process<I: ProcessIo + ?Sized>(&mut self, io: &mut I, nframes: u32) -> i32 {
        self.commands.drain(&mut self.state);

        let EngineState {
            song,
            tracks,
            transport,
            ..
        } = &mut self.state;
        let song: &Song = song;
        let state_info = &mut self.state_info;

        for track in song.tracks.iter() {
            if let (TrackKind::Midi, Some(port)) = (track.kind(), track.port) {
                io.clear_midi(port);
            }
        }

        let sample_rate = io.sample_rate().max(1);
        if transport.source == TransportSource::External {
            if let Some(external) = io.transport() {
                transport.follow(song, &external, sample_rate);
            }
        }

        if transport.last_state.is_playing()
            && !transport.state.is_playing()
            && transport.notes_off_on_stop
        {
            all_notes_off(song, tracks, io, 0);
        }

        let period = 1.0 / sample_rate as f64;
        for frame in 0..nframes {
            let mut dispatched = 0;
            while transport.state.is_playing() && transport.time_until_next_tick <= TICK_EPSILON {
                if dispatched == MAX_TICKS_PER_FRAME {
                    // Next tick is due on the next frame
                    transport.time_until_next_tick = period;
                    break;
                }
                dispatched += 1;

                if !song.contains(transport.position) {
                    stop(song, tracks, transport, io, frame);
                    state_info.publish(transport.state_info(frame, true));
                    break;
                }

                dispatch_tick(song, tracks, transport, io, frame);
                let advance = advance_position(song, transport.position, &transport.loop_range);
                transport.time_until_next_tick += transport.tick_duration();

                match advance {
                    Advance::Continue(position) => transport.position = position,
                    Advance::Looped(position) => {
                        transport.position = position;
                        if transport.notes_off_on_loop {
                            all_notes_off(song, tracks, io, frame);
                        }
                    }
                    Advance::End(position) => {
                        transport.position = position;
                        stop(song, tracks, transport, io, frame);
                    }
                }
                state_info.publish(transport.state_info(frame, true));
            }

            write_cv(song, tracks, io, frame);

            if transport.state.is_playing() {
                transport.time_until_next_tick -= period;
            }
        }

        state_info.publish(transport.state_info(nframes, false));
        transport.last_state = transport.state;
        transport.frame_time += nframes as u64;
        0
    }
}

fn write_message<I: ProcessIo + ?Sized>(io: &mut I, port: PortId, frame: u32, message: MidiMessage) {
    // A full port buffer drops the event
    let _ = io.write_midi(port, frame, &message.to_bytes());
}

fn stop<I: ProcessIo + ?Sized>(
    song: &Song,
    tracks: &mut [TrackRuntime],
    transport: &mut Transport,
    io: &mut I,
    frame: u32,
) {
    transport.state = TransportState::Stopped;
    transport.time_until_next_tick = 0.0;
    if transport.notes_off_on_stop {
        all_notes_off(song, tracks, io, frame);
    }
    // Already handled, don't repeat it at the start of the next block
    transport.last_state = TransportState::Stopped;
}

fn all_notes_off<I: ProcessIo + ?Sized>(
    song: &Song,
    tracks: &mut [TrackRuntime],
    io: &mut I,
    frame: u32,
) {
    for (track, runtime) in song.tracks.iter().zip(tracks.iter_mut()) {
        let (Some(port), Some(settings), TrackRuntime::Midi(midi)) =
            (track.port, track.midi_settings(), runtime)
        else {
            continue;
        };
        write_message(io, port, frame, MidiMessage::all_notes_off(settings.channel));
        midi.last_notes = [None; MAX_COLUMNS];
    }
}

fn dispatch_tick<I: ProcessIo + ?Sized>(
    song: &Song,
    tracks: &mut [TrackRuntime],
    transport: &mut Transport,
    io: &mut I,
    frame: u32,
) {
    let position = transport.position;
    let Some(pattern) = song.patterns.get(position.pattern) else {
        return;
    };

    for (index, track) in song.tracks.iter().enumerate() {
        let (Some(sequence), Some(runtime)) = (pattern.sequence(index), tracks.get_mut(index))
        else {
            continue;
        };

        match (sequence, runtime) {
            (Sequence::Midi(grid), TrackRuntime::Midi(midi)) => {
                let (Some(port), Some(settings)) = (track.port, track.midi_settings()) else {
                    continue;
                };
                for (column, event) in grid.at(position.tick).enumerate() {
                    render_midi(io, port, frame, settings, midi, column, event);
                }
            }
            (Sequence::Cv(grid), TrackRuntime::Cv(cv)) => {
                if let Some(value) = cv.pending.take() {
                    cv.value = value;
                }
                for event in grid.at(position.tick) {
                    match event.kind {
                        CvEventKind::None => {}
                        CvEventKind::OneShot => cv.value = event.value1,
                        CvEventKind::Interval => {
                            cv.value = event.value1;
                            cv.pending = Some(event.value2);
                        }
                    }
                }
            }
            (Sequence::Control(grid), TrackRuntime::Control) => {
                for event in grid.at(position.tick) {
                    match event.kind {
                        ControlEventKind::None => {}
                        ControlEventKind::GlobalTempo => transport.global_tempo = event.value,
                        ControlEventKind::RelativeTempo => transport.relative_tempo = event.value,
                    }
                }
            }
            _ => {}
        }
    }
}

fn render_midi<I: ProcessIo + ?Sized>(
    io: &mut I,
    port: PortId,
    frame: u32,
    settings: &MidiTrackSettings,
    midi: &mut MidiRuntime,
    column: usize,
    event: &MidiEvent,
) {
    let Some(message) = MidiMessage::from_event(event, settings.channel) else {
        return;
    };
    let Some(last_note) = midi.last_notes.get_mut(column) else {
        return;
    };

    match (event.kind, message) {
        (MidiEventKind::On, MidiMessage::NoteOn { note, .. }) => {
            if settings.note_off_on_new_note_on {
                if let Some(sounding) = last_note.take() {
                    write_message(
                        io,
                        port,
                        frame,
                        MidiMessage::NoteOff {
                            channel: settings.channel,
                            note: sounding,
                            velocity: 0,
                        },
                    );
                }
            }
            *last_note = Some(note);
        }
        (MidiEventKind::Off, MidiMessage::NoteOff { note, .. }) => {
            if *last_note == Some(note) {
                *last_note = None;
            }
        }
        _ => {}
    }
    write_message(io, port, frame, message);
}

fn write_cv<I: ProcessIo + ?Sized>(song: &Song, tracks: &[TrackRuntime], io: &mut I, frame: u32) {
    for (track, runtime) in song.tracks.iter().zip(tracks) {
        let (Some(port), TrackRuntime::Cv(cv)) = (track.port, runtime) else {
            continue;
        };
        if let Some(sample) = io
            .cv_buffer(port)
            .and_then(|buffer| buffer.get_mut(frame as usize))
        {
            *sample = cv.value;
        }
    }
}
