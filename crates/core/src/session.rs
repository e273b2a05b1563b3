use std::sync::Arc;

use basedrop::Collector;
use teq_engine::{
    CommandSender, Engine, EngineState, PortKind, PortRegistry, StateInfoReceiver,
};
use teq_transport::{
    ControlEvent, CvEvent, Event, IndexKind, LoopRange, MAX_COLUMNS, MidiEvent, Pattern,
    PatternList, Song, StateInfo, TeqError, Track, TrackKind, TrackList, TrackSettings,
    TransportPosition, TransportSource, TransportState, validate_tempo,
};

use crate::config::TeqConfig;
use crate::heap::Heap;

/// Address of one event slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSlot {
    pub pattern: usize,
    pub track: usize,
    pub tick: usize,
    pub column: usize,
}

impl EventSlot {
    pub fn new(pattern: usize, track: usize, tick: usize) -> Self {
        Self {
            pattern,
            track,
            tick,
            column: 0,
        }
    }

    pub fn in_column(self, column: usize) -> Self {
        Self { column, ..self }
    }
}

/// The control side of a sequencer.
///
/// Every edit builds a new song version next to the one the engine is playing,
/// hands it over through the command channel and waits for the engine to pick
/// it up. Old versions are released by [`Session::gc`].
pub struct Session<R: PortRegistry> {
    commands: CommandSender,
    state_info: StateInfoReceiver,
    collector: Collector,
    songs: Heap<Song>,
    track_lists: Heap<TrackList>,
    pattern_lists: Heap<PatternList>,
    song: Arc<Song>,
    registry: R,
    last_state: StateInfo,
    config: TeqConfig,
}

impl<R: PortRegistry> Session<R> {
    /// Creates a session with an empty song. The returned engine has to be
    /// driven by the backend behind `registry`.
    pub fn new(config: TeqConfig, registry: R) -> Result<(Self, Engine), TeqError> {
        config.validate()?;

        let mut songs = Heap::new();
        let mut track_lists = Heap::new();
        let mut pattern_lists = Heap::new();
        let song = songs.add(Song {
            name: config.client_name.clone(),
            description: String::new(),
            tracks: track_lists.add(TrackList::default()),
            patterns: pattern_lists.add(PatternList::default()),
        });

        let (engine, handle) = teq_engine::create(song.clone(), &config.engine_config());
        let last_state = StateInfo {
            global_tempo: config.global_tempo,
            ..StateInfo::default()
        };
        log::info!("session '{}' created", config.client_name);

        Ok((
            Self {
                commands: handle.commands,
                state_info: handle.state_info,
                collector: handle.collector,
                songs,
                track_lists,
                pattern_lists,
                song,
                registry,
                last_state,
                config,
            },
            engine,
        ))
    }

    pub fn config(&self) -> &TeqConfig {
        &self.config
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// Queues `f` to run on the audio thread without waiting for it.
    pub fn write_command<F>(&mut self, f: F) -> Result<(), TeqError>
    where
        F: FnMut(&mut EngineState) + Send + 'static,
    {
        self.commands.write(f)
    }

    /// Queues `f` and waits until the audio thread has run it.
    pub fn write_command_and_wait<F>(&mut self, f: F) -> Result<(), TeqError>
    where
        F: FnMut(&mut EngineState) + Send + 'static,
    {
        self.commands.write_and_wait(f).inspect_err(|e| {
            if matches!(e, TeqError::CommandTimeout(_)) {
                log::warn!("{e}; the command stays queued");
            }
        })
    }

    /// Round trip through the engine: returns once every command written so
    /// far has been executed.
    pub fn wait(&mut self) -> Result<(), TeqError> {
        self.write_command_and_wait(|_| {})
    }

    /// Releases song versions, lists and consumed commands nothing refers to
    /// anymore. Returns the number of heap entries released.
    pub fn gc(&mut self) -> usize {
        self.collector.collect();
        // Songs first: a dead song may hold the last outside reference to a list
        let released =
            self.songs.gc() + self.track_lists.gc() + self.pattern_lists.gc();
        if released > 0 {
            log::debug!("gc released {released} entries");
        }
        released
    }

    /// Makes `song` the current version. `edit` runs on the audio thread right
    /// after the song swap, in the same command.
    ///
    /// A full channel leaves everything as it was. A timeout leaves the
    /// command queued; the session already treats `song` as current.
    fn install<F>(&mut self, song: Song, mut edit: F) -> Result<(), TeqError>
    where
        F: FnMut(&mut EngineState) + Send + 'static,
    {
        self.track_lists.insert(&song.tracks);
        self.pattern_lists.insert(&song.patterns);
        let song = self.songs.add(song);

        let installed = song.clone();
        self.commands.write(move |state| {
            state.set_song(installed.clone());
            edit(state);
        })?;
        self.song = song;

        self.commands.wait().inspect_err(|e| {
            log::warn!("{e}; the new song version stays queued");
        })
    }

    fn install_song(&mut self, song: Song) -> Result<(), TeqError> {
        self.install(song, |_| {})
    }
}

// Tracks
impl<R: PortRegistry> Session<R> {
    /// Inserts an empty track at `index`. Midi and cv tracks get a backend
    /// port; if the engine can't be reached the port is released again.
    pub fn insert_track(&mut self, kind: TrackKind, name: &str, index: usize) -> Result<(), TeqError> {
        if self.song.tracks.contains_name(name) {
            return Err(TeqError::NameConflict(name.to_string()));
        }
        let count = self.song.tracks.len();
        if index > count {
            return Err(TeqError::out_of_range(IndexKind::Track, index, count + 1));
        }
        if count >= self.config.max_tracks {
            return Err(TeqError::TooManyTracks {
                max: self.config.max_tracks,
            });
        }

        let port = match kind {
            TrackKind::Midi => Some(self.registry.register_port(name, PortKind::Midi)?),
            TrackKind::Cv => Some(self.registry.register_port(name, PortKind::Cv)?),
            TrackKind::Control => None,
        };

        let track = Track::new(name, kind, port);
        let patterns = self.song.patterns.with_track_inserted(index, &track);
        let tracks = self.song.tracks.with_inserted(index, track)?;
        let song = Song {
            tracks: Arc::new(tracks),
            patterns: Arc::new(patterns),
            ..(*self.song).clone()
        };

        match self.install(song, move |state| state.insert_track_runtime(index, kind)) {
            Err(TeqError::ChannelFull(channel)) => {
                if let Some(port) = port {
                    log::warn!("rolling back port of track '{name}'");
                    if let Err(e) = self.registry.unregister_port(port) {
                        log::warn!("failed to release port of track '{name}': {e}");
                    }
                }
                Err(TeqError::ChannelFull(channel))
            }
            result => {
                if result.is_ok() {
                    log::info!("inserted {kind:?} track '{name}' at {index}");
                }
                result
            }
        }
    }

    /// Removes a track and its sequences. Its port is released once the
    /// engine has stopped using it, or right away if the engine doesn't
    /// answer in time; the removal then stays queued.
    pub fn remove_track(&mut self, index: usize) -> Result<(), TeqError> {
        let track = self.song.track(index)?.clone();
        let tracks = self.song.tracks.with_removed(index)?;
        let patterns = self.song.patterns.with_track_removed(index);
        let song = Song {
            tracks: Arc::new(tracks),
            patterns: Arc::new(patterns),
            ..(*self.song).clone()
        };

        let result = self.install(song, move |state| state.remove_track_runtime(index));
        if let Err(TeqError::ChannelFull(_)) = result {
            return result;
        }
        log::info!("removed track '{}'", track.name);

        if let Some(port) = track.port {
            if let Err(e) = self.registry.unregister_port(port) {
                log::warn!("failed to release port of track '{}': {e}", track.name);
            }
        }
        result
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), TeqError> {
        let tracks = self.song.tracks.with_moved(from, to)?;
        let patterns = self.song.patterns.with_track_moved(from, to);
        let song = Song {
            tracks: Arc::new(tracks),
            patterns: Arc::new(patterns),
            ..(*self.song).clone()
        };
        self.install(song, move |state| state.move_track_runtime(from, to))?;
        log::debug!("moved track {from} to {to}");
        Ok(())
    }

    /// Sets the output channel (0-15) of a midi track.
    pub fn set_midi_track_channel(&mut self, index: usize, channel: u8) -> Result<(), TeqError> {
        if channel > 15 {
            return Err(TeqError::InvalidValue {
                what: "midi channel",
                value: channel as f64,
            });
        }
        self.edit_midi_settings(index, |settings| settings.channel = channel)
    }

    pub fn set_note_off_on_new_note_on(&mut self, index: usize, enabled: bool) -> Result<(), TeqError> {
        self.edit_midi_settings(index, |settings| settings.note_off_on_new_note_on = enabled)
    }

    fn edit_midi_settings(
        &mut self,
        index: usize,
        edit: impl FnOnce(&mut teq_transport::MidiTrackSettings),
    ) -> Result<(), TeqError> {
        let mut track = self.song.track(index)?.clone();
        let found = track.kind();
        let TrackSettings::Midi(settings) = &mut track.settings else {
            return Err(self.kind_mismatch(index, TrackKind::Midi, found));
        };
        edit(settings);

        let tracks = self.song.tracks.with_replaced(index, track)?;
        let song = self.song.with_tracks(Arc::new(tracks));
        self.install_song(song)
    }

    /// Sets the number of parallel event columns of a track.
    pub fn set_track_columns(&mut self, index: usize, columns: usize) -> Result<(), TeqError> {
        if columns == 0 || columns > MAX_COLUMNS {
            return Err(TeqError::InvalidValue {
                what: "column count",
                value: columns as f64,
            });
        }
        let mut track = self.song.track(index)?.clone();
        track.columns = columns;

        let tracks = self.song.tracks.with_replaced(index, track)?;
        let patterns = self.song.patterns.with_track_columns(index, columns);
        let song = Song {
            tracks: Arc::new(tracks),
            patterns: Arc::new(patterns),
            ..(*self.song).clone()
        };
        self.install_song(song)
    }
}

// Patterns
impl<R: PortRegistry> Session<R> {
    /// An empty pattern that fits the current tracks. It only becomes part of
    /// the song once inserted.
    pub fn create_pattern(&self, length: usize) -> Result<Pattern, TeqError> {
        if length == 0 {
            return Err(TeqError::InvalidValue {
                what: "pattern length",
                value: 0.0,
            });
        }
        Ok(Pattern::for_tracks(&self.song.tracks, length))
    }

    pub fn insert_pattern(&mut self, pattern: Pattern, index: usize) -> Result<(), TeqError> {
        pattern.check_matches(&self.song.tracks)?;
        let length = pattern.length();
        let patterns = self.song.patterns.with_inserted(index, pattern)?;
        self.install_song(self.song.with_patterns(Arc::new(patterns)))?;
        log::debug!("inserted pattern of {length} ticks at {index}");
        Ok(())
    }

    /// Replaces the pattern at `index`.
    pub fn set_pattern(&mut self, index: usize, pattern: Pattern) -> Result<(), TeqError> {
        pattern.check_matches(&self.song.tracks)?;
        let patterns = self.song.patterns.with_replaced(index, pattern)?;
        self.install_song(self.song.with_patterns(Arc::new(patterns)))
    }

    pub fn remove_pattern(&mut self, index: usize) -> Result<(), TeqError> {
        let patterns = self.song.patterns.with_removed(index)?;
        self.install_song(self.song.with_patterns(Arc::new(patterns)))?;
        log::debug!("removed pattern {index}");
        Ok(())
    }

    pub fn move_pattern(&mut self, from: usize, to: usize) -> Result<(), TeqError> {
        let patterns = self.song.patterns.with_moved(from, to)?;
        self.install_song(self.song.with_patterns(Arc::new(patterns)))
    }
}

// Events
impl<R: PortRegistry> Session<R> {
    pub fn set_event(&mut self, slot: EventSlot, event: impl Into<Event>) -> Result<(), TeqError> {
        let event = event.into();
        let mut pattern = self.pattern_for_edit(slot, Some(event.kind()))?;
        pattern.set_event(slot.track, slot.column, slot.tick, event)?;
        let patterns = self.song.patterns.with_replaced(slot.pattern, pattern)?;
        self.install_song(self.song.with_patterns(Arc::new(patterns)))
    }

    pub fn set_midi_event(&mut self, slot: EventSlot, event: MidiEvent) -> Result<(), TeqError> {
        self.set_event(slot, event)
    }

    pub fn set_cv_event(&mut self, slot: EventSlot, event: CvEvent) -> Result<(), TeqError> {
        self.set_event(slot, event)
    }

    pub fn set_control_event(&mut self, slot: EventSlot, event: ControlEvent) -> Result<(), TeqError> {
        self.set_event(slot, event)
    }

    /// Resets a slot to the empty event of its track's kind.
    pub fn clear_event(&mut self, slot: EventSlot) -> Result<(), TeqError> {
        let mut pattern = self.pattern_for_edit(slot, None)?;
        pattern.clear_event(slot.track, slot.column, slot.tick)?;
        let patterns = self.song.patterns.with_replaced(slot.pattern, pattern)?;
        self.install_song(self.song.with_patterns(Arc::new(patterns)))
    }

    pub fn get_event(&self, slot: EventSlot) -> Result<Event, TeqError> {
        let pattern = self.song.pattern(slot.pattern)?;
        self.song.check_track_index(slot.track)?;
        pattern.event(slot.track, slot.column, slot.tick)
    }

    pub fn get_midi_event(&self, slot: EventSlot) -> Result<MidiEvent, TeqError> {
        match self.get_event(slot)? {
            Event::Midi(event) => Ok(event),
            other => Err(self.kind_mismatch(slot.track, TrackKind::Midi, other.kind())),
        }
    }

    pub fn get_cv_event(&self, slot: EventSlot) -> Result<CvEvent, TeqError> {
        match self.get_event(slot)? {
            Event::Cv(event) => Ok(event),
            other => Err(self.kind_mismatch(slot.track, TrackKind::Cv, other.kind())),
        }
    }

    pub fn get_control_event(&self, slot: EventSlot) -> Result<ControlEvent, TeqError> {
        match self.get_event(slot)? {
            Event::Control(event) => Ok(event),
            other => Err(self.kind_mismatch(slot.track, TrackKind::Control, other.kind())),
        }
    }

    fn kind_mismatch(&self, track: usize, expected: TrackKind, found: TrackKind) -> TeqError {
        TeqError::TrackKindMismatch {
            track,
            expected,
            found,
        }
    }

    /// Copy of the pattern holding `slot`, after checking the pattern and track
    /// indices and, if given, that the track has kind `kind`.
    fn pattern_for_edit(&self, slot: EventSlot, kind: Option<TrackKind>) -> Result<Pattern, TeqError> {
        let pattern = self.song.pattern(slot.pattern)?;
        let track = self.song.track(slot.track)?;
        if let Some(kind) = kind {
            if track.kind() != kind {
                return Err(self.kind_mismatch(slot.track, kind, track.kind()));
            }
        }
        Ok(Pattern::clone(pattern))
    }
}

// Transport, tempo and song properties
impl<R: PortRegistry> Session<R> {
    /// Sets the tempo in ticks per second.
    pub fn set_global_tempo(&mut self, tempo: f32) -> Result<(), TeqError> {
        validate_tempo("global tempo", tempo)?;
        self.write_command_and_wait(move |state| state.set_global_tempo(tempo))
    }

    /// Sets the factor applied on top of the global tempo.
    pub fn set_relative_tempo(&mut self, tempo: f32) -> Result<(), TeqError> {
        validate_tempo("relative tempo", tempo)?;
        self.write_command_and_wait(move |state| state.set_relative_tempo(tempo))
    }

    pub fn set_loop_range(&mut self, loop_range: LoopRange) -> Result<(), TeqError> {
        loop_range.validate()?;
        self.write_command_and_wait(move |state| state.set_loop_range(loop_range))
    }

    pub fn set_transport_state(&mut self, transport_state: TransportState) -> Result<(), TeqError> {
        log::debug!("transport {transport_state:?}");
        self.write_command_and_wait(move |state| state.set_transport_state(transport_state))
    }

    pub fn set_transport_source(&mut self, source: TransportSource) -> Result<(), TeqError> {
        self.write_command_and_wait(move |state| state.set_transport_source(source))
    }

    /// Moves the transport to `position`, which must be a tick of the song.
    pub fn set_transport_position(&mut self, position: TransportPosition) -> Result<(), TeqError> {
        self.song.check_tick_index(position.pattern, position.tick)?;
        self.write_command_and_wait(move |state| state.set_transport_position(position))
    }

    pub fn set_send_all_notes_off_on_loop(&mut self, enabled: bool) -> Result<(), TeqError> {
        self.write_command_and_wait(move |state| state.set_notes_off_on_loop(enabled))
    }

    pub fn set_send_all_notes_off_on_stop(&mut self, enabled: bool) -> Result<(), TeqError> {
        self.write_command_and_wait(move |state| state.set_notes_off_on_stop(enabled))
    }

    pub fn set_song_name(&mut self, name: &str) -> Result<(), TeqError> {
        let song = Song {
            name: name.to_string(),
            ..(*self.song).clone()
        };
        self.install_song(song)
    }

    pub fn set_description(&mut self, description: &str) -> Result<(), TeqError> {
        let song = Song {
            description: description.to_string(),
            ..(*self.song).clone()
        };
        self.install_song(song)
    }
}

// Observation
impl<R: PortRegistry> Session<R> {
    /// The current song version.
    pub fn song(&self) -> &Arc<Song> {
        &self.song
    }

    pub fn number_of_tracks(&self) -> usize {
        self.song.tracks.len()
    }

    pub fn number_of_patterns(&self) -> usize {
        self.song.patterns.len()
    }

    pub fn number_of_ticks(&self, pattern: usize) -> Result<usize, TeqError> {
        Ok(self.song.pattern(pattern)?.length())
    }

    pub fn track_name(&self, index: usize) -> Result<&str, TeqError> {
        Ok(&self.song.track(index)?.name)
    }

    pub fn track_type(&self, index: usize) -> Result<TrackKind, TeqError> {
        Ok(self.song.track(index)?.kind())
    }

    pub fn get_pattern(&self, index: usize) -> Result<Arc<Pattern>, TeqError> {
        self.song.pattern(index).cloned()
    }

    pub fn has_state_info(&self) -> bool {
        self.state_info.has_state_info()
    }

    /// Oldest unread state info sample.
    pub fn get_state_info(&mut self) -> Result<StateInfo, TeqError> {
        let info = self.state_info.get_state_info()?;
        self.last_state = info;
        Ok(info)
    }

    /// Reads every pending state info sample and keeps the freshest one.
    pub fn poll(&mut self) -> Option<StateInfo> {
        let latest = self.state_info.latest();
        if let Some(info) = latest {
            self.last_state = info;
        }
        latest
    }

    /// The freshest state info seen by [`Session::poll`] or
    /// [`Session::get_state_info`].
    pub fn last_state_info(&self) -> &StateInfo {
        &self.last_state
    }

    pub fn transport_state(&self) -> TransportState {
        self.last_state.transport_state
    }

    pub fn transport_source(&self) -> TransportSource {
        self.last_state.transport_source
    }

    pub fn transport_position(&self) -> TransportPosition {
        self.last_state.transport_position
    }

    pub fn loop_range(&self) -> LoopRange {
        self.last_state.loop_range
    }

    pub fn global_tempo(&self) -> f32 {
        self.last_state.global_tempo
    }

    pub fn relative_tempo(&self) -> f32 {
        self.last_state.relative_tempo
    }

    pub fn is_playing(&self) -> bool {
        self.last_state.transport_state.is_playing()
    }
}
