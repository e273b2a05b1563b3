use std::sync::Arc;

use crate::{IndexKind, Pattern, PatternList, TeqError, Track, TrackList, TransportPosition};

/// One immutable version of the whole song.
///
/// Cloning a `Song` only bumps the reference counts of its track and pattern
/// lists. Edits build a new `Song` that points at new lists where something
/// changed and at the old lists everywhere else.
#[derive(Debug, Clone, Default)]
pub struct Song {
    pub name: String,
    pub description: String,
    pub tracks: Arc<TrackList>,
    pub patterns: Arc<PatternList>,
}

impl Song {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_tracks(&self, tracks: Arc<TrackList>) -> Self {
        Self {
            tracks,
            ..self.clone()
        }
    }

    pub fn with_patterns(&self, patterns: Arc<PatternList>) -> Self {
        Self {
            patterns,
            ..self.clone()
        }
    }

    pub fn track(&self, index: usize) -> Result<&Track, TeqError> {
        self.tracks
            .get(index)
            .map(Arc::as_ref)
            .ok_or_else(|| TeqError::out_of_range(IndexKind::Track, index, self.tracks.len()))
    }

    pub fn pattern(&self, index: usize) -> Result<&Arc<Pattern>, TeqError> {
        self.patterns
            .get(index)
            .ok_or_else(|| TeqError::out_of_range(IndexKind::Pattern, index, self.patterns.len()))
    }

    pub fn check_track_index(&self, index: usize) -> Result<(), TeqError> {
        self.tracks.check_index(index)
    }

    pub fn check_pattern_index(&self, index: usize) -> Result<(), TeqError> {
        self.patterns.check_index(index)
    }

    pub fn check_tick_index(&self, pattern: usize, tick: usize) -> Result<(), TeqError> {
        self.pattern(pattern)?.check_tick(tick)
    }

    /// Whether `position` addresses a playable tick of this song.
    pub fn contains(&self, position: TransportPosition) -> bool {
        self.patterns
            .get(position.pattern)
            .is_some_and(|pattern| position.tick < pattern.length())
    }
}
