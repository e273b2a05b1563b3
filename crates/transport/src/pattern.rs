use std::sync::Arc;

use crate::{
    Event, IndexKind, Sequence, TeqError, TrackList, TransportPosition,
};

/// A block of sequencer material: one sequence per track, all `length` ticks long.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub name: String,
    length: usize,
    sequences: Vec<Arc<Sequence>>,
}

impl Pattern {
    /// An empty pattern whose sequences match `tracks` (kinds and column counts).
    pub fn for_tracks(tracks: &TrackList, length: usize) -> Self {
        let sequences = tracks
            .iter()
            .map(|track| Arc::new(Sequence::new(track.kind(), length, track.columns)))
            .collect();
        Self {
            name: String::new(),
            length,
            sequences,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn sequences(&self) -> &[Arc<Sequence>] {
        &self.sequences
    }

    pub fn sequence(&self, track: usize) -> Option<&Sequence> {
        self.sequences.get(track).map(Arc::as_ref)
    }

    pub fn check_tick(&self, tick: usize) -> Result<(), TeqError> {
        if tick >= self.length {
            return Err(TeqError::out_of_range(IndexKind::Tick, tick, self.length));
        }
        Ok(())
    }

    pub fn event(&self, track: usize, column: usize, tick: usize) -> Result<Event, TeqError> {
        let sequence = self.sequence_at(track)?;
        self.check_tick(tick)?;
        sequence.get(column, tick).ok_or_else(|| {
            TeqError::out_of_range(IndexKind::Column, column, sequence.column_count())
        })
    }

    /// Stores an event. Only the touched sequence is copied if it is shared
    /// with another pattern version.
    pub fn set_event(
        &mut self,
        track: usize,
        column: usize,
        tick: usize,
        event: Event,
    ) -> Result<(), TeqError> {
        event.validate()?;
        self.sequence_at(track)?;
        self.check_tick(tick)?;
        Arc::make_mut(&mut self.sequences[track]).set(column, tick, event)
    }

    pub fn clear_event(&mut self, track: usize, column: usize, tick: usize) -> Result<(), TeqError> {
        self.sequence_at(track)?;
        self.check_tick(tick)?;
        Arc::make_mut(&mut self.sequences[track]).clear(column, tick)
    }

    fn sequence_at(&self, track: usize) -> Result<&Sequence, TeqError> {
        self.sequences
            .get(track)
            .map(Arc::as_ref)
            .ok_or_else(|| TeqError::out_of_range(IndexKind::Track, track, self.sequences.len()))
    }

    /// Checks that this pattern can be used with `tracks`.
    pub fn check_matches(&self, tracks: &TrackList) -> Result<(), TeqError> {
        if self.sequences.len() != tracks.len() {
            return Err(TeqError::PatternMismatch(format!(
                "pattern has {} sequences, song has {} tracks",
                self.sequences.len(),
                tracks.len()
            )));
        }
        for (index, (sequence, track)) in self.sequences.iter().zip(tracks.iter()).enumerate() {
            if sequence.kind() != track.kind() {
                return Err(TeqError::PatternMismatch(format!(
                    "sequence {index} is {:?}, track '{}' is {:?}",
                    sequence.kind(),
                    track.name,
                    track.kind()
                )));
            }
            if sequence.column_count() != track.columns {
                return Err(TeqError::PatternMismatch(format!(
                    "sequence {index} has {} columns, track '{}' has {}",
                    sequence.column_count(),
                    track.name,
                    track.columns
                )));
            }
            if sequence.len() != self.length {
                return Err(TeqError::PatternMismatch(format!(
                    "sequence {index} has {} ticks, pattern has {}",
                    sequence.len(),
                    self.length
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn with_sequence_inserted(&self, index: usize, sequence: Sequence) -> Self {
        let mut pattern = self.clone();
        pattern.sequences.insert(index, Arc::new(sequence));
        pattern
    }

    pub(crate) fn with_sequence_removed(&self, index: usize) -> Self {
        let mut pattern = self.clone();
        pattern.sequences.remove(index);
        pattern
    }

    pub(crate) fn with_sequence_moved(&self, from: usize, to: usize) -> Self {
        let mut pattern = self.clone();
        let sequence = pattern.sequences.remove(from);
        pattern.sequences.insert(to, sequence);
        pattern
    }

    pub(crate) fn with_sequence_columns(&self, index: usize, columns: usize) -> Self {
        let mut pattern = self.clone();
        Arc::make_mut(&mut pattern.sequences[index]).resize_columns(columns);
        pattern
    }
}

/// Ordered list of shared patterns together with the tick offset at which each
/// pattern starts. The offset table is built with the list, so every insert,
/// removal, replacement or move produces a fresh, consistent table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternList {
    patterns: Vec<Arc<Pattern>>,
    /// `tick_offsets[i]` is the first song tick of pattern `i`; the last entry
    /// is the total number of ticks.
    tick_offsets: Vec<usize>,
}

impl PatternList {
    pub fn new(patterns: Vec<Arc<Pattern>>) -> Self {
        let mut tick_offsets = Vec::with_capacity(patterns.len() + 1);
        let mut total = 0usize;
        tick_offsets.push(0);
        for pattern in &patterns {
            total += pattern.length();
            tick_offsets.push(total);
        }
        Self {
            patterns,
            tick_offsets,
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Pattern>> {
        self.patterns.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Pattern>> + '_ {
        self.patterns.iter()
    }

    pub fn total_ticks(&self) -> usize {
        self.tick_offsets.last().copied().unwrap_or(0)
    }

    pub fn check_index(&self, index: usize) -> Result<(), TeqError> {
        if index >= self.patterns.len() {
            return Err(TeqError::out_of_range(
                IndexKind::Pattern,
                index,
                self.patterns.len(),
            ));
        }
        Ok(())
    }

    /// Song tick at which `position` lies.
    pub fn song_tick(&self, position: TransportPosition) -> Option<usize> {
        let start = self.tick_offsets.get(position.pattern)?;
        let pattern = self.patterns.get(position.pattern)?;
        (position.tick < pattern.length()).then_some(start + position.tick)
    }

    /// The position of song tick `tick`, or `None` past the end of the song.
    pub fn locate(&self, tick: usize) -> Option<TransportPosition> {
        if tick >= self.total_ticks() {
            return None;
        }
        // First offset strictly greater than `tick`, minus one, is the owning
        // pattern. Zero-length patterns share their offset with the next one
        // and are skipped by this search.
        let pattern = self.tick_offsets.partition_point(|&offset| offset <= tick) - 1;
        Some(TransportPosition::new(pattern, tick - self.tick_offsets[pattern]))
    }

    pub fn with_inserted(&self, index: usize, pattern: Pattern) -> Result<Self, TeqError> {
        if index > self.patterns.len() {
            return Err(TeqError::out_of_range(
                IndexKind::Pattern,
                index,
                self.patterns.len() + 1,
            ));
        }
        let mut patterns = self.patterns.clone();
        patterns.insert(index, Arc::new(pattern));
        Ok(Self::new(patterns))
    }

    pub fn with_removed(&self, index: usize) -> Result<Self, TeqError> {
        self.check_index(index)?;
        let mut patterns = self.patterns.clone();
        patterns.remove(index);
        Ok(Self::new(patterns))
    }

    pub fn with_moved(&self, from: usize, to: usize) -> Result<Self, TeqError> {
        self.check_index(from)?;
        self.check_index(to)?;
        let mut patterns = self.patterns.clone();
        let pattern = patterns.remove(from);
        patterns.insert(to, pattern);
        Ok(Self::new(patterns))
    }

    pub fn with_replaced(&self, index: usize, pattern: Pattern) -> Result<Self, TeqError> {
        self.check_index(index)?;
        let mut patterns = self.patterns.clone();
        patterns[index] = Arc::new(pattern);
        Ok(Self::new(patterns))
    }

    /// Applies `edit` to every pattern, producing a new list of new patterns
    /// that still share every untouched sequence.
    pub fn map_patterns(&self, edit: impl Fn(&Pattern) -> Pattern) -> Self {
        Self::new(
            self.patterns
                .iter()
                .map(|pattern| Arc::new(edit(pattern)))
                .collect(),
        )
    }
}

// Track-shape edits applied to every pattern of a list.
impl PatternList {
    pub fn with_track_inserted(&self, index: usize, track: &crate::Track) -> Self {
        self.map_patterns(|pattern| {
            pattern.with_sequence_inserted(
                index,
                Sequence::new(track.kind(), pattern.length(), track.columns),
            )
        })
    }

    pub fn with_track_removed(&self, index: usize) -> Self {
        self.map_patterns(|pattern| pattern.with_sequence_removed(index))
    }

    pub fn with_track_moved(&self, from: usize, to: usize) -> Self {
        self.map_patterns(|pattern| pattern.with_sequence_moved(from, to))
    }

    pub fn with_track_columns(&self, index: usize, columns: usize) -> Self {
        self.map_patterns(|pattern| pattern.with_sequence_columns(index, columns))
    }
}
