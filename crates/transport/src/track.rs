use std::sync::Arc;

use crate::{IndexKind, PortId, TeqError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Midi,
    Cv,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiTrackSettings {
    /// Output channel, 0-15.
    pub channel: u8,
    /// Send a note-off for the column's sounding note before every note-on.
    pub note_off_on_new_note_on: bool,
}

impl Default for MidiTrackSettings {
    fn default() -> Self {
        Self {
            channel: 0,
            note_off_on_new_note_on: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSettings {
    Midi(MidiTrackSettings),
    Cv,
    Control,
}

impl TrackSettings {
    pub fn for_kind(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Midi => TrackSettings::Midi(MidiTrackSettings::default()),
            TrackKind::Cv => TrackSettings::Cv,
            TrackKind::Control => TrackSettings::Control,
        }
    }
}

/// Static track properties. A track's events live in the patterns, one
/// sequence per pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    /// Backend port this track renders to. Control tracks have none.
    pub port: Option<PortId>,
    /// Number of event columns every sequence of this track has.
    pub columns: usize,
    pub settings: TrackSettings,
}

impl Track {
    pub fn new(name: impl Into<String>, kind: TrackKind, port: Option<PortId>) -> Self {
        Self {
            name: name.into(),
            port,
            columns: 1,
            settings: TrackSettings::for_kind(kind),
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self.settings {
            TrackSettings::Midi(_) => TrackKind::Midi,
            TrackSettings::Cv => TrackKind::Cv,
            TrackSettings::Control => TrackKind::Control,
        }
    }

    pub fn midi_settings(&self) -> Option<&MidiTrackSettings> {
        match &self.settings {
            TrackSettings::Midi(settings) => Some(settings),
            _ => None,
        }
    }
}

/// Ordered list of shared tracks. One version of this list is shared by every
/// song snapshot that did not change the tracks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackList {
    tracks: Vec<Arc<Track>>,
}

impl TrackList {
    pub fn new(tracks: Vec<Arc<Track>>) -> Self {
        Self { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Track>> {
        self.tracks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Track>> + '_ {
        self.tracks.iter()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.tracks.iter().any(|track| track.name == name)
    }

    pub fn check_index(&self, index: usize) -> Result<(), TeqError> {
        if index >= self.tracks.len() {
            return Err(TeqError::out_of_range(
                IndexKind::Track,
                index,
                self.tracks.len(),
            ));
        }
        Ok(())
    }

    /// Copy of this list with `track` inserted at `index` (`index == len` appends).
    pub fn with_inserted(&self, index: usize, track: Track) -> Result<Self, TeqError> {
        if index > self.tracks.len() {
            return Err(TeqError::out_of_range(
                IndexKind::Track,
                index,
                self.tracks.len() + 1,
            ));
        }
        let mut tracks = self.tracks.clone();
        tracks.insert(index, Arc::new(track));
        Ok(Self { tracks })
    }

    pub fn with_removed(&self, index: usize) -> Result<Self, TeqError> {
        self.check_index(index)?;
        let mut tracks = self.tracks.clone();
        tracks.remove(index);
        Ok(Self { tracks })
    }

    pub fn with_moved(&self, from: usize, to: usize) -> Result<Self, TeqError> {
        self.check_index(from)?;
        self.check_index(to)?;
        let mut tracks = self.tracks.clone();
        let track = tracks.remove(from);
        tracks.insert(to, track);
        Ok(Self { tracks })
    }

    pub fn with_replaced(&self, index: usize, track: Track) -> Result<Self, TeqError> {
        self.check_index(index)?;
        let mut tracks = self.tracks.clone();
        tracks[index] = Arc::new(track);
        Ok(Self { tracks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> TrackList {
        TrackList::new(vec![
            Arc::new(Track::new("bd", TrackKind::Midi, Some(PortId(0)))),
            Arc::new(Track::new("cv", TrackKind::Cv, Some(PortId(1)))),
            Arc::new(Track::new("control", TrackKind::Control, None)),
        ])
    }

    #[test]
    fn test_track_kind_from_settings() {
        let list = list();
        let kinds: Vec<TrackKind> = list.iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![TrackKind::Midi, TrackKind::Cv, TrackKind::Control]);
    }

    #[test]
    fn test_with_moved_shares_tracks() {
        let list = list();
        let moved = list.with_moved(0, 2).unwrap();
        assert_eq!(moved.get(2).unwrap().name, "bd");
        assert!(Arc::ptr_eq(list.get(0).unwrap(), moved.get(2).unwrap()));
        // The original version is untouched
        assert_eq!(list.get(0).unwrap().name, "bd");
    }

    #[test]
    fn test_insert_bounds() {
        let list = list();
        assert!(list.with_inserted(3, Track::new("x", TrackKind::Cv, None)).is_ok());
        assert_eq!(
            list.with_inserted(4, Track::new("x", TrackKind::Cv, None)),
            Err(TeqError::out_of_range(IndexKind::Track, 4, 4))
        );
        assert_eq!(
            list.with_removed(3),
            Err(TeqError::out_of_range(IndexKind::Track, 3, 3))
        );
    }

    #[test]
    fn test_contains_name() {
        let list = list();
        assert!(list.contains_name("cv"));
        assert!(!list.contains_name("lead"));
    }
}
