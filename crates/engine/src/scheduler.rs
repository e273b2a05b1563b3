use teq_transport::{
    DEFAULT_GLOBAL_TEMPO, LoopRange, Song, StateInfo, TransportPosition, TransportSource,
    TransportState,
};

use crate::io::ExternalTransport;

/// Remaining time (in seconds) below which the next tick is considered due.
pub const TICK_EPSILON: f64 = 1e-9;

/// Most ticks dispatched within one frame. Ticks due beyond that are dropped.
pub const MAX_TICKS_PER_FRAME: usize = 64;

/// Transport state owned by the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transport {
    pub state: TransportState,
    pub source: TransportSource,
    pub position: TransportPosition,
    pub loop_range: LoopRange,
    /// Ticks per second.
    pub global_tempo: f32,
    pub relative_tempo: f32,
    /// Seconds until the tick at `position` is due.
    pub time_until_next_tick: f64,
    pub notes_off_on_loop: bool,
    pub notes_off_on_stop: bool,
    /// State at the end of the previous block.
    pub last_state: TransportState,
    /// Frames processed since the engine was created.
    pub frame_time: u64,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_TEMPO)
    }
}

impl Transport {
    pub fn new(global_tempo: f32) -> Self {
        Self {
            state: TransportState::Stopped,
            source: TransportSource::Internal,
            position: TransportPosition::default(),
            loop_range: LoopRange::default(),
            global_tempo,
            relative_tempo: 1.0,
            time_until_next_tick: 0.0,
            notes_off_on_loop: true,
            notes_off_on_stop: true,
            last_state: TransportState::Stopped,
            frame_time: 0,
        }
    }

    /// Effective ticks per second.
    pub fn tick_rate(&self) -> f64 {
        self.global_tempo as f64 * self.relative_tempo as f64
    }

    pub fn tick_duration(&self) -> f64 {
        1.0 / self.tick_rate()
    }

    pub fn state_info(&self, frame_offset: u32, is_tick_boundary: bool) -> StateInfo {
        StateInfo {
            transport_state: self.state,
            transport_source: self.source,
            transport_position: self.position,
            loop_range: self.loop_range,
            global_tempo: self.global_tempo,
            relative_tempo: self.relative_tempo,
            frame_time: self.frame_time + frame_offset as u64,
            is_tick_boundary,
        }
    }

    /// Follows the backend's transport for one block. While it rolls the
    /// position is relocated to the first tick at or after the external frame.
    pub fn follow(&mut self, song: &Song, external: &ExternalTransport, sample_rate: u32) {
        if !external.rolling {
            self.state = TransportState::Stopped;
            return;
        }

        let rate = external
            .tempo
            .map(|tempo| tempo.beats_per_minute / 60.0 * tempo.ticks_per_beat)
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .unwrap_or_else(|| self.tick_rate());

        let seconds = external.frame as f64 / sample_rate.max(1) as f64;
        let ticks = seconds * rate;
        let next = ticks.ceil();

        match song.patterns.locate(next as usize) {
            Some(position) => {
                self.position = position;
                self.time_until_next_tick = (next - ticks) / rate;
                self.state = TransportState::Playing;
            }
            // Past the end of the song there is nothing to follow
            None => self.state = TransportState::Stopped,
        }
    }
}

/// Result of moving the transport forward by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Continue(TransportPosition),
    /// The loop end was reached and the transport jumped back to the loop start.
    Looped(TransportPosition),
    /// There is no pattern left; carries the first position past the song.
    End(TransportPosition),
}

/// The tick following `position`. Ticks wrap into the next pattern at the end
/// of a pattern, empty patterns are skipped, and an enabled loop range sends
/// the transport back to its start once its (exclusive) end is reached.
pub fn advance_position(song: &Song, position: TransportPosition, loop_range: &LoopRange) -> Advance {
    if loop_range.enabled && loop_range.is_zero_length() && position == loop_range.start {
        return Advance::Looped(loop_range.start);
    }

    let mut next = TransportPosition::new(position.pattern, position.tick + 1);
    while let Some(pattern) = song.patterns.get(next.pattern) {
        if next.tick < pattern.length() {
            break;
        }
        next = TransportPosition::new(next.pattern + 1, 0);
    }

    if loop_range.enabled && position < loop_range.end && next >= loop_range.end {
        return Advance::Looped(loop_range.start);
    }
    if next.pattern >= song.patterns.len() {
        return Advance::End(next);
    }
    Advance::Continue(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ExternalTempo;
    use std::sync::Arc;
    use teq_transport::{Pattern, PatternList, TrackList};

    fn song(lengths: &[usize]) -> Song {
        let tracks = TrackList::default();
        let patterns = lengths
            .iter()
            .map(|&length| Arc::new(Pattern::for_tracks(&tracks, length)))
            .collect();
        Song::new("test").with_patterns(Arc::new(PatternList::new(patterns)))
    }

    fn pos(pattern: usize, tick: usize) -> TransportPosition {
        TransportPosition::new(pattern, tick)
    }

    #[test]
    fn test_tick_wraps_into_next_pattern() {
        let song = song(&[2, 3]);
        let no_loop = LoopRange::default();
        assert_eq!(
            advance_position(&song, pos(0, 0), &no_loop),
            Advance::Continue(pos(0, 1))
        );
        assert_eq!(
            advance_position(&song, pos(0, 1), &no_loop),
            Advance::Continue(pos(1, 0))
        );
        assert_eq!(
            advance_position(&song, pos(1, 2), &no_loop),
            Advance::End(pos(2, 0))
        );
    }

    #[test]
    fn test_empty_patterns_are_skipped() {
        let song = song(&[1, 0, 2]);
        assert_eq!(
            advance_position(&song, pos(0, 0), &LoopRange::default()),
            Advance::Continue(pos(2, 0))
        );
    }

    #[test]
    fn test_loop_end_is_exclusive() {
        let song = song(&[4, 4]);
        let range = LoopRange::new(pos(0, 2), pos(1, 1), true);
        assert_eq!(
            advance_position(&song, pos(0, 3), &range),
            Advance::Continue(pos(1, 0))
        );
        assert_eq!(
            advance_position(&song, pos(1, 0), &range),
            Advance::Looped(pos(0, 2))
        );
    }

    #[test]
    fn test_loop_to_end_of_song() {
        let song = song(&[2]);
        let range = LoopRange::new(pos(0, 0), pos(1, 0), true);
        assert_eq!(
            advance_position(&song, pos(0, 1), &range),
            Advance::Looped(pos(0, 0))
        );
    }

    #[test]
    fn test_zero_length_loop_holds_position() {
        let song = song(&[4]);
        let range = LoopRange::new(pos(0, 2), pos(0, 2), true);
        assert_eq!(
            advance_position(&song, pos(0, 2), &range),
            Advance::Looped(pos(0, 2))
        );
        // Elsewhere the transport runs normally
        assert_eq!(
            advance_position(&song, pos(0, 0), &range),
            Advance::Continue(pos(0, 1))
        );
    }

    #[test]
    fn test_disabled_loop_is_ignored() {
        let song = song(&[2]);
        let range = LoopRange::new(pos(0, 0), pos(0, 1), false);
        assert_eq!(
            advance_position(&song, pos(0, 0), &range),
            Advance::Continue(pos(0, 1))
        );
    }

    #[test]
    fn test_follow_external_with_tempo() {
        let song = song(&[8, 8]);
        let mut transport = Transport::new(8.0);
        // 120 bpm at 4 ticks per beat is 8 ticks per second; half a second in
        // is exactly tick 4
        let external = ExternalTransport {
            rolling: true,
            frame: 24_000,
            tempo: Some(ExternalTempo {
                beats_per_minute: 120.0,
                ticks_per_beat: 4.0,
            }),
        };
        transport.follow(&song, &external, 48_000);
        assert_eq!(transport.state, TransportState::Playing);
        assert_eq!(transport.position, pos(0, 4));
        assert!(transport.time_until_next_tick.abs() < TICK_EPSILON);

        // A bit later the next tick is ahead of us
        let external = ExternalTransport {
            frame: 24_000 + 3_000,
            ..external
        };
        transport.follow(&song, &external, 48_000);
        assert_eq!(transport.position, pos(0, 5));
        assert!((transport.time_until_next_tick - 0.0625).abs() < 1e-9);
    }

    #[test]
    fn test_follow_external_falls_back_to_own_tempo() {
        let song = song(&[4, 4]);
        let mut transport = Transport::new(2.0);
        let external = ExternalTransport {
            rolling: true,
            frame: 48_000 * 3,
            tempo: None,
        };
        transport.follow(&song, &external, 48_000);
        assert_eq!(transport.position, pos(1, 2));
    }

    #[test]
    fn test_follow_external_stop_and_past_end() {
        let song = song(&[4]);
        let mut transport = Transport::new(4.0);
        transport.state = TransportState::Playing;
        let stopped = ExternalTransport {
            rolling: false,
            frame: 0,
            tempo: None,
        };
        transport.follow(&song, &stopped, 48_000);
        assert_eq!(transport.state, TransportState::Stopped);

        let past_end = ExternalTransport {
            rolling: true,
            frame: 48_000 * 10,
            tempo: None,
        };
        transport.follow(&song, &past_end, 48_000);
        assert_eq!(transport.state, TransportState::Stopped);
    }
}
