use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use teq_core::{
    ControlEvent, CvEvent, Event, EventSlot, LoopRange, MidiEvent, PortId, PortRegistry, Session, TeqConfig, TeqError,
    TrackKind, TransportPosition, TransportState,
};
use teq_render::{OfflineBackend, OfflineRunner, RenderedBlock, cv_samples};

const SAMPLE_RATE: u32 = 48_000;
const BLOCK: u32 = 64;
const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> TeqConfig {
    TeqConfig {
        client_name: "test".to_string(),
        command_timeout_ms: 5_000,
        // One tick per block
        global_tempo: 750.0,
        ..TeqConfig::default()
    }
}

fn running_session(config: TeqConfig) -> (Session<OfflineBackend>, OfflineRunner, OfflineBackend) {
    init_logging();
    let backend = OfflineBackend::new(SAMPLE_RATE);
    let (session, engine) = Session::new(config, backend.clone()).unwrap();
    let runner = OfflineRunner::spawn(engine, backend.clone(), BLOCK);
    (session, runner, backend)
}

fn midi_bytes(blocks: &[RenderedBlock], port: PortId) -> Vec<(u64, u32, [u8; 3])> {
    blocks
        .iter()
        .flat_map(|block| block.midi_for(port).map(|r| (block.index, r.frame, r.bytes)))
        .collect()
}

#[test]
fn test_note_on_then_note_off_one_tick_later() {
    let (mut session, runner, _backend) = running_session(config());

    session.insert_track(TrackKind::Midi, "bd", 0).unwrap();
    let pattern = session.create_pattern(16).unwrap();
    session.insert_pattern(pattern, 0).unwrap();
    session
        .set_midi_event(EventSlot::new(0, 0, 0), MidiEvent::note_on(36, 100))
        .unwrap();
    session
        .set_midi_event(EventSlot::new(0, 0, 1), MidiEvent::note_off(36, 0))
        .unwrap();
    session.set_send_all_notes_off_on_stop(false).unwrap();
    runner.drain();

    session.set_transport_state(TransportState::Playing).unwrap();
    let blocks = runner.render(4, TIMEOUT);
    let midi = midi_bytes(&blocks, PortId(0));

    let &(on_block, on_frame, _) = midi
        .iter()
        .find(|(_, _, bytes)| *bytes == [0x90, 36, 100])
        .expect("note on was rendered");
    assert_eq!(on_frame, 0);
    let next: Vec<_> = midi.iter().filter(|(index, _, _)| *index == on_block + 1).collect();
    assert_eq!(next, vec![&(on_block + 1, 0, [0x80, 36, 0])]);
}

#[test]
fn test_edits_leave_old_versions_untouched() {
    let (mut session, _runner, _backend) = running_session(config());
    session.insert_track(TrackKind::Midi, "bd", 0).unwrap();
    session.insert_pattern(session.create_pattern(4).unwrap(), 0).unwrap();

    let old_song = session.song().clone();
    let old_pattern = session.get_pattern(0).unwrap();
    session
        .set_midi_event(EventSlot::new(0, 0, 2), MidiEvent::note_on(60, 90))
        .unwrap();
    session.insert_track(TrackKind::Cv, "cv", 1).unwrap();

    assert_eq!(old_song.tracks.len(), 1);
    assert_eq!(
        old_pattern.event(0, 0, 2).unwrap(),
        Event::Midi(MidiEvent::default())
    );
    assert_eq!(
        session.get_midi_event(EventSlot::new(0, 0, 2)).unwrap(),
        MidiEvent::note_on(60, 90)
    );
    assert_eq!(session.number_of_tracks(), 2);
}

#[test]
fn test_gc_releases_replaced_versions() {
    let (mut session, _runner, _backend) = running_session(config());
    session.insert_track(TrackKind::Midi, "bd", 0).unwrap();

    let held = session.song().clone();
    let weak = Arc::downgrade(&held);
    session.set_song_name("renamed").unwrap();

    // Still referenced from here
    session.gc();
    assert!(weak.upgrade().is_some());

    drop(held);
    assert!(session.gc() > 0);
    assert!(weak.upgrade().is_none());
    assert_eq!(session.song().name, "renamed");
}

#[test]
fn test_commands_run_in_order() {
    let (mut session, _runner, _backend) = running_session(config());
    let log = Arc::new(AtomicUsize::new(0));

    for expected in 0..32 {
        let log = log.clone();
        session
            .write_command(move |_| {
                // Each command sees every earlier one
                let _ = log.compare_exchange(expected, expected + 1, Ordering::SeqCst, Ordering::SeqCst);
            })
            .unwrap();
    }
    session.wait().unwrap();
    assert_eq!(log.load(Ordering::SeqCst), 32);
}

#[test]
fn test_port_failure_leaves_song_unchanged() {
    init_logging();
    let backend = OfflineBackend::new(SAMPLE_RATE).with_max_ports(1);
    let (mut session, engine) = Session::new(config(), backend.clone()).unwrap();
    let _runner = OfflineRunner::spawn(engine, backend.clone(), BLOCK);

    session.insert_track(TrackKind::Midi, "a", 0).unwrap();
    assert!(matches!(
        session.insert_track(TrackKind::Midi, "b", 1),
        Err(TeqError::BackendResourceFailure(_))
    ));
    assert_eq!(session.number_of_tracks(), 1);

    // Control tracks need no port
    session.insert_track(TrackKind::Control, "tempo", 1).unwrap();
    assert_eq!(session.number_of_tracks(), 2);
    assert_eq!(backend.port_count(), 1);
}

#[test]
fn test_full_channel_rolls_back_port() {
    init_logging();
    let backend = OfflineBackend::new(SAMPLE_RATE);
    let config = TeqConfig {
        command_buffer_size: 1,
        command_timeout_ms: 50,
        ..TeqConfig::default()
    };
    // Nothing processes the engine
    let (mut session, _engine) = Session::new(config, backend.clone()).unwrap();

    assert!(matches!(
        session.insert_track(TrackKind::Midi, "a", 0),
        Err(TeqError::CommandTimeout(_))
    ));
    assert_eq!(session.number_of_tracks(), 1);

    assert!(matches!(
        session.insert_track(TrackKind::Midi, "b", 1),
        Err(TeqError::ChannelFull(_))
    ));
    assert_eq!(session.number_of_tracks(), 1);
    assert_eq!(backend.port_count(), 1);
}

#[test]
fn test_invalid_edits_are_rejected() {
    let (mut session, _runner, _backend) = running_session(config());
    session.insert_track(TrackKind::Midi, "bd", 0).unwrap();
    session.insert_track(TrackKind::Cv, "cv", 1).unwrap();
    session.insert_pattern(session.create_pattern(8).unwrap(), 0).unwrap();

    assert_eq!(
        session.insert_track(TrackKind::Cv, "bd", 2),
        Err(TeqError::NameConflict("bd".to_string()))
    );

    let err = session.insert_track(TrackKind::Midi, "far", 5).unwrap_err();
    assert_eq!(err.to_string(), "Track index out of bounds: 5. Valid bound: 3");

    let err = session
        .set_cv_event(EventSlot::new(0, 0, 0), CvEvent::one_shot(1.0))
        .unwrap_err();
    assert_eq!(
        err,
        TeqError::TrackKindMismatch {
            track: 0,
            expected: TrackKind::Cv,
            found: TrackKind::Midi,
        }
    );
    assert_eq!(err.to_string(), "Track 0 is a Midi track, expected Cv");
    assert!(matches!(
        session.get_control_event(EventSlot::new(0, 1, 0)),
        Err(TeqError::TrackKindMismatch { .. })
    ));
    assert!(matches!(
        session.set_midi_event(EventSlot::new(0, 0, 8), MidiEvent::note_on(1, 1)),
        Err(TeqError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        session.set_midi_event(EventSlot::new(0, 0, 0), MidiEvent::note_on(200, 1)),
        Err(TeqError::InvalidValue { .. })
    ));

    let backwards = LoopRange::new(TransportPosition::new(0, 4), TransportPosition::new(0, 2), true);
    assert!(matches!(
        session.set_loop_range(backwards),
        Err(TeqError::InvalidLoopRange { .. })
    ));
    assert!(matches!(
        session.set_global_tempo(0.0),
        Err(TeqError::InvalidValue { .. })
    ));
    assert!(matches!(
        session.set_global_tempo(f32::MAX),
        Err(TeqError::InvalidValue { .. })
    ));
    assert!(matches!(
        session.set_relative_tempo(f32::NAN),
        Err(TeqError::InvalidValue { .. })
    ));
    assert!(matches!(
        session.set_transport_position(TransportPosition::new(1, 0)),
        Err(TeqError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        session.create_pattern(0),
        Err(TeqError::InvalidValue { .. })
    ));
}

#[test]
fn test_no_state_info_before_processing() {
    init_logging();
    let (mut session, _engine) = Session::new(config(), OfflineBackend::new(SAMPLE_RATE)).unwrap();
    assert!(!session.has_state_info());
    assert_eq!(session.get_state_info(), Err(TeqError::NoStateAvailable));
    assert!(session.poll().is_none());
    assert_eq!(session.global_tempo(), 750.0);
}

#[test]
fn test_cv_track_renders_interval() {
    let (mut session, runner, _backend) = running_session(config());
    session.insert_track(TrackKind::Cv, "cv", 0).unwrap();
    session.insert_pattern(session.create_pattern(4).unwrap(), 0).unwrap();
    session
        .set_cv_event(EventSlot::new(0, 0, 0), CvEvent::interval(0.25, 0.75))
        .unwrap();
    let port = session.song().track(0).unwrap().port.unwrap();
    runner.drain();

    session.set_transport_state(TransportState::Playing).unwrap();
    let blocks = runner.render(4, TIMEOUT);
    let samples = cv_samples(&blocks, port);

    let start = samples
        .iter()
        .position(|&value| value == 0.25)
        .expect("interval start was rendered");
    // Held for one tick, then the second value
    assert!(samples[start..start + BLOCK as usize].iter().all(|&v| v == 0.25));
    assert!(samples[start + BLOCK as usize..].iter().all(|&v| v == 0.75));
}

#[test]
fn test_control_track_and_observation() {
    let (mut session, runner, _backend) = running_session(config());
    session.insert_track(TrackKind::Control, "tempo", 0).unwrap();
    session.insert_pattern(session.create_pattern(4).unwrap(), 0).unwrap();
    session
        .set_control_event(EventSlot::new(0, 0, 0), ControlEvent::relative_tempo(0.5))
        .unwrap();
    session
        .set_loop_range(LoopRange::new(
            TransportPosition::new(0, 0),
            TransportPosition::new(0, 4),
            true,
        ))
        .unwrap();

    session.set_transport_state(TransportState::Playing).unwrap();
    runner.render(4, TIMEOUT);

    let info = session.poll().expect("engine published state");
    assert!(session.is_playing());
    assert_eq!(info.relative_tempo, 0.5);
    assert_eq!(session.relative_tempo(), 0.5);
    assert!(session.loop_range().enabled);
    assert!(session.song().contains(session.transport_position()));

    session.set_transport_state(TransportState::Stopped).unwrap();
    runner.render(1, TIMEOUT);
    session.poll();
    assert_eq!(session.transport_state(), TransportState::Stopped);
}

#[test]
fn test_track_and_pattern_management() {
    let (mut session, _runner, backend) = running_session(config());
    session.insert_track(TrackKind::Midi, "a", 0).unwrap();
    session.insert_track(TrackKind::Cv, "b", 1).unwrap();
    session.insert_track(TrackKind::Control, "c", 0).unwrap();
    assert_eq!(session.track_name(0).unwrap(), "c");
    assert_eq!(session.track_type(2).unwrap(), TrackKind::Cv);

    session.insert_pattern(session.create_pattern(4).unwrap(), 0).unwrap();
    session.insert_pattern(session.create_pattern(8).unwrap(), 1).unwrap();
    session.move_pattern(1, 0).unwrap();
    assert_eq!(session.number_of_ticks(0).unwrap(), 8);

    session.move_track(0, 2).unwrap();
    assert_eq!(session.track_name(2).unwrap(), "c");
    assert_eq!(session.get_pattern(0).unwrap().sequences().len(), 3);

    session.set_midi_track_channel(0, 9).unwrap();
    assert!(matches!(
        session.set_midi_track_channel(1, 9),
        Err(TeqError::TrackKindMismatch { .. })
    ));
    assert!(session.set_midi_track_channel(0, 16).is_err());
    session.set_track_columns(0, 2).unwrap();
    session
        .set_midi_event(EventSlot::new(0, 0, 3).in_column(1), MidiEvent::cc(7, 100))
        .unwrap();

    session.remove_track(1).unwrap();
    assert_eq!(session.number_of_tracks(), 2);
    assert_eq!(backend.port_count(), 1);

    session.remove_pattern(0).unwrap();
    assert_eq!(session.number_of_patterns(), 1);
    assert_eq!(session.number_of_ticks(0).unwrap(), 4);
}

#[test]
fn test_track_limit_is_checked_before_port_registration() {
    let (mut session, _runner, backend) = running_session(TeqConfig {
        max_tracks: 1,
        ..config()
    });
    session.insert_track(TrackKind::Midi, "a", 0).unwrap();
    let before = session.song().clone();

    assert_eq!(
        session.insert_track(TrackKind::Midi, "b", 1),
        Err(TeqError::TooManyTracks { max: 1 })
    );
    assert_eq!(backend.port_count(), 1);
    assert!(Arc::ptr_eq(session.song(), &before));
}

#[test]
fn test_remove_track_releases_port_when_engine_is_silent() {
    init_logging();
    let backend = OfflineBackend::new(SAMPLE_RATE);
    let config = TeqConfig {
        command_timeout_ms: 50,
        ..TeqConfig::default()
    };
    // Nothing processes the engine
    let (mut session, _engine) = Session::new(config, backend.clone()).unwrap();

    assert!(matches!(
        session.insert_track(TrackKind::Cv, "cv", 0),
        Err(TeqError::CommandTimeout(_))
    ));
    assert_eq!(backend.port_count(), 1);

    assert!(matches!(
        session.remove_track(0),
        Err(TeqError::CommandTimeout(_))
    ));
    assert_eq!(session.number_of_tracks(), 0);
    assert_eq!(backend.port_count(), 0);
}

#[test]
fn test_remove_track_survives_port_release_failure() {
    let (mut session, _runner, mut backend) = running_session(config());
    session.insert_track(TrackKind::Midi, "bd", 0).unwrap();
    let port = session.song().track(0).unwrap().port.unwrap();

    // Released behind the session's back
    backend.unregister_port(port).unwrap();
    session.remove_track(0).unwrap();
    assert_eq!(session.number_of_tracks(), 0);
}
