use teq_core::{
    ControlEvent, CvEvent, EventSlot, LoopRange, MidiEvent, PortRegistry, Session, TeqError,
    TrackKind, TransportPosition,
};

pub const TICKS: usize = 16;
pub const CV_TRACK: usize = 2;

/// Two midi tracks, a cv and a control track, and one looping pattern: a
/// rising run of notes on "bd" with matching controller values on "bar".
pub fn build<R: PortRegistry>(session: &mut Session<R>) -> Result<(), TeqError> {
    session.set_loop_range(LoopRange::new(
        TransportPosition::new(0, 0),
        TransportPosition::new(1, 0),
        true,
    ))?;

    session.insert_track(TrackKind::Midi, "bd", 0)?;
    session.insert_track(TrackKind::Midi, "bar", 1)?;
    session.insert_track(TrackKind::Cv, "cv", CV_TRACK)?;
    session.insert_track(TrackKind::Control, "control", 3)?;

    let mut pattern = session.create_pattern(TICKS)?.with_name("run");
    pattern.set_event(CV_TRACK, 0, 0, CvEvent::interval(1.0, 0.0).into())?;
    pattern.set_event(3, 0, TICKS / 2, ControlEvent::relative_tempo(2.0).into())?;
    for tick in 0..TICKS {
        let value = tick as u32;
        pattern.set_event(0, 0, tick, MidiEvent::note_on(36 + value, 64).into())?;
        pattern.set_event(1, 0, tick, MidiEvent::cc(value, 64).into())?;
    }
    session.insert_pattern(pattern, 0)?;
    // Back to normal speed on the way round
    session.set_control_event(EventSlot::new(0, 3, 0), ControlEvent::relative_tempo(1.0))?;

    session.wait()?;
    session.gc();

    session.set_global_tempo(4.0)?;
    session.set_transport_position(TransportPosition::new(0, 0))?;
    log::info!(
        "demo song ready: {} tracks, {} ticks",
        session.number_of_tracks(),
        session.number_of_ticks(0)?
    );
    Ok(())
}
