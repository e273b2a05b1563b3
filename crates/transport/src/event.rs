use crate::TeqError;

/// Highest value a 7-bit MIDI data byte can carry.
pub const MIDI_DATA_MAX: u32 = 127;

/// Highest value of a 14-bit pitch bend.
pub const PITCH_BEND_MAX: u32 = 16383;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MidiEventKind {
    #[default]
    None,
    On,
    Off,
    Cc,
    PitchBend,
}

/// A MIDI event in a sequence slot.
///
/// * `On`/`Off`: `value1` is the note, `value2` the velocity
/// * `Cc`: `value1` is the controller, `value2` the value
/// * `PitchBend`: `value1` is the 14-bit bend (8192 = center), `value2` is ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiEvent {
    pub kind: MidiEventKind,
    pub value1: u32,
    pub value2: u32,
}

impl MidiEvent {
    pub fn new(kind: MidiEventKind, value1: u32, value2: u32) -> Self {
        Self {
            kind,
            value1,
            value2,
        }
    }

    pub fn note_on(note: u32, velocity: u32) -> Self {
        Self::new(MidiEventKind::On, note, velocity)
    }

    pub fn note_off(note: u32, velocity: u32) -> Self {
        Self::new(MidiEventKind::Off, note, velocity)
    }

    pub fn cc(controller: u32, value: u32) -> Self {
        Self::new(MidiEventKind::Cc, controller, value)
    }

    pub fn pitch_bend(bend: u32) -> Self {
        Self::new(MidiEventKind::PitchBend, bend, 0)
    }

    pub fn is_none(&self) -> bool {
        self.kind == MidiEventKind::None
    }

    pub fn validate(&self) -> Result<(), TeqError> {
        match self.kind {
            MidiEventKind::None => Ok(()),
            MidiEventKind::On | MidiEventKind::Off | MidiEventKind::Cc => {
                check_range("midi data byte 1", self.value1, MIDI_DATA_MAX)?;
                check_range("midi data byte 2", self.value2, MIDI_DATA_MAX)
            }
            MidiEventKind::PitchBend => check_range("pitch bend", self.value1, PITCH_BEND_MAX),
        }
    }
}

fn check_range(what: &'static str, value: u32, max: u32) -> Result<(), TeqError> {
    if value > max {
        return Err(TeqError::InvalidValue {
            what,
            value: value as f64,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CvEventKind {
    #[default]
    None,
    OneShot,
    Interval,
}

/// A continuous-voltage event.
///
/// `OneShot` holds `value1` from its tick on. `Interval` holds `value1` for its
/// own tick and `value2` from the following tick on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CvEvent {
    pub kind: CvEventKind,
    pub value1: f32,
    pub value2: f32,
}

impl CvEvent {
    pub fn new(kind: CvEventKind, value1: f32, value2: f32) -> Self {
        Self {
            kind,
            value1,
            value2,
        }
    }

    pub fn one_shot(value: f32) -> Self {
        Self::new(CvEventKind::OneShot, value, value)
    }

    pub fn interval(from: f32, to: f32) -> Self {
        Self::new(CvEventKind::Interval, from, to)
    }

    pub fn is_none(&self) -> bool {
        self.kind == CvEventKind::None
    }

    pub fn validate(&self) -> Result<(), TeqError> {
        for value in [self.value1, self.value2] {
            if !value.is_finite() {
                return Err(TeqError::InvalidValue {
                    what: "cv value",
                    value: value as f64,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlEventKind {
    #[default]
    None,
    GlobalTempo,
    RelativeTempo,
}

/// Tempo automation. `GlobalTempo` carries ticks per second, `RelativeTempo`
/// a factor applied on top of the global tempo.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlEvent {
    pub kind: ControlEventKind,
    pub value: f32,
}

impl ControlEvent {
    pub fn new(kind: ControlEventKind, value: f32) -> Self {
        Self { kind, value }
    }

    pub fn global_tempo(ticks_per_second: f32) -> Self {
        Self::new(ControlEventKind::GlobalTempo, ticks_per_second)
    }

    pub fn relative_tempo(factor: f32) -> Self {
        Self::new(ControlEventKind::RelativeTempo, factor)
    }

    pub fn is_none(&self) -> bool {
        self.kind == ControlEventKind::None
    }

    pub fn validate(&self) -> Result<(), TeqError> {
        match self.kind {
            ControlEventKind::None => Ok(()),
            ControlEventKind::GlobalTempo => validate_tempo("global tempo", self.value),
            ControlEventKind::RelativeTempo => validate_tempo("relative tempo", self.value),
        }
    }
}

/// Upper bound for the global tempo (ticks per second) and the relative tempo
/// factor.
pub const MAX_TICK_RATE: f32 = 100_000.0;

/// Tempo scalars divide the tick duration, so anything that is not a positive
/// finite number up to [`MAX_TICK_RATE`] is rejected here and never reaches
/// the scheduler.
pub fn validate_tempo(what: &'static str, value: f32) -> Result<(), TeqError> {
    if !value.is_finite() || value <= 0.0 || value > MAX_TICK_RATE {
        return Err(TeqError::InvalidValue {
            what,
            value: value as f64,
        });
    }
    Ok(())
}

/// Any of the three event families.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Midi(MidiEvent),
    Cv(CvEvent),
    Control(ControlEvent),
}

impl Event {
    pub fn kind(&self) -> crate::TrackKind {
        match self {
            Event::Midi(_) => crate::TrackKind::Midi,
            Event::Cv(_) => crate::TrackKind::Cv,
            Event::Control(_) => crate::TrackKind::Control,
        }
    }

    pub fn validate(&self) -> Result<(), TeqError> {
        match self {
            Event::Midi(e) => e.validate(),
            Event::Cv(e) => e.validate(),
            Event::Control(e) => e.validate(),
        }
    }
}

impl From<MidiEvent> for Event {
    fn from(event: MidiEvent) -> Self {
        Event::Midi(event)
    }
}

impl From<CvEvent> for Event {
    fn from(event: CvEvent) -> Self {
        Event::Cv(event)
    }
}

impl From<ControlEvent> for Event {
    fn from(event: ControlEvent) -> Self {
        Event::Control(event)
    }
}
