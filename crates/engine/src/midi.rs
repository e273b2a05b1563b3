use teq_transport::{MidiEvent, MidiEventKind};

/// Controller number of the channel-mode "All Notes Off" message.
pub const ALL_NOTES_OFF_CC: u8 = 123;

/// A channel voice message ready to be written to a MIDI port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    pub fn all_notes_off(channel: u8) -> Self {
        MidiMessage::ControlChange {
            channel,
            controller: ALL_NOTES_OFF_CC,
            value: 0,
        }
    }

    /// Message for a sequence event, or `None` for an empty slot.
    pub fn from_event(event: &MidiEvent, channel: u8) -> Option<Self> {
        let data1 = (event.value1 & 0x7f) as u8;
        let data2 = (event.value2 & 0x7f) as u8;
        match event.kind {
            MidiEventKind::None => None,
            MidiEventKind::On => Some(MidiMessage::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            }),
            MidiEventKind::Off => Some(MidiMessage::NoteOff {
                channel,
                note: data1,
                velocity: data2,
            }),
            MidiEventKind::Cc => Some(MidiMessage::ControlChange {
                channel,
                controller: data1,
                value: data2,
            }),
            MidiEventKind::PitchBend => Some(MidiMessage::PitchBend {
                channel,
                value: (event.value1 & 0x3fff) as u16,
            }),
        }
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => [0x90 | (channel & 0x0f), note & 0x7f, velocity & 0x7f],
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => [0x80 | (channel & 0x0f), note & 0x7f, velocity & 0x7f],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => [0xb0 | (channel & 0x0f), controller & 0x7f, value & 0x7f],
            MidiMessage::PitchBend { channel, value } => [
                0xe0 | (channel & 0x0f),
                (value & 0x7f) as u8,
                ((value >> 7) & 0x7f) as u8,
            ],
        }
    }
}
