use crate::note::Note;

pub const CC_MOD_WHEEL: u8 = 1;

/// Pitch bend wheel center value (14-bit range).
pub const BEND_CENTER: u16 = 8192;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MidiEvent {
    NoteOn {
        channel: u8,
        note: Note,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: Note,
        velocity: u8,
    },
    ControlChange {
        channel: u8,
        control: u8,
        value: u8,
    },
    PitchBend {
        channel: u8,
        value: u16,
    },
    Invalid,
}

impl MidiEvent {
    pub fn from_raw(data: &[u8]) -> Self {
        match *data {
            [a @ 0x80..=0x8f, note, velocity] => MidiEvent::NoteOff {
                channel: a & 0x0f,
                note: Note(note),
                velocity,
            },
            // Note-on with velocity zero is a note-off in disguise.
            [a @ 0x90..=0x9f, note, 0] => MidiEvent::NoteOff {
                channel: a & 0x0f,
                note: Note(note),
                velocity: 0,
            },
            [a @ 0x90..=0x9f, note, velocity] => MidiEvent::NoteOn {
                channel: a & 0x0f,
                note: Note(note),
                velocity,
            },
            [a @ 0xb0..=0xbf, control, value] => MidiEvent::ControlChange {
                channel: a & 0x0f,
                control,
                value,
            },
            [a @ 0xe0..=0xef, lsb, msb] => MidiEvent::PitchBend {
                channel: a & 0x0f,
                value: lsb as u16 | ((msb as u16) << 7),
            },
            _ => MidiEvent::Invalid,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, MidiEvent::Invalid)
    }
}

/// Maps a 14-bit pitch bend value to [-1, 1] with the center at 0.
pub fn bend_to_unit(value: u16) -> f32 {
    (value as f32 - BEND_CENTER as f32) / BEND_CENTER as f32
}
