use crate::util::hz_from_note;

/// A MIDI note number.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Note(pub u8);

impl From<u8> for Note {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl Note {
    pub fn middle_c() -> Self {
        Self(60)
    }

    pub fn frequency(&self) -> f32 {
        hz_from_note(self.0)
    }

    pub fn transpose(&self, offset: i8) -> Self {
        Self(self.0.saturating_add_signed(offset))
    }
}

impl std::fmt::Display for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        let octave = (self.0 / 12) as i32 - 1;
        write!(f, "{}{}", NAMES[(self.0 % 12) as usize], octave)
    }
}

impl std::fmt::Debug for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Where a note event originated. At most one voice per (source, note) pair
/// is sustaining at a time; the note source guarantees deduplication.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum NoteSource {
    Midi,
    Virtual,
}
