//! Pitch name parsing

/// MIDI note used when a pitch name is missing or unparseable (C4)
pub const REFERENCE_NOTE: u8 = 60;

fn semitone_of(name: &str) -> Option<i32> {
    let semitone = match name {
        "C" => 0,
        "C#" => 1,
        "D" => 2,
        "D#" => 3,
        "E" => 4,
        "F" => 5,
        "F#" => 6,
        "G" => 7,
        "G#" => 8,
        "A" => 9,
        "A#" => 10,
        "B" => 11,
        _ => return None,
    };
    Some(semitone)
}

/// Parse "C4" / "F#2" into a MIDI note number, octave relative to C4 = 60.
///
/// The octave is the final character. Anything that does not parse maps to
/// [`REFERENCE_NOTE`]; the result is folded into the 7-bit MIDI range.
pub fn note_to_midi(note: Option<&str>) -> u8 {
    let Some(note) = note.filter(|n| n.is_ascii() && n.len() >= 2) else {
        return REFERENCE_NOTE;
    };
    let (name, octave) = note.split_at(note.len() - 1);
    let (Some(semitone), Some(octave)) = (semitone_of(name), octave.parse::<i32>().ok()) else {
        return REFERENCE_NOTE;
    };
    let number = REFERENCE_NOTE as i32 + semitone + (octave - 4) * 12;
    (number & 0x7F) as u8
}

/// Equal-tempered frequency of a MIDI note (A4 = 440 Hz)
pub fn midi_to_hz(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}
