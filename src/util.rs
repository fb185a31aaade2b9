/// Converts a relative gain in dB to the corresponding voltage ratio/scaling factor.
pub fn scale_from_gain(gain: f32) -> f32 {
    10.0_f32.powf(gain / 20.0)
}

/// Converts a MIDI note value to a frequency in Hz.
pub fn hz_from_note(note: u8) -> f32 {
    440.0 * 2.0f32.powf((note as f32 - 69.0) / 12.0)
}

/// Converts a pitch wheel position in [-1, 1] to a frequency scalar, where
/// the extremes bend by `max_semitones` in either direction.
pub fn bend_ratio(wheel: f32, max_semitones: f32) -> f32 {
    2.0f32.powf(wheel.clamp(-1.0, 1.0) * max_semitones / 12.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scale_from_gain() {
        assert_eq!(scale_from_gain(0.0), 1.0);
        assert_relative_eq!(scale_from_gain(20.0), 10.0, max_relative = 1e-6);
        assert_relative_eq!(scale_from_gain(-20.0), 0.1, max_relative = 1e-6);
    }

    #[test]
    fn test_hz_from_note() {
        assert_eq!(hz_from_note(69), 440.0);
        assert_eq!(hz_from_note(69 + 12), 880.0);
        assert_eq!(hz_from_note(69 - 12), 220.0);
    }

    #[test]
    fn test_bend_ratio() {
        assert_eq!(bend_ratio(0.0, 2.0), 1.0);
        assert_relative_eq!(bend_ratio(1.0, 12.0), 2.0, max_relative = 1e-6);
        assert_relative_eq!(bend_ratio(-1.0, 12.0), 0.5, max_relative = 1e-6);
        // Out-of-range wheel positions clamp rather than overshooting.
        assert_eq!(bend_ratio(3.0, 12.0), bend_ratio(1.0, 12.0));
    }
}
