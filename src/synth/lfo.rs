use crate::instrument::{Lfo, LfoWave};
use std::f32::consts::{FRAC_PI_2, TAU};

/// Slope of the clip that turns the triangle into a soft-edged square.
const SQUARE_STEEPNESS: f32 = 10.0;

/// A single low-frequency oscillator with delay and attack shaping.
///
/// Output is a pure function of elapsed samples since note-down, so a
/// seeked voice computes exactly what a continuously-running one would.
/// All waveforms are normalized to [0, 1] and start from 0.
#[derive(Copy, Clone)]
pub struct LfoState {
    wave: LfoWave,
    delay_seconds: f32,
    attack_seconds: f32,
    frequency_hz: f32,
    inv_sample_rate: f32,
    elapsed: u64,
}

impl LfoState {
    pub fn new(lfo: &Lfo, sample_rate: f32, note_down: f64, now: f64) -> Self {
        let elapsed = ((now - note_down).max(0.0) * sample_rate as f64).round() as u64;
        Self {
            wave: lfo.wave,
            delay_seconds: lfo.delay_seconds.max(0.0),
            attack_seconds: lfo.attack_seconds.max(0.0),
            frequency_hz: lfo.frequency_hz,
            inv_sample_rate: sample_rate.recip(),
            elapsed,
        }
    }

    pub fn advance(&mut self, samples: u64) {
        self.elapsed += samples;
    }

    pub fn value(&self) -> f32 {
        let t = self.elapsed as f32 * self.inv_sample_rate;
        if t < self.delay_seconds {
            return 0.0;
        }
        let active = t - self.delay_seconds;
        let phase = (active * self.frequency_hz).fract();
        let raw = match self.wave {
            LfoWave::Sine => ((TAU * phase - FRAC_PI_2).sin() + 1.0) / 2.0,
            LfoWave::Triangle => triangle(phase),
            LfoWave::Square => {
                ((triangle(phase) - 0.5) * SQUARE_STEEPNESS + 0.5).clamp(0.0, 1.0)
            }
            // Fast rise over the first fifth of the cycle, slow fall after.
            LfoWave::Sawtooth => {
                if phase < 0.2 {
                    phase / 0.2
                } else {
                    1.0 - (phase - 0.2) / 0.8
                }
            }
        };
        if self.attack_seconds > 0.0 {
            raw * (active / self.attack_seconds).min(1.0)
        } else {
            raw
        }
    }
}

fn triangle(phase: f32) -> f32 {
    1.0 - (2.0 * phase - 1.0).abs()
}
