use crate::instrument::{Operator, NUM_OPERATORS};
use std::f32::consts::TAU;

/// Fixed scalar controlling FM feedback intensity. Any visual preview of
/// the modulation graph must use the same constant.
pub const MOD_WEIGHT: f32 = 2.8;

/// The 4-operator feedback FM graph, evaluated one sample at a time.
///
/// Self-modulation feeds back the operator's own raw previous sample and is
/// deliberately asymmetric: a positive level adds `prev * w * level`, a
/// negative one adds `prev^2 * w * -level`, which produces a distinctly
/// different timbre. Cross-modulation uses the source's previous
/// gain-and-envelope-scaled output, after variations touched it.
pub struct OperatorNetwork {
    enabled: [bool; NUM_OPERATORS],
    omega: [f32; NUM_OPERATORS],
    gain: [f32; NUM_OPERATORS],
    output_level: [f32; NUM_OPERATORS],
    /// send[src][dst]: modulation level operator `src` sends to `dst`.
    send: [[f32; NUM_OPERATORS]; NUM_OPERATORS],
    phase: [f32; NUM_OPERATORS],
    raw: [f32; NUM_OPERATORS],
    post: [f32; NUM_OPERATORS],
}

impl OperatorNetwork {
    /// `frequency_hz` is the voice's note frequency with pitch bend already
    /// applied; each operator derives its own rate from its ratio/offset.
    pub fn new(operators: &[Operator; NUM_OPERATORS], frequency_hz: f32, sample_rate: f32) -> Self {
        let mut network = Self {
            enabled: [false; NUM_OPERATORS],
            omega: [0.0; NUM_OPERATORS],
            gain: [0.0; NUM_OPERATORS],
            output_level: [0.0; NUM_OPERATORS],
            send: [[0.0; NUM_OPERATORS]; NUM_OPERATORS],
            phase: [0.0; NUM_OPERATORS],
            raw: [0.0; NUM_OPERATORS],
            post: [0.0; NUM_OPERATORS],
        };
        for (i, op) in operators.iter().enumerate() {
            network.enabled[i] = op.enabled;
            network.omega[i] =
                TAU * (frequency_hz * op.frequency_ratio + op.frequency_offset_hz) / sample_rate;
            network.gain[i] = op.gain;
            network.output_level[i] = op.output_level;
            network.send[i] = [op.modulation.a, op.modulation.b, op.modulation.c, op.modulation.d];
        }
        network
    }

    /// Evaluates one sample given the current envelope gains. Disabled
    /// operators output zero and do not consume phase.
    pub fn tick(&mut self, env_gains: &[f32; NUM_OPERATORS]) {
        let mut raw_next = [0.0f32; NUM_OPERATORS];
        for i in 0..NUM_OPERATORS {
            if !self.enabled[i] {
                continue;
            }
            let mut modulation = 0.0;
            for j in 0..NUM_OPERATORS {
                if !self.enabled[j] {
                    continue;
                }
                let level = self.send[j][i];
                if level == 0.0 {
                    continue;
                }
                if j == i {
                    if level > 0.0 {
                        modulation += self.raw[i] * MOD_WEIGHT * level;
                    } else {
                        modulation += self.raw[i] * self.raw[i] * MOD_WEIGHT * -level;
                    }
                } else {
                    modulation += self.post[j] * MOD_WEIGHT * level;
                }
            }
            raw_next[i] = (self.phase[i] + modulation).sin();
            self.phase[i] += self.omega[i];
            if self.phase[i] >= TAU {
                self.phase[i] -= TAU;
            }
        }
        for i in 0..NUM_OPERATORS {
            self.raw[i] = raw_next[i];
            self.post[i] = if self.enabled[i] {
                raw_next[i] * self.gain[i] * env_gains[i]
            } else {
                0.0
            };
        }
    }

    /// The per-operator post-envelope signals for this sample, exposed so
    /// the variation mapper can rewrite them in place.
    pub fn posts_mut(&mut self) -> &mut [f32; NUM_OPERATORS] {
        &mut self.post
    }

    /// Sums the enabled operators into the voice sample.
    pub fn output(&self) -> f32 {
        let mut sum = 0.0;
        for i in 0..NUM_OPERATORS {
            if self.enabled[i] {
                sum += self.post[i] * self.output_level[i];
            }
        }
        sum
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instrument::Instrument;

    const SR: f32 = 48_000.0;

    fn single_carrier(frequency_hz: f32) -> OperatorNetwork {
        let instrument = Instrument::carrier("test");
        OperatorNetwork::new(&instrument.operators, frequency_hz, SR)
    }

    fn render(network: &mut OperatorNetwork, samples: usize) -> Vec<f32> {
        let gains = [1.0f32; NUM_OPERATORS];
        (0..samples)
            .map(|_| {
                network.tick(&gains);
                network.output()
            })
            .collect()
    }

    #[test]
    fn lone_operator_is_a_pure_sine() {
        let hz = 440.0;
        let mut network = single_carrier(hz);
        let out = render(&mut network, SR as usize / 10);
        for (i, sample) in out.iter().enumerate() {
            let expected = (TAU * hz * i as f32 / SR).sin();
            assert!((sample - expected).abs() < 1e-3, "sample {}", i);
        }
    }

    #[test]
    fn disabled_operators_stay_silent() {
        let mut instrument = Instrument::carrier("test");
        instrument.operators[0].enabled = false;
        let mut network = OperatorNetwork::new(&instrument.operators, 440.0, SR);
        assert!(render(&mut network, 512).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn cross_modulation_changes_the_spectrum() {
        let mut instrument = Instrument::carrier("test");
        instrument.operators[1].enabled = true;
        instrument.operators[1].frequency_ratio = 2.0;
        instrument.operators[1].modulation.a = 0.5;
        let mut plain = single_carrier(220.0);
        let mut modulated = OperatorNetwork::new(&instrument.operators, 220.0, SR);
        let a = render(&mut plain, 4096);
        let b = render(&mut modulated, 4096);
        let diff: f32 = a.iter().zip(&b).map(|(x, y)| (x - y).abs()).sum();
        assert!(diff > 1.0);
    }

    #[test]
    fn negative_feedback_squares_the_signal() {
        // Positive and negative self-modulation of the same magnitude must
        // produce different waveforms: negative feedback squares the
        // previous sample, which rectifies the modulation term and skews
        // the harmonic content.
        let mut pos = Instrument::carrier("pos");
        pos.operators[0].modulation.a = 0.5;
        let mut neg = Instrument::carrier("neg");
        neg.operators[0].modulation.a = -0.5;
        let mut pos = OperatorNetwork::new(&pos.operators, 220.0, SR);
        let mut neg = OperatorNetwork::new(&neg.operators, 220.0, SR);
        let a = render(&mut pos, 4096);
        let b = render(&mut neg, 4096);

        // The squared-feedback path never flips sign with the raw signal,
        // so its mean offset differs measurably.
        let mean = |v: &[f32]| v.iter().sum::<f32>() / v.len() as f32;
        let skew = (mean(&a) - mean(&b)).abs();
        let diff: f32 = a.iter().zip(&b).map(|(x, y)| (x - y).abs()).sum();
        assert!(diff > 1.0, "waveforms should diverge, diff = {}", diff);
        assert!(skew > 1e-4, "squared feedback should bias the mean, skew = {}", skew);
    }

    #[test]
    fn frequency_offset_shifts_the_rate() {
        let mut with_offset = Instrument::carrier("off");
        with_offset.operators[0].frequency_offset_hz = 10.0;
        let mut a = single_carrier(100.0);
        let mut b = OperatorNetwork::new(&with_offset.operators, 90.0, SR);
        // 90 Hz + 10 Hz offset matches a 100 Hz carrier exactly.
        let out_a = render(&mut a, 1024);
        let out_b = render(&mut b, 1024);
        for (x, y) in out_a.iter().zip(&out_b) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
