use super::envelope::Envelope;
use super::lfo::LfoState;
use super::operators::OperatorNetwork;
use super::variation::{apply_variations, VariationInputs};
use crate::instrument::{Instrument, Variation, NUM_OPERATORS, NUM_VARIATIONS};
use crate::note::Note;
use crate::util::bend_ratio;

/// Per-voice amplitude ceiling, -15 dBFS of headroom before the shared
/// output stage: 0.5^5.
pub const FADE_CEILING: f32 = 0.031_25;

/// A fade in or out completes within this many seconds.
const FADE_SECONDS: f32 = 0.030;

/// Pitch wheel range in semitones either side of the note.
const BEND_SEMITONES: f32 = 2.0;

/// Wall-clock lag past which a block is skipped to let the queue drain.
const CATCH_UP_LAG: f64 = 0.10;

/// Wall-clock lag past which the voice is terminated outright.
const FATAL_LAG: f64 = 0.50;

/// Expected interval between control-thread liveness pings, in seconds.
pub const PING_INTERVAL: f64 = 0.5;

/// A ping interval that produced fewer than `expected / PING_STARVED_DIV`
/// samples counts as a starvation strike; two strikes terminate the voice.
const PING_STARVED_DIV: u64 = 8;
const PING_STRIKES: u32 = 2;

/// Which overload defense owns the termination decision for a voice.
///
/// Both address the same failure (the render thread falling behind). Wall
/// clock lag is the canonical choice: it needs no cooperating thread, so it
/// still fires when the control thread is the one that stalled. The ping
/// watchdog instead trusts the control thread's clock and reacts faster to
/// a starved audio thread.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum OverloadStrategy {
    #[default]
    WallClock,
    PingWatchdog,
}

/// Everything needed to build a voice renderer. Times are absolute engine
/// seconds; `now` may be well past `note_down`, in which case the voice
/// seeks to where it would have been (crossfade recreation relies on this).
pub struct VoiceParams<'a> {
    pub snapshot: &'a Instrument,
    pub note: Note,
    pub velocity: u8,
    pub pitch_wheel: f32,
    pub mod_wheel: f32,
    pub note_down: f64,
    pub note_up: Option<f64>,
    /// Earliest time the fade-in may begin. May be in the future; the voice
    /// produces no audio before it.
    pub fade_in: f64,
    pub now: f64,
    pub sample_rate: f32,
    pub strategy: OverloadStrategy,
}

/// Real-time-domain object rendering one voice. After construction all of
/// its state is written exclusively by the render thread; the control
/// thread reaches it only through timestamped messages.
pub struct VoiceRenderer {
    sample_rate: f32,
    network: OperatorNetwork,
    envelopes: [Envelope; NUM_OPERATORS],
    lfo: LfoState,
    variations: [Option<Variation>; NUM_VARIATIONS],
    inputs: VariationInputs,

    fade_gain: f32,
    fade_step: f32,
    fade_in_time: f64,
    force_stop_time: Option<f64>,
    pending_release: Option<f64>,

    strategy: OverloadStrategy,
    first_render: Option<f64>,
    samples_rendered: u64,
    samples_since_ping: u64,
    ping_strikes: u32,

    ended: bool,
}

impl VoiceRenderer {
    /// Panics if the snapshot is malformed; the instrument store validates
    /// everything it hands out, so hitting this is a programmer error.
    pub fn new(params: VoiceParams) -> Self {
        let VoiceParams {
            snapshot,
            note,
            velocity,
            pitch_wheel,
            mod_wheel,
            note_down,
            note_up,
            fade_in,
            now,
            sample_rate,
            strategy,
        } = params;
        if let Err(err) = snapshot.validate() {
            panic!("malformed instrument snapshot: {}", err);
        }

        let frequency_hz = note.frequency() * bend_ratio(pitch_wheel, BEND_SEMITONES);
        let envelopes = std::array::from_fn(|i| {
            let op = &snapshot.operators[i];
            Envelope::new(op.envelope, op.enabled, sample_rate, note_down, note_up, now)
        });

        Self {
            sample_rate,
            network: OperatorNetwork::new(&snapshot.operators, frequency_hz, sample_rate),
            envelopes,
            lfo: LfoState::new(&snapshot.lfo, sample_rate, note_down, now),
            variations: snapshot.variations,
            inputs: VariationInputs {
                note: note.0 as f32,
                velocity: velocity as f32,
                mod_wheel,
            },
            fade_gain: 0.0,
            fade_step: FADE_CEILING / (FADE_SECONDS * sample_rate),
            fade_in_time: fade_in,
            force_stop_time: None,
            pending_release: note_up.filter(|up| *up > now),
            strategy,
            first_render: None,
            samples_rendered: 0,
            samples_since_ping: 0,
            ping_strikes: 0,
            ended: false,
        }
    }

    /// Schedules the release ramp. Timestamps, not arrival order, decide
    /// when it takes effect.
    pub fn release(&mut self, at: f64) {
        if self.pending_release.is_none() {
            self.pending_release = Some(at);
        }
    }

    /// Schedules the fade-out; the voice ends once its gain reaches zero.
    pub fn force_stop(&mut self, at: f64) {
        self.force_stop_time = Some(match self.force_stop_time {
            Some(existing) => existing.min(at),
            None => at,
        });
    }

    /// Control-thread liveness ping. Under the watchdog strategy, two
    /// consecutive intervals with almost no samples produced mean the audio
    /// thread is starved and the voice terminates.
    pub fn ping(&mut self) {
        let expected = (PING_INTERVAL * self.sample_rate as f64) as u64;
        if self.samples_since_ping < expected / PING_STARVED_DIV {
            self.ping_strikes += 1;
        } else {
            self.ping_strikes = 0;
        }
        self.samples_since_ping = 0;
        if self.strategy == OverloadStrategy::PingWatchdog && self.ping_strikes >= PING_STRIKES {
            self.ended = true;
        }
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Renders one block, accumulating into `out`. Returns `false` once the
    /// voice has ended and will never sound again.
    pub fn render(&mut self, out: &mut [f32], now: f64) -> bool {
        if self.ended {
            return false;
        }
        let n = out.len();
        let first = *self.first_render.get_or_insert(now);

        // Wall-clock overload defense: real minus simulated elapsed time.
        let mut skip = false;
        if self.strategy == OverloadStrategy::WallClock {
            let lag = (now - first) - self.samples_rendered as f64 / self.sample_rate as f64;
            if lag > FATAL_LAG {
                self.ended = true;
                return false;
            }
            skip = lag > CATCH_UP_LAG;
        }

        let block_end = now + n as f64 / self.sample_rate as f64;
        if let Some(at) = self.pending_release {
            if at <= block_end {
                for env in &mut self.envelopes {
                    env.release();
                }
                self.pending_release = None;
            }
        }

        // Advance control-rate state analytically across the block, then
        // interpolate per sample. Only the operator network itself runs at
        // full resolution.
        let mut gain_from = [0.0f32; NUM_OPERATORS];
        let mut gain_to = [0.0f32; NUM_OPERATORS];
        for (i, env) in self.envelopes.iter_mut().enumerate() {
            gain_from[i] = env.gain();
            env.advance_by(n as u64);
            gain_to[i] = env.gain();
        }
        let lfo_from = self.lfo.value();
        self.lfo.advance(n as u64);
        let lfo_to = self.lfo.value();
        self.samples_rendered += n as u64;
        self.samples_since_ping += n as u64;

        if skip {
            // Leave the block untouched so the queue can drain, but keep
            // the fade moving so a stopping voice can still end.
            self.step_fade_bulk(now, block_end, n);
        } else {
            let inv_n = 1.0 / n as f32;
            let inv_sr = 1.0 / self.sample_rate as f64;
            let mut gains = [0.0f32; NUM_OPERATORS];
            for (i, slot) in out.iter_mut().enumerate() {
                let t = (i + 1) as f32 * inv_n;
                for k in 0..NUM_OPERATORS {
                    gains[k] = gain_from[k] + (gain_to[k] - gain_from[k]) * t;
                }
                let mut lfo = lfo_from + (lfo_to - lfo_from) * t;

                self.step_fade(now + i as f64 * inv_sr);

                self.network.tick(&gains);
                apply_variations(
                    &self.variations,
                    &self.inputs,
                    &mut lfo,
                    self.network.posts_mut(),
                );
                *slot += self.network.output() * self.fade_gain;
            }
        }

        if self.force_stop_time.map_or(false, |at| block_end >= at) && self.fade_gain <= 0.0 {
            self.ended = true;
        }
        if self.envelopes.iter().all(|env| env.settled()) {
            self.ended = true;
        }
        !self.ended
    }

    fn step_fade(&mut self, time: f64) {
        match self.force_stop_time {
            Some(stop) if time >= stop => {
                self.fade_gain = (self.fade_gain - self.fade_step).max(0.0);
            }
            _ if time >= self.fade_in_time => {
                self.fade_gain = (self.fade_gain + self.fade_step).min(FADE_CEILING);
            }
            _ => {}
        }
    }

    fn step_fade_bulk(&mut self, start: f64, end: f64, n: usize) {
        let step = self.fade_step * n as f32;
        match self.force_stop_time {
            Some(stop) if start >= stop => {
                self.fade_gain = (self.fade_gain - step).max(0.0);
            }
            Some(stop) if end >= stop => {
                // Stop lands mid-block; close enough to start the ramp.
                self.fade_gain = (self.fade_gain - step).max(0.0);
            }
            _ if start >= self.fade_in_time => {
                self.fade_gain = (self.fade_gain + step).min(FADE_CEILING);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instrument::{Instrument, OpId, Variation, VariationInput, VariationTarget};

    const SR: f32 = 48_000.0;
    const BLOCK: usize = 128;

    fn params(snapshot: &Instrument) -> VoiceParams<'_> {
        VoiceParams {
            snapshot,
            note: Note(69),
            velocity: 100,
            pitch_wheel: 0.0,
            mod_wheel: 0.0,
            note_down: 0.0,
            note_up: None,
            fade_in: 0.0,
            now: 0.0,
            sample_rate: SR,
            strategy: OverloadStrategy::WallClock,
        }
    }

    /// Renders consecutive blocks with a healthy (real-time) clock and
    /// returns the rendered samples.
    fn run(voice: &mut VoiceRenderer, start: f64, blocks: usize) -> Vec<f32> {
        let mut all = Vec::new();
        let mut now = start;
        for _ in 0..blocks {
            let mut block = [0.0f32; BLOCK];
            voice.render(&mut block, now);
            all.extend_from_slice(&block);
            now += BLOCK as f64 / SR as f64;
        }
        all
    }

    #[test]
    fn carrier_reaches_the_fade_ceiling() {
        let snapshot = Instrument::carrier("sine");
        let mut voice = VoiceRenderer::new(params(&snapshot));
        // 0.5s is far past both the 30ms fade and the 30ms damper.
        let out = run(&mut voice, 0.0, (0.5 * SR as f32) as usize / BLOCK);
        let tail = &out[out.len() - 512..];
        let peak = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(
            (peak - FADE_CEILING).abs() < 0.002,
            "peak {} vs ceiling {}",
            peak,
            FADE_CEILING
        );
    }

    #[test]
    fn carrier_frequency_tracks_the_note() {
        let snapshot = Instrument::carrier("sine");
        let mut voice = VoiceRenderer::new(params(&snapshot));
        let out = run(&mut voice, 0.0, 400);
        // Count zero crossings over the last half of the output.
        let tail = &out[out.len() / 2..];
        let crossings = tail
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        let seconds = tail.len() as f32 / SR;
        let hz = crossings as f32 / 2.0 / seconds;
        assert!((hz - 440.0).abs() < 5.0, "measured {} Hz", hz);
    }

    #[test]
    fn no_audio_before_a_future_fade_in() {
        let snapshot = Instrument::carrier("sine");
        let mut p = params(&snapshot);
        p.fade_in = 0.2;
        let mut voice = VoiceRenderer::new(p);
        let out = run(&mut voice, 0.0, (0.15 * SR as f32) as usize / BLOCK);
        assert!(out.iter().all(|s| *s == 0.0));
        // And audio does arrive once the fade-in time passes.
        let out = run(&mut voice, 0.16, (0.2 * SR as f32) as usize / BLOCK);
        assert!(out.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn force_stop_fades_out_and_ends() {
        let snapshot = Instrument::carrier("sine");
        let mut voice = VoiceRenderer::new(params(&snapshot));
        run(&mut voice, 0.0, 100);
        voice.force_stop(100.0 * BLOCK as f64 / SR as f64);
        // 0.1s of rendering comfortably covers the 30ms fade-out.
        let mut now = 100.0 * BLOCK as f64 / SR as f64;
        let mut alive = true;
        for _ in 0..((0.1 * SR as f32) as usize / BLOCK) {
            let mut block = [0.0f32; BLOCK];
            alive = voice.render(&mut block, now);
            now += BLOCK as f64 / SR as f64;
        }
        assert!(!alive);
        assert!(voice.ended());
    }

    #[test]
    fn released_voice_ends_naturally() {
        let snapshot = Instrument::carrier("sine");
        let mut voice = VoiceRenderer::new(params(&snapshot));
        run(&mut voice, 0.0, 40);
        voice.release(40.0 * BLOCK as f64 / SR as f64);
        // Default release is 0.3s; allow for damper settling on top.
        let mut alive = true;
        let mut now = 40.0 * BLOCK as f64 / SR as f64;
        for _ in 0..((0.6 * SR as f32) as usize / BLOCK) {
            let mut block = [0.0f32; BLOCK];
            alive = voice.render(&mut block, now);
            if !alive {
                break;
            }
            now += BLOCK as f64 / SR as f64;
        }
        assert!(!alive, "voice should end after its release tail");
    }

    #[test]
    fn release_precedes_force_stop() {
        // A release followed by a force stop must not resurrect the voice.
        let snapshot = Instrument::carrier("sine");
        let mut voice = VoiceRenderer::new(params(&snapshot));
        run(&mut voice, 0.0, 10);
        let now = 10.0 * BLOCK as f64 / SR as f64;
        voice.release(now);
        voice.force_stop(now + 0.005);
        let mut alive = true;
        let mut t = now;
        for _ in 0..((0.2 * SR as f32) as usize / BLOCK) {
            let mut block = [0.0f32; BLOCK];
            alive = voice.render(&mut block, t);
            if !alive {
                break;
            }
            t += BLOCK as f64 / SR as f64;
        }
        assert!(!alive);
    }

    #[test]
    fn wall_clock_lag_skips_then_kills() {
        let snapshot = Instrument::carrier("sine");
        let mut voice = VoiceRenderer::new(params(&snapshot));
        // Healthy rendering to establish the baseline, past fade-in.
        run(&mut voice, 0.0, 100);
        let healthy_end = 100.0 * BLOCK as f64 / SR as f64;

        // Moderate lag: block is skipped (left silent) but voice survives.
        let mut block = [0.0f32; BLOCK];
        assert!(voice.render(&mut block, healthy_end + 0.2));
        assert!(block.iter().all(|s| *s == 0.0));

        // Fatal lag: voice terminates.
        let mut block = [0.0f32; BLOCK];
        assert!(!voice.render(&mut block, healthy_end + 1.0));
        assert!(voice.ended());
    }

    #[test]
    fn watchdog_kills_after_two_starved_pings() {
        let snapshot = Instrument::carrier("sine");
        let mut p = params(&snapshot);
        p.strategy = OverloadStrategy::PingWatchdog;
        let mut voice = VoiceRenderer::new(p);

        // A healthy interval produces ~PING_INTERVAL worth of samples.
        run(&mut voice, 0.0, (PING_INTERVAL * SR as f64) as usize / BLOCK);
        voice.ping();
        assert!(!voice.ended());

        // Two starved intervals: almost nothing rendered between pings.
        let mut block = [0.0f32; BLOCK];
        voice.render(&mut block, 1.0);
        voice.ping();
        assert!(!voice.ended(), "one strike is not enough");
        voice.render(&mut block, 1.5);
        voice.ping();
        assert!(voice.ended());
    }

    #[test]
    fn wall_clock_lag_is_ignored_under_the_watchdog() {
        let snapshot = Instrument::carrier("sine");
        let mut p = params(&snapshot);
        p.strategy = OverloadStrategy::PingWatchdog;
        let mut voice = VoiceRenderer::new(p);
        run(&mut voice, 0.0, 10);
        let mut block = [0.0f32; BLOCK];
        // A lag that would be fatal under WallClock.
        assert!(voice.render(&mut block, 5.0));
    }

    #[test]
    fn lfo_variation_modulates_amplitude() {
        let mut snapshot = Instrument::carrier("trem");
        snapshot.lfo.frequency_hz = 8.0;
        snapshot.variations[0] = Some(Variation {
            input: VariationInput::Lfo,
            input_from: 0.0,
            input_to: 1.0,
            target: VariationTarget::Op(OpId::A),
            output_from: 1.0,
            output_to: 0.0,
        });
        let mut voice = VoiceRenderer::new(params(&snapshot));
        let out = run(&mut voice, 0.0, 400);
        // Tremolo: the envelope of the last half swings widely.
        let tail = &out[out.len() / 2..];
        let window = (SR / 100.0) as usize;
        let mut peaks: Vec<f32> = tail
            .chunks(window)
            .map(|c| c.iter().fold(0.0f32, |m, s| m.max(s.abs())))
            .collect();
        peaks.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!(peaks[peaks.len() - 1] > 2.0 * peaks[0].max(1e-4));
    }

    #[test]
    fn recreated_voice_picks_up_the_envelope_mid_note() {
        // A voice created 0.5s after its note-down seeks the envelope
        // rather than re-running the attack.
        let mut snapshot = Instrument::carrier("seek");
        snapshot.operators[0].envelope = [
            crate::instrument::EnvelopeNode { seconds: 0.0, level: 0.0 },
            crate::instrument::EnvelopeNode { seconds: 0.01, level: 1.0 },
            crate::instrument::EnvelopeNode { seconds: 0.3, level: 0.2 },
            crate::instrument::EnvelopeNode { seconds: 0.8, level: 0.0 },
        ];
        let mut p = params(&snapshot);
        p.now = 0.5;
        p.fade_in = 0.5;
        let mut voice = VoiceRenderer::new(p);
        let out = run(&mut voice, 0.5, (0.3 * SR as f32) as usize / BLOCK);
        let tail = &out[out.len() - 512..];
        let peak = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        // At the 0.2 sustain level the exponential gain is 0.5^8, a far cry
        // from the ceiling a re-attacked voice would reach.
        let expected = FADE_CEILING * 0.5f32.powf(8.0);
        assert!(
            peak > 0.4 * expected && peak < 4.0 * expected,
            "peak {} vs expected {}",
            peak,
            expected
        );
    }
}
