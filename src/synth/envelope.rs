use crate::instrument::{EnvelopeNode, NUM_ENVELOPE_NODES};

/// Time constant of the output damper. Level may change by at most
/// `1 / (sample_rate * DAMP_SECONDS)` per sample, which removes the clicks a
/// breakpoint jump would otherwise produce.
const DAMP_SECONDS: f32 = 0.03;

/// Tolerance below which the damped level counts as settled on its target.
const SETTLE_EPSILON: f32 = 1e-4;

/// Tolerance for the degenerate release-ramp cases.
const LEVEL_EPSILON: f32 = 1e-6;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EnvStage {
    Delay,
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// A linear ramp over a whole number of samples.
///
/// Level is always recomputed from integer progress, so advancing by `n`
/// samples in any number of steps lands on exactly the same level.
#[derive(Copy, Clone, Debug)]
struct Segment {
    total: u64,
    done: u64,
    from: f32,
    to: f32,
}

impl Segment {
    fn hold(level: f32) -> Self {
        Self { total: 0, done: 0, from: level, to: level }
    }

    fn level(&self) -> f32 {
        if self.total == 0 {
            self.to
        } else {
            self.from + (self.to - self.from) * (self.done as f32 / self.total as f32)
        }
    }

    fn remaining(&self) -> u64 {
        self.total - self.done
    }
}

/// Per-operator 4-breakpoint delay/attack/decay/sustain/release envelope.
///
/// Construction seeks: given a `now` past `note_down` the envelope jumps
/// directly to the state and level it would have reached had it been running
/// the whole time, including release logic if `note_up` already passed. This
/// is what lets a crossfade replacement voice pick up mid-note.
#[derive(Copy, Clone)]
pub struct Envelope {
    sample_rate: f32,
    nodes: [EnvelopeNode; NUM_ENVELOPE_NODES],
    stage: EnvStage,
    seg: Segment,
    /// Damped level chasing `level()` at the damper slope.
    damped: f32,
    damp_step: f32,
}

impl Envelope {
    pub fn new(
        nodes: [EnvelopeNode; NUM_ENVELOPE_NODES],
        enabled: bool,
        sample_rate: f32,
        note_down: f64,
        note_up: Option<f64>,
        now: f64,
    ) -> Self {
        let damp_step = 1.0 / (sample_rate * DAMP_SECONDS);
        if !enabled {
            // Disabled operators never sound; construct fully settled so the
            // voice-end check doesn't wait on them.
            let rest = nodes[NUM_ENVELOPE_NODES - 1].level;
            return Self {
                sample_rate,
                nodes,
                stage: EnvStage::Finished,
                seg: Segment::hold(rest),
                damped: rest,
                damp_step,
            };
        }

        let mut env = Self {
            sample_rate,
            nodes,
            stage: EnvStage::Delay,
            seg: Segment {
                total: secs_to_samples(nodes[0].seconds, sample_rate),
                done: 0,
                from: 0.0,
                to: 0.0,
            },
            damped: 0.0,
            damp_step,
        };
        env.normalize();

        let elapsed = secs_to_samples((now - note_down).max(0.0) as f32, sample_rate);
        match note_up {
            Some(up) if up <= now => {
                let held = secs_to_samples((up - note_down).max(0.0) as f32, sample_rate);
                let held = held.min(elapsed);
                env.advance_by(held);
                env.release();
                env.advance_by(elapsed - held);
            }
            _ => env.advance_by(elapsed),
        }
        env
    }

    pub fn stage(&self) -> EnvStage {
        self.stage
    }

    /// The undamped envelope level.
    pub fn level(&self) -> f32 {
        self.seg.level()
    }

    /// Perceptually-linear gain derived from the damped level.
    pub fn gain(&self) -> f32 {
        0.5f32.powf((1.0 - self.damped) * 10.0)
    }

    pub fn finished(&self) -> bool {
        self.stage == EnvStage::Finished
    }

    /// True once the stage machine is done *and* the damper has caught up.
    pub fn settled(&self) -> bool {
        self.finished() && (self.damped - self.level()).abs() <= SETTLE_EPSILON
    }

    /// Steps the envelope forward by `n` whole samples, crossing as many
    /// stage boundaries as the span covers.
    pub fn advance_by(&mut self, n: u64) {
        let mut n = n;
        while n > 0 {
            match self.stage {
                EnvStage::Delay | EnvStage::Attack | EnvStage::Decay | EnvStage::Release => {
                    let take = n.min(self.seg.remaining());
                    self.seg.done += take;
                    self.chase(take);
                    n -= take;
                    self.normalize();
                }
                EnvStage::Sustain | EnvStage::Finished => {
                    self.chase(n);
                    n = 0;
                }
            }
        }
    }

    /// Starts the release ramp from the current position. Idempotent once
    /// releasing or finished.
    pub fn release(&mut self) {
        if matches!(self.stage, EnvStage::Release | EnvStage::Finished) {
            return;
        }
        let level = self.level();
        let sustain = self.nodes[2].level;
        let end = self.nodes[3].level;
        let duration = secs_to_samples(self.nodes[3].seconds - self.nodes[2].seconds, self.sample_rate);

        self.stage = EnvStage::Release;
        if duration == 0 {
            self.seg = Segment::hold(end);
            self.normalize();
            return;
        }

        let nominal = end - sustain;
        if nominal > 0.0 {
            // Upward release: jump to the nominal start level and run the
            // nominal ramp from there.
            self.seg = Segment { total: duration, done: 0, from: sustain, to: end };
        } else if level >= sustain || nominal.abs() < LEVEL_EPSILON {
            // At or above sustain (or a flat nominal ramp, which covers the
            // 0/0 case): reshape the slope so the nominal duration holds.
            self.seg = Segment { total: duration, done: 0, from: level, to: end };
        } else {
            // Below sustain: keep the nominal per-sample rate, giving a
            // proportionally shorter ramp. `ratio` is in [0, 1) here, so no
            // division blows up.
            let ratio = (level - end) / (sustain - end);
            let total = (duration as f64 * ratio as f64).round() as u64;
            self.seg = Segment { total, done: 0, from: level, to: end };
        }
        self.normalize();
    }

    /// Moves through any zero-length segments so the stage always reflects
    /// where the level actually is.
    fn normalize(&mut self) {
        loop {
            match self.stage {
                EnvStage::Delay | EnvStage::Attack | EnvStage::Decay | EnvStage::Release
                    if self.seg.remaining() == 0 =>
                {
                    self.enter_next_stage()
                }
                _ => break,
            }
        }
    }

    fn enter_next_stage(&mut self) {
        let [n0, n1, n2, n3] = self.nodes;
        match self.stage {
            EnvStage::Delay => {
                self.stage = EnvStage::Attack;
                self.seg = Segment {
                    total: secs_to_samples(n1.seconds - n0.seconds, self.sample_rate),
                    done: 0,
                    from: n0.level,
                    to: n1.level,
                };
            }
            EnvStage::Attack => {
                self.stage = EnvStage::Decay;
                self.seg = Segment {
                    total: secs_to_samples(n2.seconds - n1.seconds, self.sample_rate),
                    done: 0,
                    from: n1.level,
                    to: n2.level,
                };
            }
            EnvStage::Decay => {
                self.stage = EnvStage::Sustain;
                self.seg = Segment::hold(n2.level);
            }
            EnvStage::Release => {
                self.stage = EnvStage::Finished;
                self.seg = Segment::hold(n3.level);
            }
            EnvStage::Sustain | EnvStage::Finished => {
                unreachable!("hold stages have no successor")
            }
        }
    }

    /// Chases the damped level toward the current target over `n` samples.
    fn chase(&mut self, n: u64) {
        let target = self.level();
        let max = self.damp_step * n as f32;
        self.damped += (target - self.damped).clamp(-max, max);
    }
}

fn secs_to_samples(seconds: f32, sample_rate: f32) -> u64 {
    (seconds.max(0.0) as f64 * sample_rate as f64).round() as u64
}
