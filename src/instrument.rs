use thiserror::Error;

/// Number of FM operators per instrument.
pub const NUM_OPERATORS: usize = 4;
/// Number of breakpoints in an operator envelope.
pub const NUM_ENVELOPE_NODES: usize = 4;
/// Maximum number of variation slots per instrument.
pub const NUM_VARIATIONS: usize = 5;

/// One of the four FM operators, `a` through `d`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OpId {
    A,
    B,
    C,
    D,
}

impl OpId {
    pub const ALL: [OpId; NUM_OPERATORS] = [OpId::A, OpId::B, OpId::C, OpId::D];

    pub fn index(self) -> usize {
        match self {
            OpId::A => 0,
            OpId::B => 1,
            OpId::C => 2,
            OpId::D => 3,
        }
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpId::A => "a",
            OpId::B => "b",
            OpId::C => "c",
            OpId::D => "d",
        };
        write!(f, "{}", name)
    }
}

/// One breakpoint of an operator envelope. `seconds` is measured from
/// note-down and must be non-decreasing across the four nodes.
///
/// Node 0 is the delay-to-attack breakpoint, node 1 the start of decay,
/// node 2 the sustain level, node 3 the release end.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct EnvelopeNode {
    pub seconds: f32,
    pub level: f32,
}

/// Modulation levels one operator sends to each destination operator.
/// The diagonal entry (same operator) is self-feedback.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct ModLevels {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
}

impl ModLevels {
    pub fn get(&self, dest: OpId) -> f32 {
        match dest {
            OpId::A => self.a,
            OpId::B => self.b,
            OpId::C => self.c,
            OpId::D => self.d,
        }
    }

    pub fn set(&mut self, dest: OpId, level: f32) {
        match dest {
            OpId::A => self.a = level,
            OpId::B => self.b = level,
            OpId::C => self.c = level,
            OpId::D => self.d = level,
        }
    }
}

/// A single FM operator definition.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Operator {
    pub enabled: bool,
    pub gain: f32,
    /// Multiplier applied to the note frequency.
    pub frequency_ratio: f32,
    /// Constant frequency offset in Hz, added after the ratio.
    pub frequency_offset_hz: f32,
    /// Modulation this operator sends to each destination operator.
    pub modulation: ModLevels,
    /// Contribution of this operator to the voice output.
    pub output_level: f32,
    pub envelope: [EnvelopeNode; NUM_ENVELOPE_NODES],
}

impl Operator {
    /// A silent, disabled operator with a flat envelope.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            gain: 1.0,
            frequency_ratio: 1.0,
            frequency_offset_hz: 0.0,
            modulation: ModLevels::default(),
            output_level: 0.0,
            envelope: [
                EnvelopeNode { seconds: 0.0, level: 0.0 },
                EnvelopeNode { seconds: 0.0, level: 1.0 },
                EnvelopeNode { seconds: 0.0, level: 1.0 },
                EnvelopeNode { seconds: 0.3, level: 0.0 },
            ],
        }
    }
}

/// Signal read by a variation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VariationInput {
    /// The voice's MIDI note number.
    Note,
    /// The voice's note-down velocity (0-127).
    Velocity,
    /// The current LFO value.
    Lfo,
    /// The mod wheel position captured at voice creation.
    Mod,
}

/// Signal a variation multiplies its output onto.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VariationTarget {
    Lfo,
    Op(OpId),
}

/// A declarative remapping of one signal onto another.
///
/// The input range may be descending, which mirrors the ratio. Variations
/// are applied in list order, so later ones compose onto earlier results.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Variation {
    pub input: VariationInput,
    pub input_from: f32,
    pub input_to: f32,
    pub target: VariationTarget,
    pub output_from: f32,
    pub output_to: f32,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LfoWave {
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Lfo {
    pub wave: LfoWave,
    /// Seconds after note-down before the LFO starts moving.
    pub delay_seconds: f32,
    /// Seconds over which the LFO output ramps in after the delay.
    pub attack_seconds: f32,
    pub frequency_hz: f32,
}

/// A complete instrument definition.
///
/// Deep-immutable once captured into a voice snapshot; mutated only through
/// [`crate::patch::InstrumentPatch`] merges on the control-thread store.
#[derive(Clone, PartialEq, Debug)]
pub struct Instrument {
    pub name: String,
    pub operators: [Operator; NUM_OPERATORS],
    /// Ordered variation list; `None` entries are only allowed as a
    /// trailing gap. The render loop stops at the first `None`.
    pub variations: [Option<Variation>; NUM_VARIATIONS],
    pub lfo: Lfo,
}

#[derive(Debug, Error, PartialEq)]
pub enum InstrumentError {
    #[error("operator {op}: envelope node {node} goes backwards in time ({prev}s -> {next}s)")]
    EnvelopeOrder {
        op: OpId,
        node: usize,
        prev: f32,
        next: f32,
    },
    #[error("variation slot {0} is empty but slot {1} is not; gaps are only allowed at the end")]
    VariationGap(usize, usize),
}

impl Instrument {
    /// A minimal valid instrument: a single sine carrier on operator `a`.
    pub fn carrier(name: impl Into<String>) -> Self {
        let mut operators = [Operator::disabled(); NUM_OPERATORS];
        operators[0].enabled = true;
        operators[0].output_level = 1.0;
        Self {
            name: name.into(),
            operators,
            variations: [None; NUM_VARIATIONS],
            lfo: Lfo {
                wave: LfoWave::Sine,
                delay_seconds: 0.0,
                attack_seconds: 0.0,
                frequency_hz: 5.0,
            },
        }
    }

    /// Checks the structural invariants the renderer relies on.
    pub fn validate(&self) -> Result<(), InstrumentError> {
        for (op, id) in self.operators.iter().zip(OpId::ALL) {
            for node in 1..NUM_ENVELOPE_NODES {
                let prev = op.envelope[node - 1].seconds;
                let next = op.envelope[node].seconds;
                if next < prev {
                    return Err(InstrumentError::EnvelopeOrder { op: id, node, prev, next });
                }
            }
        }
        let mut first_gap = None;
        for (idx, slot) in self.variations.iter().enumerate() {
            match (slot, first_gap) {
                (None, None) => first_gap = Some(idx),
                (Some(_), Some(gap)) => return Err(InstrumentError::VariationGap(gap, idx)),
                _ => {}
            }
        }
        Ok(())
    }
}
