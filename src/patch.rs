//! Per-field optional overrides for the instrument model.
//!
//! A patch mirrors the instrument shape with every leaf wrapped in `Option`,
//! so the type system rules out structural mismatches: there is no way to
//! express an extra operator, a fifth envelope node or a renamed field. The
//! one structural error left to runtime is patching a variation slot the
//! instrument doesn't have.

use crate::instrument::{
    EnvelopeNode, Instrument, InstrumentError, Lfo, LfoWave, ModLevels, Operator, Variation,
    VariationInput, VariationTarget, NUM_ENVELOPE_NODES, NUM_OPERATORS, NUM_VARIATIONS,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PatchError {
    #[error("variation slot {0} is empty; a patch may not add elements")]
    EmptyVariationSlot(usize),
    #[error(transparent)]
    Invalid(#[from] InstrumentError),
}

#[derive(Clone, Debug, Default)]
pub struct InstrumentPatch {
    pub name: Option<String>,
    pub operators: [OperatorPatch; NUM_OPERATORS],
    pub variations: [Option<VariationPatch>; NUM_VARIATIONS],
    pub lfo: LfoPatch,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct OperatorPatch {
    pub enabled: Option<bool>,
    pub gain: Option<f32>,
    pub frequency_ratio: Option<f32>,
    pub frequency_offset_hz: Option<f32>,
    pub modulation: ModLevelsPatch,
    pub output_level: Option<f32>,
    pub envelope: [EnvelopeNodePatch; NUM_ENVELOPE_NODES],
}

#[derive(Copy, Clone, Debug, Default)]
pub struct ModLevelsPatch {
    pub a: Option<f32>,
    pub b: Option<f32>,
    pub c: Option<f32>,
    pub d: Option<f32>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct EnvelopeNodePatch {
    pub seconds: Option<f32>,
    pub level: Option<f32>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct VariationPatch {
    pub input: Option<VariationInput>,
    pub input_from: Option<f32>,
    pub input_to: Option<f32>,
    pub target: Option<VariationTarget>,
    pub output_from: Option<f32>,
    pub output_to: Option<f32>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct LfoPatch {
    pub wave: Option<LfoWave>,
    pub delay_seconds: Option<f32>,
    pub attack_seconds: Option<f32>,
    pub frequency_hz: Option<f32>,
}

impl InstrumentPatch {
    /// Applies the patch to `instrument`, overwriting only the fields that
    /// are present. Returns `true` if anything actually changed. On error
    /// the instrument is left untouched.
    pub fn apply(&self, instrument: &mut Instrument) -> Result<bool, PatchError> {
        let mut merged = instrument.clone();
        let mut changed = false;

        if let Some(name) = &self.name {
            set(&mut merged.name, name.clone(), &mut changed);
        }
        for (op, patch) in merged.operators.iter_mut().zip(&self.operators) {
            patch.apply(op, &mut changed);
        }
        for (idx, patch) in self.variations.iter().enumerate() {
            let Some(patch) = patch else { continue };
            match &mut merged.variations[idx] {
                Some(variation) => patch.apply(variation, &mut changed),
                None => return Err(PatchError::EmptyVariationSlot(idx)),
            }
        }
        self.lfo.apply(&mut merged.lfo, &mut changed);

        merged.validate()?;
        *instrument = merged;
        Ok(changed)
    }
}

impl OperatorPatch {
    fn apply(&self, op: &mut Operator, changed: &mut bool) {
        if let Some(v) = self.enabled {
            set(&mut op.enabled, v, changed);
        }
        if let Some(v) = self.gain {
            set(&mut op.gain, v, changed);
        }
        if let Some(v) = self.frequency_ratio {
            set(&mut op.frequency_ratio, v, changed);
        }
        if let Some(v) = self.frequency_offset_hz {
            set(&mut op.frequency_offset_hz, v, changed);
        }
        self.modulation.apply(&mut op.modulation, changed);
        if let Some(v) = self.output_level {
            set(&mut op.output_level, v, changed);
        }
        for (node, patch) in op.envelope.iter_mut().zip(&self.envelope) {
            patch.apply(node, changed);
        }
    }
}

impl ModLevelsPatch {
    fn apply(&self, levels: &mut ModLevels, changed: &mut bool) {
        if let Some(v) = self.a {
            set(&mut levels.a, v, changed);
        }
        if let Some(v) = self.b {
            set(&mut levels.b, v, changed);
        }
        if let Some(v) = self.c {
            set(&mut levels.c, v, changed);
        }
        if let Some(v) = self.d {
            set(&mut levels.d, v, changed);
        }
    }
}

impl EnvelopeNodePatch {
    fn apply(&self, node: &mut EnvelopeNode, changed: &mut bool) {
        if let Some(v) = self.seconds {
            set(&mut node.seconds, v, changed);
        }
        if let Some(v) = self.level {
            set(&mut node.level, v, changed);
        }
    }
}

impl VariationPatch {
    fn apply(&self, variation: &mut Variation, changed: &mut bool) {
        if let Some(v) = self.input {
            set(&mut variation.input, v, changed);
        }
        if let Some(v) = self.input_from {
            set(&mut variation.input_from, v, changed);
        }
        if let Some(v) = self.input_to {
            set(&mut variation.input_to, v, changed);
        }
        if let Some(v) = self.target {
            set(&mut variation.target, v, changed);
        }
        if let Some(v) = self.output_from {
            set(&mut variation.output_from, v, changed);
        }
        if let Some(v) = self.output_to {
            set(&mut variation.output_to, v, changed);
        }
    }
}

impl LfoPatch {
    fn apply(&self, lfo: &mut Lfo, changed: &mut bool) {
        if let Some(v) = self.wave {
            set(&mut lfo.wave, v, changed);
        }
        if let Some(v) = self.delay_seconds {
            set(&mut lfo.delay_seconds, v, changed);
        }
        if let Some(v) = self.attack_seconds {
            set(&mut lfo.attack_seconds, v, changed);
        }
        if let Some(v) = self.frequency_hz {
            set(&mut lfo.frequency_hz, v, changed);
        }
    }
}

fn set<T: PartialEq>(slot: &mut T, value: T, changed: &mut bool) {
    if *slot != value {
        *slot = value;
        *changed = true;
    }
}
