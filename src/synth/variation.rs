use crate::instrument::{Variation, VariationInput, VariationTarget, NUM_OPERATORS};

/// Per-voice inputs the variation mapper can read. Note, velocity and mod
/// wheel are captured at voice creation; the LFO value varies per sample.
#[derive(Copy, Clone)]
pub struct VariationInputs {
    pub note: f32,
    pub velocity: f32,
    pub mod_wheel: f32,
}

/// Applies the ordered variation list in place. The list terminates at the
/// first empty slot. Order matters: a variation that scales the LFO affects
/// every later variation reading it.
pub fn apply_variations(
    variations: &[Option<Variation>],
    inputs: &VariationInputs,
    lfo: &mut f32,
    posts: &mut [f32; NUM_OPERATORS],
) {
    for slot in variations {
        let Some(variation) = slot else { break };
        let value = match variation.input {
            VariationInput::Note => inputs.note,
            VariationInput::Velocity => inputs.velocity,
            VariationInput::Lfo => *lfo,
            VariationInput::Mod => inputs.mod_wheel,
        };
        let ratio = directed_ratio(value, variation.input_from, variation.input_to);
        let mul = variation.output_from + (variation.output_to - variation.output_from) * ratio;
        match variation.target {
            VariationTarget::Lfo => *lfo *= mul,
            VariationTarget::Op(id) => posts[id.index()] *= mul,
        }
    }
}

/// Clamped linear position of `value` within `[from, to]`. A descending
/// range swaps the clamp directions, mirroring the ratio.
fn directed_ratio(value: f32, from: f32, to: f32) -> f32 {
    if (to - from).abs() <= f32::EPSILON {
        // Degenerate range: step function at the shared endpoint.
        return if value >= to { 1.0 } else { 0.0 };
    }
    if from < to {
        ((value - from) / (to - from)).clamp(0.0, 1.0)
    } else {
        ((from - value) / (from - to)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instrument::OpId;
    use approx::assert_relative_eq;

    fn inputs() -> VariationInputs {
        VariationInputs {
            note: 60.0,
            velocity: 100.0,
            mod_wheel: 0.5,
        }
    }

    fn variation(input: VariationInput, from: f32, to: f32, target: VariationTarget) -> Variation {
        Variation {
            input,
            input_from: from,
            input_to: to,
            target,
            output_from: 0.0,
            output_to: 1.0,
        }
    }

    #[test]
    fn descending_range_mirrors_the_ratio() {
        assert_relative_eq!(directed_ratio(50.0, 100.0, 30.0), 50.0 / 70.0, epsilon = 1e-6);
        assert_relative_eq!(directed_ratio(50.0, 30.0, 100.0), 20.0 / 70.0, epsilon = 1e-6);
    }

    #[test]
    fn ratio_clamps_outside_the_range() {
        assert_eq!(directed_ratio(10.0, 30.0, 100.0), 0.0);
        assert_eq!(directed_ratio(120.0, 30.0, 100.0), 1.0);
        assert_eq!(directed_ratio(10.0, 100.0, 30.0), 1.0);
        assert_eq!(directed_ratio(120.0, 100.0, 30.0), 0.0);
    }

    #[test]
    fn scales_the_named_operator() {
        let variations = [
            Some(variation(
                VariationInput::Velocity,
                0.0,
                127.0,
                VariationTarget::Op(OpId::B),
            )),
            None,
        ];
        let mut posts = [1.0; NUM_OPERATORS];
        let mut lfo = 0.0;
        apply_variations(&variations, &inputs(), &mut lfo, &mut posts);
        assert_relative_eq!(posts[1], 100.0 / 127.0, epsilon = 1e-6);
        assert_eq!(posts[0], 1.0);
    }

    #[test]
    fn list_stops_at_first_empty_slot() {
        let variations = [
            None,
            Some(variation(
                VariationInput::Note,
                0.0,
                127.0,
                VariationTarget::Op(OpId::A),
            )),
        ];
        let mut posts = [1.0; NUM_OPERATORS];
        let mut lfo = 0.5;
        apply_variations(&variations, &inputs(), &mut lfo, &mut posts);
        assert_eq!(posts, [1.0; NUM_OPERATORS]);
    }

    #[test]
    fn later_variations_compose_in_order() {
        // First variation halves the LFO, second maps the LFO onto op A.
        let halve = Variation {
            input: VariationInput::Mod,
            input_from: 0.0,
            input_to: 1.0,
            target: VariationTarget::Lfo,
            output_from: 1.0,
            output_to: 0.0,
        };
        let lfo_to_a = variation(VariationInput::Lfo, 0.0, 1.0, VariationTarget::Op(OpId::A));
        let mut posts = [1.0; NUM_OPERATORS];
        let mut lfo = 1.0;
        // mod_wheel = 0.5 scales the LFO to 0.5, which then scales op A.
        apply_variations(
            &[Some(halve), Some(lfo_to_a)],
            &inputs(),
            &mut lfo,
            &mut posts,
        );
        assert_relative_eq!(lfo, 0.5, epsilon = 1e-6);
        assert_relative_eq!(posts[0], 0.5, epsilon = 1e-6);

        // Reversed order reads the unscaled LFO first.
        let mut posts = [1.0; NUM_OPERATORS];
        let mut lfo = 1.0;
        apply_variations(
            &[Some(lfo_to_a), Some(halve)],
            &inputs(),
            &mut lfo,
            &mut posts,
        );
        assert_relative_eq!(posts[0], 1.0, epsilon = 1e-6);
    }
}
