pub use self::envelope::Envelope;
pub use self::lfo::LfoState;
pub use self::operators::{OperatorNetwork, MOD_WEIGHT};
pub use self::renderer::{OverloadStrategy, VoiceParams, VoiceRenderer, FADE_CEILING, PING_INTERVAL};
pub use self::variation::{apply_variations, VariationInputs};

mod envelope;
mod lfo;
mod operators;
mod renderer;
mod variation;
