pub mod clock;
pub mod instrument;
pub mod midi;
pub mod mixer;
pub mod note;
pub mod patch;
pub mod rack;
pub mod store;
pub mod synth;
mod util;
