use crate::clock::EngineClock;
use crate::mixer::VoiceId;
use crate::synth::VoiceRenderer;
use basedrop::Owned;
use ringbuf_basedrop as ringbuf;

/// Control-to-render messages. Timestamps are absolute engine seconds; the
/// renderer acts on them regardless of when the message arrived.
pub enum RackCommand {
    AddVoice {
        id: VoiceId,
        renderer: Owned<VoiceRenderer>,
    },
    Release {
        id: VoiceId,
        at: f64,
    },
    ForceStop {
        id: VoiceId,
        at: f64,
    },
    Ping {
        id: VoiceId,
    },
}

struct RackVoice {
    id: VoiceId,
    renderer: Owned<VoiceRenderer>,
}

/// Render-domain owner of all sounding voices.
///
/// Lives inside the audio callback. Never allocates or blocks: the voice
/// list is pre-allocated, commands arrive over a lock-free ring, retired
/// renderers are dropped through `Owned` so deallocation happens on the
/// collector thread, and the ended queue is the only signal going back.
pub struct VoiceRack {
    voices: Vec<RackVoice>,
    commands: ringbuf::Consumer<RackCommand>,
    ended: ringbuf::Producer<VoiceId>,
    clock: EngineClock,
}

impl VoiceRack {
    pub(crate) fn new(
        capacity: usize,
        commands: ringbuf::Consumer<RackCommand>,
        ended: ringbuf::Producer<VoiceId>,
        clock: EngineClock,
    ) -> Self {
        Self {
            voices: Vec::with_capacity(capacity),
            commands,
            ended,
            clock,
        }
    }

    /// Renders one block: mixes every live voice additively into `out` and
    /// reports the voices that ended. `out` is cleared first.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let now = self.clock.now();

        while let Some(command) = self.commands.pop() {
            self.dispatch(command);
        }

        let mut idx = 0;
        while idx < self.voices.len() {
            let voice = &mut self.voices[idx];
            if voice.renderer.render(out, now) {
                idx += 1;
            } else {
                let voice = self.voices.swap_remove(idx);
                // A full ended queue means the control thread is stalled;
                // dropping the notification is the only non-blocking option.
                let _ = self.ended.push(voice.id);
            }
        }
    }

    fn dispatch(&mut self, command: RackCommand) {
        match command {
            RackCommand::AddVoice { id, renderer } => {
                // Past capacity the voice is dropped outright (deallocation
                // is deferred to the collector); the supervisor's polyphony
                // limit makes this unreachable in practice.
                if self.voices.len() < self.voices.capacity() {
                    self.voices.push(RackVoice { id, renderer });
                } else {
                    let _ = self.ended.push(id);
                }
            }
            RackCommand::Release { id, at } => {
                if let Some(voice) = self.find(id) {
                    voice.renderer.release(at);
                }
            }
            RackCommand::ForceStop { id, at } => {
                if let Some(voice) = self.find(id) {
                    voice.renderer.force_stop(at);
                }
            }
            RackCommand::Ping { id } => {
                if let Some(voice) = self.find(id) {
                    voice.renderer.ping();
                }
            }
        }
    }

    fn find(&mut self, id: VoiceId) -> Option<&mut RackVoice> {
        // Commands for already-retired voices are silently dropped.
        self.voices.iter_mut().find(|voice| voice.id == id)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }
}
