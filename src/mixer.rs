use crate::clock::EngineClock;
use crate::note::{Note, NoteSource};
use crate::rack::{RackCommand, VoiceRack};
use crate::store::{InstrumentStore, StoreEvent};
use crate::synth::{OverloadStrategy, VoiceParams, VoiceRenderer, PING_INTERVAL};
use basedrop::{Handle, Owned};
use ringbuf_basedrop as ringbuf;
use slotmap::{new_key_type, SlotMap};
use std::sync::{mpsc, Arc};

/// Default maximum number of concurrently sounding voices.
pub const MAX_POLYPHONY: usize = 16;

/// Parameter/wheel changes are coalesced into at most one mass recreation
/// per this interval.
const RECREATE_INTERVAL: f64 = 0.060;

/// Crossfade recreation schedules the old voice's fade-out (and the new
/// voice's fade-in) this far in the future, not immediately.
const CROSSFADE_DELAY: f64 = 0.020;

/// A control tick gap beyond this means the control thread itself starved;
/// the renderer-side watchdog cannot see that, so it is logged here.
const TICK_STARVATION: f64 = 2.0;

const COMMAND_QUEUE_CAPACITY: usize = 256;
// Both old and new voices sound during a crossfade, so the render side is
// sized for twice the polyphony limit plus slack.
const ENDED_QUEUE_CAPACITY: usize = 2 * MAX_POLYPHONY + 8;
const RACK_CAPACITY: usize = 2 * MAX_POLYPHONY + 8;

new_key_type! {
    pub struct VoiceId;
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VoiceState {
    Sustaining,
    Released,
}

/// Control-thread record of one live voice. The render-side state lives in
/// the paired `VoiceRenderer`; this handle only carries what the supervisor
/// needs for eviction, release and recreation.
struct VoiceHandle {
    source: NoteSource,
    note: Note,
    velocity: u8,
    note_down: f64,
    note_up: Option<f64>,
    state: VoiceState,
}

/// Control-domain voice supervisor.
///
/// Owns the set of live voice handles, enforces polyphony, relays note
/// events to the render domain and coalesces parameter changes into mass
/// voice recreation with a crossfade. Construction also yields the paired
/// [`VoiceRack`], which moves into the audio callback.
pub struct Mixer {
    store: Arc<InstrumentStore>,
    store_events: mpsc::Receiver<StoreEvent>,
    commands: ringbuf::Producer<RackCommand>,
    ended: ringbuf::Consumer<VoiceId>,
    voices: SlotMap<VoiceId, VoiceHandle>,
    collector_handle: Handle,
    clock: EngineClock,
    sample_rate: f32,
    strategy: OverloadStrategy,

    polyphony_limit: usize,
    pitch_wheel: f32,
    mod_wheel: f32,
    muted: bool,
    suspended: bool,

    dirty: bool,
    last_recreate: f64,
    last_ping: f64,
    last_tick: f64,
}

impl Mixer {
    /// Builds the mixer and its render-domain counterpart. The mixer starts
    /// suspended (polyphony 1) until [`Mixer::set_suspended`] reports the
    /// output stream running, so a burst of queued notes before the stream
    /// warms up cannot pile up voices.
    pub fn new(
        store: Arc<InstrumentStore>,
        clock: EngineClock,
        sample_rate: f32,
        handle: &Handle,
    ) -> (Mixer, VoiceRack) {
        let (command_tx, command_rx) = ringbuf::RingBuffer::new(COMMAND_QUEUE_CAPACITY).split(handle);
        let (ended_tx, ended_rx) = ringbuf::RingBuffer::new(ENDED_QUEUE_CAPACITY).split(handle);
        let store_events = store.subscribe();
        let rack = VoiceRack::new(RACK_CAPACITY, command_rx, ended_tx, clock);
        let mixer = Mixer {
            store,
            store_events,
            commands: command_tx,
            ended: ended_rx,
            voices: SlotMap::with_key(),
            collector_handle: handle.clone(),
            clock,
            sample_rate,
            strategy: OverloadStrategy::default(),
            polyphony_limit: MAX_POLYPHONY,
            pitch_wheel: 0.0,
            mod_wheel: 0.0,
            muted: false,
            suspended: true,
            dirty: false,
            last_recreate: f64::NEG_INFINITY,
            last_ping: 0.0,
            last_tick: clock.now(),
        };
        (mixer, rack)
    }

    pub fn on_note_down(&mut self, source: NoteSource, note: Note, velocity: u8) {
        self.note_down_at(source, note, velocity, self.clock.now());
    }

    pub fn on_note_up(&mut self, source: NoteSource, note: Note) {
        self.note_up_at(source, note, self.clock.now());
    }

    /// Periodic control-side work: ended-voice cleanup, coalesced
    /// recreation, watchdog pings. Call every few milliseconds.
    pub fn tick(&mut self) {
        self.tick_at(self.clock.now());
    }

    pub fn set_pitch_wheel(&mut self, value: f32) {
        let value = value.clamp(-1.0, 1.0);
        if value != self.pitch_wheel {
            self.pitch_wheel = value;
            self.dirty = true;
        }
    }

    pub fn set_mod_wheel(&mut self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        if value != self.mod_wheel {
            self.mod_wheel = value;
            self.dirty = true;
        }
    }

    /// Mutes the engine; the rising edge force-stops everything at once.
    pub fn set_global_mute(&mut self, muted: bool) {
        if muted && !self.muted {
            self.force_stop_all();
        }
        self.muted = muted;
    }

    /// Reports whether the host render subsystem is suspended/cold. While
    /// suspended the polyphony limit drops to 1.
    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn set_polyphony_limit(&mut self, limit: usize) {
        self.polyphony_limit = limit.max(1);
    }

    pub fn set_overload_strategy(&mut self, strategy: OverloadStrategy) {
        self.strategy = strategy;
    }

    /// Immediately force-stops and drops every voice, bypassing the normal
    /// ended bookkeeping.
    pub fn force_stop_all(&mut self) {
        let now = self.clock.now();
        let ids: Vec<VoiceId> = self.voices.keys().collect();
        for id in ids {
            self.push(RackCommand::ForceStop { id, at: now });
        }
        self.voices.clear();
        log::debug!("force-stopped all voices");
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    fn note_down_at(&mut self, source: NoteSource, note: Note, velocity: u8, now: f64) {
        if self.muted {
            return;
        }
        log::debug!("note down {} from {:?} velocity {}", note, source, velocity);
        self.spawn_voice(source, note, velocity, now, None, now, now);
        self.enforce_polyphony(now);
    }

    fn note_up_at(&mut self, source: NoteSource, note: Note, now: f64) {
        for (id, voice) in self.voices.iter_mut() {
            if voice.source == source && voice.note == note && voice.state == VoiceState::Sustaining
            {
                voice.state = VoiceState::Released;
                voice.note_up = Some(now);
                if self
                    .commands
                    .push(RackCommand::Release { id, at: now })
                    .is_err()
                {
                    log::warn!("command queue full; release dropped");
                }
            }
        }
    }

    fn tick_at(&mut self, now: f64) {
        if now - self.last_tick > TICK_STARVATION {
            log::warn!(
                "control tick starved for {:.2}s; watchdog pings were not sent",
                now - self.last_tick
            );
        }
        self.last_tick = now;

        while let Some(id) = self.ended.pop() {
            // Ids evicted or recreated away are long gone from the map.
            if self.voices.remove(id).is_some() {
                log::debug!("voice ended");
            }
        }

        let mut store_changed = false;
        while let Ok(event) = self.store_events.try_recv() {
            match event {
                StoreEvent::ActiveInstrumentChanged | StoreEvent::InstrumentMutated => {
                    store_changed = true
                }
            }
        }
        if store_changed {
            self.dirty = true;
        }

        if self.dirty && now - self.last_recreate >= RECREATE_INTERVAL {
            self.recreate_all_voices(now);
            self.dirty = false;
            self.last_recreate = now;
        }

        if now - self.last_ping >= PING_INTERVAL {
            let ids: Vec<VoiceId> = self.voices.keys().collect();
            for id in ids {
                self.push(RackCommand::Ping { id });
            }
            self.last_ping = now;
        }
    }

    /// Replaces every live voice with a freshly-parameterized copy,
    /// crossfading over a short window: the old voice fades out and the new
    /// one fades in starting `CROSSFADE_DELAY` from now. Both sound during
    /// the overlap, momentarily doubling polyphony.
    fn recreate_all_voices(&mut self, now: f64) {
        let crossfade = now + CROSSFADE_DELAY;
        let ids: Vec<VoiceId> = self.voices.keys().collect();
        log::debug!("recreating {} voices", ids.len());
        for id in ids {
            let Some(old) = self.voices.remove(id) else {
                continue;
            };
            self.push(RackCommand::ForceStop { id, at: crossfade });
            self.spawn_voice(
                old.source,
                old.note,
                old.velocity,
                old.note_down,
                old.note_up,
                crossfade,
                now,
            );
        }
    }

    fn spawn_voice(
        &mut self,
        source: NoteSource,
        note: Note,
        velocity: u8,
        note_down: f64,
        note_up: Option<f64>,
        fade_in: f64,
        now: f64,
    ) {
        let snapshot = self.store.snapshot();
        let renderer = VoiceRenderer::new(VoiceParams {
            snapshot: &snapshot,
            note,
            velocity,
            pitch_wheel: self.pitch_wheel,
            mod_wheel: self.mod_wheel,
            note_down,
            note_up,
            fade_in,
            now,
            sample_rate: self.sample_rate,
            strategy: self.strategy,
        });
        let state = match note_up {
            Some(_) => VoiceState::Released,
            None => VoiceState::Sustaining,
        };
        let id = self.voices.insert(VoiceHandle {
            source,
            note,
            velocity,
            note_down,
            note_up,
            state,
        });
        let renderer = Owned::new(&self.collector_handle, renderer);
        if self
            .commands
            .push(RackCommand::AddVoice { id, renderer })
            .is_err()
        {
            log::warn!("command queue full; voice dropped");
            self.voices.remove(id);
        }
    }

    /// Evicts the single oldest voice until the live set fits the limit.
    fn enforce_polyphony(&mut self, now: f64) {
        let limit = if self.suspended { 1 } else { self.polyphony_limit };
        while self.voices.len() > limit {
            let oldest = self
                .voices
                .iter()
                .min_by(|a, b| a.1.note_down.total_cmp(&b.1.note_down))
                .map(|(id, _)| id);
            let Some(id) = oldest else { break };
            log::debug!("polyphony limit hit; evicting oldest voice");
            self.push(RackCommand::ForceStop { id, at: now });
            self.voices.remove(id);
        }
    }

    fn push(&mut self, command: RackCommand) {
        if self.commands.push(command).is_err() {
            log::warn!("command queue full; command dropped");
        }
    }
}
