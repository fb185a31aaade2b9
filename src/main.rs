use basedrop::Collector;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use fm_engine::clock::EngineClock;
use fm_engine::instrument::{Instrument, OpId, Variation, VariationInput, VariationTarget};
use fm_engine::midi::{bend_to_unit, MidiEvent, CC_MOD_WHEEL};
use fm_engine::mixer::Mixer;
use fm_engine::note::{Note, NoteSource};
use fm_engine::store::InstrumentStore;
use std::sync::Arc;
use std::time::Duration;

/// Frames rendered per callback pass; larger callbacks are chunked.
const BLOCK_FRAMES: usize = 512;

fn main() {
    simple_logger::init_with_level(log::Level::Debug).unwrap();

    // Set up the MIDI input interface
    let mut midi_in = midir::MidiInput::new("MIDI input").unwrap();
    midi_in.ignore(midir::Ignore::ActiveSense);

    // Get or generate MIDI input
    let (midi_tx, midi_rx) = std::sync::mpsc::channel();
    let in_ports = midi_in.ports();
    let _connection;
    if !in_ports.is_empty() {
        // Create a callback to handle incoming MIDI messages
        let callback = move |_, message: &[u8], _: &mut ()| {
            let event = MidiEvent::from_raw(message);
            if event.is_invalid() {
                return;
            }
            midi_tx.send(event).ok();
        };

        // Connect to the selected MIDI input port
        _connection = midi_in
            .connect(&in_ports[0], "midi-read-connection", callback, ())
            .unwrap();
    } else {
        log::info!("no MIDI input ports available; playing a test arpeggio");
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(2000));
            loop {
                let off = |note: Note| MidiEvent::NoteOff {
                    channel: 0,
                    note,
                    velocity: 0,
                };
                let on = |note: Note| MidiEvent::NoteOn {
                    channel: 0,
                    note,
                    velocity: 100,
                };
                for i in [0, 4, 7, 4] {
                    midi_tx.send(on(Note(60).transpose(i))).ok();
                    std::thread::sleep(Duration::from_millis(250));
                    midi_tx.send(off(Note(60).transpose(i))).ok();
                    std::thread::sleep(Duration::from_millis(250));
                }
            }
        });
    }

    // Create a collector and the shared instrument store
    let mut collector = Collector::new();
    let store = Arc::new(InstrumentStore::new(default_instrument()).unwrap());
    let clock = EngineClock::start();

    // Create the output stream; the voice rack moves into its callback
    let host = cpal::default_host();
    let device = host.default_output_device().unwrap();
    let config: cpal::StreamConfig = device.default_output_config().unwrap().into();
    let sample_rate = config.sample_rate.0 as f32;
    let channels = config.channels as usize;

    let (mut mixer, mut rack) = Mixer::new(store, clock, sample_rate, &collector.handle());

    let mut scratch = vec![0.0f32; BLOCK_FRAMES];
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frames in data.chunks_mut(BLOCK_FRAMES * channels) {
                    let mono = &mut scratch[..frames.len() / channels];
                    rack.render(mono);
                    for (frame, sample) in frames.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(*sample);
                    }
                }
            },
            move |err| {
                log::error!("output stream error: {err}");
            },
            None,
        )
        .unwrap();
    stream.play().unwrap();
    mixer.set_suspended(false);

    // Control loop: MIDI in, voice supervision, deferred deallocation
    loop {
        while let Ok(event) = midi_rx.try_recv() {
            match event {
                MidiEvent::NoteOn { note, velocity, .. } => {
                    mixer.on_note_down(NoteSource::Midi, note, velocity)
                }
                MidiEvent::NoteOff { note, .. } => mixer.on_note_up(NoteSource::Midi, note),
                MidiEvent::ControlChange { control, value, .. } if control == CC_MOD_WHEEL => {
                    mixer.set_mod_wheel(value as f32 / 127.0)
                }
                MidiEvent::PitchBend { value, .. } => mixer.set_pitch_wheel(bend_to_unit(value)),
                _ => {}
            }
        }
        mixer.tick();
        collector.collect();
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// A small two-operator electric-piano-ish patch with mod-wheel vibrato
/// routed through the LFO.
fn default_instrument() -> Instrument {
    let mut instrument = Instrument::carrier("init");
    instrument.operators[1].enabled = true;
    instrument.operators[1].frequency_ratio = 2.0;
    instrument.operators[1].modulation.a = 0.6;
    instrument.variations[0] = Some(Variation {
        input: VariationInput::Mod,
        input_from: 0.0,
        input_to: 1.0,
        target: VariationTarget::Lfo,
        output_from: 0.0,
        output_to: 1.0,
    });
    // Wheel-scaled LFO becomes tremolo on the carrier
    instrument.variations[1] = Some(Variation {
        input: VariationInput::Lfo,
        input_from: 0.0,
        input_to: 1.0,
        target: VariationTarget::Op(OpId::A),
        output_from: 1.0,
        output_to: 0.6,
    });
    instrument
}
