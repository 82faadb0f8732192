// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

use std::env;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use midir::{MidiInput, MidiOutput, MidiOutputConnection};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use tracing::{debug, info, warn};

use claviature::recording::record_pipeline;
use claviature::{
    note_feed, ControlSurface, Engine, EngineConfig, KeyMatrix, Mode, Outbox, OutputPort,
    RawEvent, TakeHandle, Transport,
};

/// Audio block size requested from the host.
const BLOCK_FRAMES: u32 = 256;

/// Capacity of the device-input ring between the MIDI callback and
/// the audio callback.
const INPUT_RING_DEPTH: usize = 256;

fn print_usage() {
    println!("CLAVIATURE - Virtual MIDI Keyboard Engine");
    println!();
    println!("Usage: claviature [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --list-midi             List available MIDI destinations (outputs)");
    println!("  --list-sources          List available MIDI sources (inputs)");
    println!("  --test-note <N>         Send a test note to MIDI destination N");
    println!("  --run <N> [M]           Run the engine against destination N (and source M)");
    println!("  --config <PATH>         Load engine settings from a YAML file");
    println!("  --help                  Show this help message");
    println!();
    println!("While running: r = record, p = play, s = stop, q = quit");
}

fn list_destinations() -> Result<()> {
    let midi_out = MidiOutput::new("claviature").context("Failed to open MIDI system")?;
    let ports = midi_out.ports();
    if ports.is_empty() {
        println!("No MIDI destinations found.");
    } else {
        println!("Available MIDI destinations (outputs):");
        for (i, port) in ports.iter().enumerate() {
            let name = midi_out
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown {}", i));
            println!("  {}: {}", i, name);
        }
    }
    Ok(())
}

fn list_sources() -> Result<()> {
    let midi_in = MidiInput::new("claviature").context("Failed to open MIDI system")?;
    let ports = midi_in.ports();
    if ports.is_empty() {
        println!("No MIDI sources found.");
    } else {
        println!("Available MIDI sources (inputs):");
        for (i, port) in ports.iter().enumerate() {
            let name = midi_in
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown {}", i));
            println!("  {}: {}", i, name);
        }
    }
    Ok(())
}

fn connect_output(name: &str, destination: usize) -> Result<MidiOutputConnection> {
    let midi_out = MidiOutput::new(name).context("Failed to open MIDI system")?;
    let ports = midi_out.ports();
    let port = ports
        .get(destination)
        .ok_or_else(|| anyhow!("MIDI destination {} not found", destination))?;
    let port_name = midi_out
        .port_name(port)
        .unwrap_or_else(|_| "unknown".to_string());
    info!(destination, port = %port_name, "connecting MIDI output");
    midi_out
        .connect(port, "claviature-out")
        .map_err(|e| anyhow!("Failed to connect to destination {}: {}", destination, e))
}

fn send_test_note(destination: usize) -> Result<()> {
    println!("Connecting to MIDI destination {}...", destination);
    let mut conn = connect_output("claviature", destination)?;

    let channel = 0;
    let note = 60; // Middle C
    let velocity = 100;

    println!("Sending test note (Middle C, velocity {})...", velocity);
    conn.send(&[0x90 | channel, note, velocity])
        .map_err(|e| anyhow!("Note On failed: {}", e))?;
    thread::sleep(Duration::from_millis(500));
    conn.send(&[0x80 | channel, note, 0])
        .map_err(|e| anyhow!("Note Off failed: {}", e))?;

    println!("Test complete!");
    Ok(())
}

/// Output port backed by a midir connection.
///
/// Reservations land in a bounded scratch list during the block and
/// are sent on `flush` after the block ends; a full list fails the
/// reservation, which the engine treats as a skipped event.
struct MidirPort {
    conn: MidiOutputConnection,
    pending: Vec<([u8; 3], usize)>,
    capacity: usize,
}

impl MidirPort {
    fn new(conn: MidiOutputConnection, capacity: usize) -> Self {
        Self {
            conn,
            pending: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn flush(&mut self) {
        for (bytes, len) in self.pending.drain(..) {
            if let Err(e) = self.conn.send(&bytes[..len]) {
                warn!("MIDI send failed: {}", e);
            }
        }
    }
}

impl OutputPort for MidirPort {
    fn reserve(&mut self, _frame: u32, len: usize) -> Option<&mut [u8]> {
        if self.pending.len() >= self.capacity {
            return None;
        }
        self.pending.push(([0; 3], len));
        self.pending.last_mut().map(|(bytes, len)| &mut bytes[..*len])
    }
}

fn run(config: EngineConfig, destination: usize, source: Option<usize>) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    // Shared core.
    let outbox = Arc::new(Outbox::with_capacity(config.outbox_capacity));
    outbox.set_channel(config.channel);
    let transport = Arc::new(Transport::new());
    let take = TakeHandle::new();
    let (recorder, consolidator) = record_pipeline(config.record_capacity, take.clone());
    let overruns = recorder.overrun_handle();
    let (note_tx, mut note_rx) = note_feed(config.feed_depth);
    let note_drops = note_tx.dropped_handle();

    let mut surface = ControlSurface::new(Arc::clone(&outbox));
    surface.set_velocity(config.velocity);

    // Device input: the midir callback pushes raw events into a ring
    // the audio callback drains at the top of each block.
    let (mut input_tx, mut input_rx) = HeapRb::<RawEvent>::new(INPUT_RING_DEPTH).split();
    let _conn_in = match source {
        Some(index) => {
            let midi_in =
                MidiInput::new(&config.client_name).context("Failed to open MIDI system")?;
            let ports = midi_in.ports();
            let port = ports
                .get(index)
                .ok_or_else(|| anyhow!("MIDI source {} not found", index))?;
            let port_name = midi_in
                .port_name(port)
                .unwrap_or_else(|_| "unknown".to_string());
            info!(source = index, port = %port_name, "connecting MIDI input");
            Some(
                midi_in
                    .connect(
                        port,
                        "claviature-in",
                        move |_stamp, message, _| {
                            if let Some(event) = RawEvent::new(0, message) {
                                let _ = input_tx.try_push(event);
                            }
                        },
                        (),
                    )
                    .map_err(|e| anyhow!("Failed to connect to source {}: {}", index, e))?,
            )
        }
        None => None,
    };

    let conn_out = connect_output(&config.client_name, destination)?;
    let mut port = MidirPort::new(conn_out, config.outbox_capacity + INPUT_RING_DEPTH);

    let mut engine = Engine::new(
        Arc::clone(&outbox),
        Arc::clone(&transport),
        take.clone(),
        recorder,
        note_tx,
    );
    let skipped = engine.skipped_handle();

    // The audio stream supplies the block clock: one engine invocation
    // per callback, frame-accurate within the block.
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No audio output device available"))?;
    let stream_config = StreamConfig {
        channels: 2,
        sample_rate: device
            .default_output_config()
            .context("Failed to query default audio config")?
            .sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(BLOCK_FRAMES),
    };
    info!(
        sample_rate = stream_config.sample_rate.0,
        block = BLOCK_FRAMES,
        "starting audio clock"
    );

    let mut block_input: Vec<RawEvent> = Vec::with_capacity(INPUT_RING_DEPTH);
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = 0.0;
                }
                let nframes = (data.len() / 2) as u32;

                block_input.clear();
                while block_input.len() < block_input.capacity() {
                    match input_rx.try_pop() {
                        Some(event) => block_input.push(event),
                        None => break,
                    }
                }

                engine.process_block(&block_input, &mut port, nframes);
                port.flush();
            },
            move |err| {
                warn!("audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| anyhow!("Failed to build audio stream: {}", e))?;
    stream
        .play()
        .map_err(|e| anyhow!("Failed to start audio stream: {}", e))?;

    // UI-side consumer: drain the note feed into the key matrix at
    // animation rate.
    let matrix = Arc::new(Mutex::new(KeyMatrix::new()));
    let pump_matrix = Arc::clone(&matrix);
    let pump_running = Arc::new(AtomicBool::new(true));
    let pump_flag = Arc::clone(&pump_running);
    let pump = thread::spawn(move || {
        while pump_flag.load(Ordering::Acquire) {
            if let Ok(mut keys) = pump_matrix.lock() {
                if note_rx.drain_into(&mut keys) > 0 {
                    debug!(held = keys.count(), "key matrix updated");
                }
            }
            thread::sleep(Duration::from_millis(30));
        }
    });

    println!("Engine running. Commands: r = record, p = play, s = stop, q = quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;
        match line.trim() {
            "r" => {
                if transport.mode() == Mode::Recording {
                    transport.stop();
                    println!("Recording stopped ({} events so far)", take.len());
                } else {
                    stop_playback(&transport, &surface, &matrix);
                    transport.begin_record(&take);
                    println!("Recording...");
                }
            }
            "p" => {
                if transport.mode() == Mode::Playing {
                    stop_playback(&transport, &surface, &matrix);
                    println!("Playback stopped");
                } else if take.is_empty() && transport.mode() != Mode::Recording {
                    println!("Nothing recorded yet");
                } else {
                    transport.stop();
                    transport.begin_play();
                    println!("Playing {} events (looped)", take.len());
                }
            }
            "s" => {
                stop_playback(&transport, &surface, &matrix);
                println!("Stopped");
            }
            "q" => break,
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }

    stop_playback(&transport, &surface, &matrix);
    pump_running.store(false, Ordering::Release);
    let _ = pump.join();
    drop(stream);
    consolidator.stop();

    let skipped = skipped.load(Ordering::Relaxed);
    let overruns = overruns.load(Ordering::Relaxed);
    let note_drops = note_drops.load(Ordering::Relaxed);
    if skipped > 0 || overruns > 0 || note_drops > 0 {
        warn!(skipped, overruns, note_drops, "events dropped during session");
    }
    info!("bye");
    Ok(())
}

/// Leaving Playing releases everything: all-notes-off on the wire and
/// a cleared key matrix on screen.
fn stop_playback(transport: &Transport, surface: &ControlSurface, matrix: &Mutex<KeyMatrix>) {
    if transport.stop() == Mode::Playing {
        surface.all_notes_off();
        if let Ok(mut keys) = matrix.lock() {
            keys.clear();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("CLAVIATURE - Virtual MIDI Keyboard Engine");
        println!("Run with --help for usage information");
        return Ok(());
    }

    // --config may appear anywhere after the command.
    let mut config = EngineConfig::default();
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        let path = args
            .get(pos + 1)
            .ok_or_else(|| anyhow!("--config requires a file path"))?;
        config = EngineConfig::load(path)?;
        info!(path = %path, "configuration loaded");
    }

    match args[1].as_str() {
        "--list-midi" => list_destinations()?,
        "--list-sources" => list_sources()?,
        "--test-note" => {
            if args.len() < 3 {
                eprintln!("Error: --test-note requires a destination number");
                eprintln!("Use --list-midi to see available destinations");
                std::process::exit(1);
            }
            let destination: usize = args[2]
                .parse()
                .map_err(|_| anyhow!("Invalid destination number: {}", args[2]))?;
            send_test_note(destination)?;
        }
        "--run" => {
            if args.len() < 3 {
                eprintln!("Error: --run requires a destination number");
                eprintln!("Use --list-midi to see available destinations");
                std::process::exit(1);
            }
            let destination: usize = args[2]
                .parse()
                .map_err(|_| anyhow!("Invalid destination number: {}", args[2]))?;
            let source = match args.get(3).map(|s| s.as_str()) {
                Some("--config") | None => None,
                Some(raw) => Some(
                    raw.parse::<usize>()
                        .map_err(|_| anyhow!("Invalid source number: {}", raw))?,
                ),
            };
            run(config, destination, source)?;
        }
        "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown option: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
