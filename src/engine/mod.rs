// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! The realtime callback.
//!
//! [`Engine::process_block`] runs once per fixed-size audio block on
//! the audio-graph thread. Its duty cycle: forward inbound device
//! events to the output port unmodified, drain the staging table into
//! the same port, and - depending on transport mode - capture what was
//! just sent or advance looped playback of the take. The whole path is
//! bounded: no locks, no allocation, no panics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::midi::{Outbox, RawEvent};
use crate::recording::{DoubleBuffer, TakeHandle, TimedEvent};
use crate::transport::{Mode, Transport};
use crate::ui::NoteSender;

/// Seam to the audio-graph output port.
///
/// `reserve` hands back a writable slice for an event of `len` bytes
/// at the given intra-block frame offset, or `None` when the port has
/// no room. The engine never retries a failed reservation within the
/// same block.
pub trait OutputPort {
    fn reserve(&mut self, frame: u32, len: usize) -> Option<&mut [u8]>;
}

/// Per-block MIDI processor. Owned by the audio thread; everything it
/// shares with other threads is lock-free.
pub struct Engine {
    outbox: Arc<Outbox>,
    transport: Arc<Transport>,
    take: TakeHandle,
    recorder: DoubleBuffer,
    notes: NoteSender,
    /// Absolute frame clock, advanced by one block per callback.
    block_start: u64,
    /// Frame of the previous recorded event (or of record start).
    record_anchor: u64,
    /// Frame of the previous played event (or of playback start).
    play_anchor: u64,
    last_mode: Mode,
    skipped: Arc<AtomicU64>,
}

impl Engine {
    pub fn new(
        outbox: Arc<Outbox>,
        transport: Arc<Transport>,
        take: TakeHandle,
        recorder: DoubleBuffer,
        notes: NoteSender,
    ) -> Self {
        Self {
            outbox,
            transport,
            take,
            recorder,
            notes,
            block_start: 0,
            record_anchor: 0,
            play_anchor: 0,
            last_mode: Mode::Idle,
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Events dropped because the output port could not reserve room.
    pub fn skipped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.skipped)
    }

    /// Events lost because the consolidator fell behind. Zero when the
    /// record buffers are sized correctly.
    pub fn overrun_count(&self) -> u64 {
        self.recorder.overrun_count()
    }

    /// Current absolute frame time.
    pub fn frame_time(&self) -> u64 {
        self.block_start
    }

    /// Process one audio block of `nframes` frames.
    ///
    /// `input` holds this block's inbound device events, ordered by
    /// frame offset. Mode changes are sampled here, once, so transport
    /// edges always land on a block boundary.
    pub fn process_block(&mut self, input: &[RawEvent], out: &mut dyn OutputPort, nframes: u32) {
        let mode = self.transport.mode();
        if self.last_mode == Mode::Recording && mode != Mode::Recording {
            // Stop-recording: hand off whichever buffer holds content.
            self.recorder.flush();
        }
        self.last_mode = mode;

        if mode == Mode::Recording && self.transport.take_fresh_take() {
            self.recorder.prepare();
            self.record_anchor = self.block_start;
        }

        let take = if mode == Mode::Playing {
            Some(self.take.snapshot())
        } else {
            None
        };
        let channel = self.outbox.channel();

        let mut next_input = 0usize;
        let mut slot = self.outbox.next_ready(0);

        for frame in 0..nframes {
            let now = self.block_start + frame as u64;
            let mut wrote = false;

            // Inbound device events due at this offset: pass through
            // unmodified, mirror channel-matched note edges to the UI.
            while next_input < input.len() && input[next_input].frame() <= frame {
                let event = &input[next_input];
                next_input += 1;
                if let Some(buf) = out.reserve(frame, event.len()) {
                    buf.copy_from_slice(event.bytes());
                    wrote = true;
                } else {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
                if let Some((note, on)) = event.note_edge(channel) {
                    self.notes.notify(note, on);
                }
            }

            if let Some(index) = slot {
                // One staged message per frame, in slot-scan order. A
                // failed reservation leaves the slot pending for the
                // next block.
                let len = self.outbox.peek_len(index);
                match out.reserve(frame, len) {
                    Some(buf) => {
                        let (bytes, len) = self.outbox.drain(index);
                        buf.copy_from_slice(&bytes[..len]);
                        wrote = true;
                        if mode == Mode::Recording {
                            self.record_event(bytes, len, now);
                        }
                    }
                    None => {
                        self.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                slot = self.outbox.next_ready(index + 1);
            } else if !wrote && mode == Mode::Playing {
                if let Some(take) = take.as_deref() {
                    self.play_frame(take, channel, out, frame, now);
                }
            }
        }

        self.block_start += nframes as u64;
    }

    fn record_event(&mut self, bytes: [u8; 3], len: usize, now: u64) {
        let delta = now - self.record_anchor;
        self.recorder
            .push(TimedEvent::new(bytes[0], bytes[1], bytes[2], len, delta));
        self.record_anchor = now;
    }

    fn play_frame(
        &mut self,
        take: &[TimedEvent],
        channel: u8,
        out: &mut dyn OutputPort,
        frame: u32,
        now: u64,
    ) {
        if take.is_empty() {
            return;
        }
        if self.transport.take_first_play() {
            self.play_anchor = now;
            self.transport.set_cursor(0);
        }
        let cursor = self.transport.cursor().min(take.len() - 1);
        let event = take[cursor];

        if now - self.play_anchor >= event.delta_frames {
            match out.reserve(frame, event.len()) {
                Some(buf) => {
                    let bytes = event.bytes();
                    buf.copy_from_slice(&bytes[..event.len()]);
                    // Replayed notes light the keyboard exactly as
                    // live input would.
                    if let Some((note, on)) = event.note_edge(channel) {
                        self.notes.notify(note, on);
                    }
                }
                None => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
            // Due events advance the cursor whether or not the port
            // had room; a skipped event is not retried.
            self.play_anchor = now;
            let next = cursor + 1;
            self.transport
                .set_cursor(if next >= take.len() { 0 } else { next });
        }
    }
}
