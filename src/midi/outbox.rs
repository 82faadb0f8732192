// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Lock-free staging table for outgoing MIDI messages.
//!
//! Any number of producer threads (UI controls, programmatic sources)
//! submit fully-formed 2-3 byte messages; the realtime callback is the
//! single consumer and drains pending slots once per audio block. No
//! mutex is involved anywhere: each slot carries an atomic state flag
//! and its payload packed into a single atomic word, so the consumer
//! can never observe a partially written message.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Default number of slots. Sized so that the table is never full
/// under normal load (a handful of concurrent knob moves plus notes).
pub const DEFAULT_OUTBOX_CAPACITY: usize = 16;

// Slot lifecycle: EMPTY -> WRITING (claimed by one producer) -> READY
// (payload visible to the consumer) -> EMPTY (drained).
const SLOT_EMPTY: u8 = 0;
const SLOT_WRITING: u8 = 1;
const SLOT_READY: u8 = 2;

struct Slot {
    state: AtomicU8,
    packed: AtomicU32,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SLOT_EMPTY),
            packed: AtomicU32::new(0),
        }
    }
}

fn pack(status: u8, data1: u8, data2: u8, len: usize) -> u32 {
    u32::from_le_bytes([status, data1, data2, len as u8])
}

fn unpack(word: u32) -> ([u8; 3], usize) {
    let [status, data1, data2, len] = word.to_le_bytes();
    ([status, data1, data2], len as usize)
}

/// Fixed-capacity pool of pending outgoing MIDI messages.
///
/// A slot is either free or holds exactly one unsent message.
/// Submitting a message identical to one already pending coalesces
/// into the existing slot, so repeated identical control changes send
/// once.
pub struct Outbox {
    slots: Box<[Slot]>,
    channel: AtomicU8,
}

impl Outbox {
    /// Create a table with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }

    /// Create a table with an explicit slot count.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Slot::new()).collect();
        Self {
            slots,
            channel: AtomicU8::new(0),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The channel merged into every submitted status byte and used by
    /// the engine's note filtering.
    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::Relaxed) & 0x0F
    }

    /// Change the outgoing channel. Takes effect for subsequent
    /// submissions; already-pending messages keep their channel.
    pub fn set_channel(&self, channel: u8) {
        self.channel.store(channel & 0x0F, Ordering::Relaxed);
    }

    /// Stage a message for the next audio block.
    ///
    /// `status` carries the message-type nibble; the configured channel
    /// is merged into its low nibble. `len` is the wire length (2 or
    /// 3); `data2` is ignored on the wire for 2-byte messages but still
    /// participates in duplicate coalescing.
    ///
    /// Returns `false` when every slot is occupied. That is non-fatal:
    /// the message is dropped and the caller may retry on the next
    /// control movement.
    pub fn submit(&self, status: u8, data1: u8, data2: u8, len: usize) -> bool {
        let status = status | self.channel();
        let packed = pack(status, data1, data2, len);
        for slot in self.slots.iter() {
            match slot.state.load(Ordering::Acquire) {
                SLOT_READY => {
                    if slot.packed.load(Ordering::Acquire) == packed {
                        return true;
                    }
                }
                SLOT_EMPTY => {
                    if slot
                        .state
                        .compare_exchange(
                            SLOT_EMPTY,
                            SLOT_WRITING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        slot.packed.store(packed, Ordering::Relaxed);
                        slot.state.store(SLOT_READY, Ordering::Release);
                        return true;
                    }
                    // Another producer claimed this slot first; keep scanning.
                }
                _ => {}
            }
        }
        false
    }

    /// Consumer-only: index of the next pending slot at or after `from`.
    pub fn next_ready(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&i| self.slots[i].state.load(Ordering::Acquire) == SLOT_READY)
    }

    /// Consumer-only: wire length of a pending slot without draining it.
    pub fn peek_len(&self, index: usize) -> usize {
        let (_, len) = unpack(self.slots[index].packed.load(Ordering::Acquire));
        len
    }

    /// Consumer-only: copy the payload out and free the slot.
    ///
    /// The release store on the state flag is what allows producers to
    /// reuse the slot; it must happen after the payload copy, which the
    /// returned-by-value bytes guarantee.
    pub fn drain(&self, index: usize) -> ([u8; 3], usize) {
        let (bytes, len) = unpack(self.slots[index].packed.load(Ordering::Acquire));
        self.slots[index].state.store(SLOT_EMPTY, Ordering::Release);
        (bytes, len)
    }

    /// Number of currently pending messages (diagnostic; racy by nature).
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state.load(Ordering::Acquire) == SLOT_READY)
            .count()
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}
