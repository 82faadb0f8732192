// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! UI-facing state: the on-screen key matrix and the note feed that
//! carries key on/off edges out of the realtime thread.
//!
//! The engine never talks to a widget directly. It pushes note edges
//! into a bounded lock-free feed; a UI-side consumer drains the feed
//! at its own pace and applies the edges to a [`KeyMatrix`]. Overflow
//! drops notifications (and counts them) rather than ever blocking
//! the audio thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Default depth of the note feed. Deep enough for a dense block of
/// chord traffic between two UI refreshes.
pub const DEFAULT_FEED_DEPTH: usize = 128;

const KEY_WORDS: usize = 4;
const BITS_PER_WORD: usize = 32;

/// Fixed-size boolean set over the 128 MIDI note numbers.
///
/// Backed by an array of words with index-range dispatch, so a UI can
/// mirror held-key state without any per-key allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyMatrix {
    words: [u32; KEY_WORDS],
}

impl KeyMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear one key. Notes above 127 are ignored.
    pub fn set(&mut self, note: u8, on: bool) {
        if note as usize >= KEY_WORDS * BITS_PER_WORD {
            return;
        }
        let word = note as usize / BITS_PER_WORD;
        let bit = 1u32 << (note as usize % BITS_PER_WORD);
        if on {
            self.words[word] |= bit;
        } else {
            self.words[word] &= !bit;
        }
    }

    /// Whether a key is currently held.
    pub fn is_set(&self, note: u8) -> bool {
        if note as usize >= KEY_WORDS * BITS_PER_WORD {
            return false;
        }
        let word = note as usize / BITS_PER_WORD;
        self.words[word] & (1u32 << (note as usize % BITS_PER_WORD)) != 0
    }

    /// Release every key. Used when playback stops or the channel
    /// changes.
    pub fn clear(&mut self) {
        self.words = [0; KEY_WORDS];
    }

    /// Number of held keys.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over held note numbers in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = u8> + '_ {
        (0..(KEY_WORDS * BITS_PER_WORD) as u16)
            .map(|n| n as u8)
            .filter(move |&n| self.is_set(n))
    }
}

/// One key edge as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub note: u8,
    pub on: bool,
}

/// Realtime half of the note feed. `notify` never blocks.
pub struct NoteSender {
    tx: HeapProd<NoteEvent>,
    dropped: Arc<AtomicU64>,
}

impl NoteSender {
    /// Push a key edge toward the UI. Fire-and-forget: a full feed
    /// drops the edge and bumps the drop counter.
    pub fn notify(&mut self, note: u8, on: bool) {
        if self.tx.try_push(NoteEvent { note, on }).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Notifications lost to a full feed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle to the drop counter, for reporting from another
    /// thread.
    pub fn dropped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

/// UI half of the note feed.
pub struct NoteReceiver {
    rx: HeapCons<NoteEvent>,
}

impl NoteReceiver {
    /// Next pending edge, if any.
    pub fn try_recv(&mut self) -> Option<NoteEvent> {
        self.rx.try_pop()
    }

    /// Apply every pending edge to a key matrix. Returns how many
    /// edges were applied.
    pub fn drain_into(&mut self, matrix: &mut KeyMatrix) -> usize {
        let mut applied = 0;
        while let Some(event) = self.rx.try_pop() {
            matrix.set(event.note, event.on);
            applied += 1;
        }
        applied
    }
}

/// Build a bounded note feed of the given depth.
pub fn note_feed(depth: usize) -> (NoteSender, NoteReceiver) {
    let (tx, rx) = HeapRb::<NoteEvent>::new(depth.max(1)).split();
    (
        NoteSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        NoteReceiver { rx },
    )
}
