// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Loss-free capture of sent MIDI events and their consolidation into
//! a replayable take.
//!
//! The audio thread appends captured events to whichever record buffer
//! is currently active. When that buffer fills (or recording stops),
//! the roles swap and the filled buffer travels to the background
//! consolidator over a lock-free ring; drained buffers travel back the
//! same way for reuse. The consolidated take is published through an
//! `ArcSwap` so the audio thread can read it wait-free during
//! playback.

pub mod consolidator;

pub use consolidator::Consolidator;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::midi::note_edge;

/// Default capacity of each record buffer. Sized so the consolidator
/// always finishes draining one buffer before the other fills.
pub const DEFAULT_RECORD_CAPACITY: usize = 256;

/// One captured MIDI event with its relative timestamp.
///
/// `delta_frames` is the number of audio frames elapsed since the
/// previous recorded event, or since the take/playback anchor for the
/// first event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    len: u8,
    pub delta_frames: u64,
}

impl TimedEvent {
    pub fn new(status: u8, data1: u8, data2: u8, len: usize, delta_frames: u64) -> Self {
        Self {
            status,
            data1,
            data2,
            len: len as u8,
            delta_frames,
        }
    }

    /// Wire length in bytes (2 or 3).
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Payload as a fixed array; only the first `len()` bytes are wire
    /// data.
    pub fn bytes(&self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }

    /// Channel-filtered Note-On/Note-Off edge, as for live input.
    pub fn note_edge(&self, channel: u8) -> Option<(u8, bool)> {
        let bytes = self.bytes();
        note_edge(&bytes[..self.len()], channel)
    }
}

/// Bounded, append-only event buffer. Two of these circulate between
/// the audio thread and the consolidator; neither side ever holds both
/// at once.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    events: Vec<TimedEvent>,
    capacity: usize,
}

impl RecordBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event. Returns false (dropping the event) when the
    /// buffer is at capacity; callers swap buffers before that happens.
    pub fn push(&mut self, event: TimedEvent) -> bool {
        if self.events.len() >= self.capacity {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Shared handle to the consolidated take.
///
/// The consolidator is the only writer; the audio thread reads
/// immutable snapshots during playback. Swapping the inner `Arc` is
/// wait-free on the reader side.
#[derive(Clone)]
pub struct TakeHandle {
    inner: Arc<ArcSwap<Vec<TimedEvent>>>,
}

impl TakeHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Current take contents. The snapshot stays valid (and immutable)
    /// even if the consolidator publishes a newer one meanwhile.
    pub fn snapshot(&self) -> Arc<Vec<TimedEvent>> {
        self.inner.load_full()
    }

    /// Replace the take wholesale. Consolidator and control threads
    /// only.
    pub fn replace(&self, events: Vec<TimedEvent>) {
        self.inner.store(Arc::new(events));
    }

    /// Discard the take. Called when a new recording session starts.
    pub fn clear(&self) {
        self.inner.store(Arc::new(Vec::new()));
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }
}

impl Default for TakeHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Condvar the consolidator parks on. The audio thread only ever calls
/// `notify`, which never takes the lock.
pub(crate) struct Wakeup {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Wakeup {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        self.cv.notify_one();
    }

    /// Park until notified or the timeout elapses. Spurious returns
    /// are expected; the caller re-checks occupancy either way.
    pub(crate) fn wait(&self, timeout: Duration) {
        if let Ok(guard) = self.lock.lock() {
            let _ = self.cv.wait_timeout(guard, timeout);
        }
    }
}

/// Audio-thread half of the double-buffered hand-off.
pub struct DoubleBuffer {
    active: RecordBuffer,
    full_tx: HeapProd<RecordBuffer>,
    empty_rx: HeapCons<RecordBuffer>,
    wake: Arc<Wakeup>,
    overruns: Arc<AtomicU64>,
}

impl DoubleBuffer {
    /// Called by the audio thread when it observes the transport
    /// entering Recording: reclaim a drained buffer if the last stop
    /// handed the active one off, and start from empty.
    pub fn prepare(&mut self) {
        if self.active.capacity() == 0 {
            if let Some(buffer) = self.empty_rx.try_pop() {
                self.active = buffer;
            }
        }
        self.active.clear();
    }

    /// Append one captured event; swaps and signals the consolidator
    /// when the active buffer reaches capacity. Never blocks.
    pub fn push(&mut self, event: TimedEvent) {
        if !self.active.push(event) {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.active.is_full() {
            self.hand_off();
        }
    }

    /// Called by the audio thread when recording stops: whatever data
    /// remains unconsolidated is handed off. An earlier still-queued
    /// buffer keeps its place ahead of this one, so the take stays
    /// chronological.
    pub fn flush(&mut self) {
        if !self.active.is_empty() {
            self.hand_off();
        }
        self.wake.notify();
    }

    fn hand_off(&mut self) {
        // A pure buffer swap: the replacement comes from the return
        // ring, or is a zero-capacity placeholder when the
        // consolidator still owns the spare. No allocation either way.
        let replacement = match self.empty_rx.try_pop() {
            Some(buffer) => buffer,
            None => RecordBuffer::default(),
        };
        let full = std::mem::replace(&mut self.active, replacement);
        if self.full_tx.try_push(full).is_err() {
            // Unreachable with two buffers in flight; counted as loss
            // rather than crashing the audio thread.
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        self.wake.notify();
    }

    /// Events captured but lost because the consolidator fell behind.
    /// Stays at zero when buffer capacity is sized correctly.
    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Shared handle to the overrun counter, for reporting after the
    /// buffer has moved into the engine.
    pub fn overrun_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.overruns)
    }

    /// Occupancy of the buffer currently being filled.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

/// Build the record pipeline: the audio-thread half and the running
/// consolidator thread feeding `take`.
pub fn record_pipeline(capacity: usize, take: TakeHandle) -> (DoubleBuffer, Consolidator) {
    let (full_tx, full_rx) = HeapRb::<RecordBuffer>::new(4).split();
    let (mut empty_tx, empty_rx) = HeapRb::<RecordBuffer>::new(4).split();

    // The second buffer starts on the return ring as the spare.
    let _ = empty_tx.try_push(RecordBuffer::with_capacity(capacity));

    let wake = Arc::new(Wakeup::new());
    let consolidator = Consolidator::spawn(full_rx, empty_tx, take, Arc::clone(&wake));

    let double_buffer = DoubleBuffer {
        active: RecordBuffer::with_capacity(capacity),
        full_tx,
        empty_rx,
        wake,
        overruns: Arc::new(AtomicU64::new(0)),
    };
    (double_buffer, consolidator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn ev(n: u8, delta: u64) -> TimedEvent {
        TimedEvent::new(0x90, n, 100, 3, delta)
    }

    fn wait_for_take(take: &TakeHandle, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while take.len() < len && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_timed_event_accessors() {
        let event = TimedEvent::new(0x91, 60, 100, 3, 42);
        assert_eq!(event.len(), 3);
        assert_eq!(event.bytes(), [0x91, 60, 100]);
        assert_eq!(event.delta_frames, 42);
        assert_eq!(event.note_edge(1), Some((60, true)));
        assert_eq!(event.note_edge(0), None);
    }

    #[test]
    fn test_record_buffer_capacity() {
        let mut buffer = RecordBuffer::with_capacity(2);
        assert!(buffer.push(ev(1, 0)));
        assert!(!buffer.is_full());
        assert!(buffer.push(ev(2, 0)));
        assert!(buffer.is_full());
        assert!(!buffer.push(ev(3, 0)));
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.push(ev(4, 0)));
    }

    #[test]
    fn test_take_handle_snapshot_isolation() {
        let take = TakeHandle::new();
        take.replace(vec![ev(1, 0)]);

        let snapshot = take.snapshot();
        take.replace(vec![ev(2, 0), ev(3, 1)]);

        // The old snapshot is unaffected by the swap.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(take.len(), 2);

        take.clear();
        assert!(take.is_empty());
    }

    #[test]
    fn test_fill_to_capacity_hands_off_once() {
        let take = TakeHandle::new();
        let (mut buffer, consolidator) = record_pipeline(4, take.clone());

        for n in 0..4 {
            buffer.push(ev(n, n as u64));
        }
        // Capacity reached: the swap already happened and the active
        // buffer is the spare.
        assert_eq!(buffer.active_len(), 0);

        wait_for_take(&take, 4);
        assert_eq!(take.len(), 4);
        let snapshot = take.snapshot();
        assert_eq!(snapshot[0].data1, 0);
        assert_eq!(snapshot[3].data1, 3);

        consolidator.stop();
    }

    #[test]
    fn test_flush_drains_partial_buffer() {
        let take = TakeHandle::new();
        let (mut buffer, consolidator) = record_pipeline(256, take.clone());

        for n in 0..3 {
            buffer.push(ev(n, 0));
        }
        buffer.flush();

        wait_for_take(&take, 3);
        assert_eq!(take.len(), 3);
        assert_eq!(buffer.overrun_count(), 0);

        consolidator.stop();
    }

    #[test]
    fn test_three_hundred_events_two_hand_offs() {
        let take = TakeHandle::new();
        let (mut buffer, consolidator) = record_pipeline(256, take.clone());

        for n in 0..300u32 {
            buffer.push(TimedEvent::new(0x90, (n % 128) as u8, 100, 3, n as u64));
        }
        // First hand-off happened at 256; the remaining 44 are still
        // active until the stop flush.
        buffer.flush();

        wait_for_take(&take, 300);
        assert_eq!(take.len(), 300);
        assert_eq!(buffer.overrun_count(), 0);

        // Chronological order survived both hand-offs.
        let snapshot = take.snapshot();
        assert_eq!(snapshot[255].delta_frames, 255);
        assert_eq!(snapshot[256].delta_frames, 256);
        assert_eq!(snapshot[299].delta_frames, 299);

        consolidator.stop();
    }

    #[test]
    fn test_buffer_reusable_after_drain() {
        let take = TakeHandle::new();
        let (mut buffer, consolidator) = record_pipeline(2, take.clone());

        buffer.push(ev(1, 0));
        buffer.push(ev(2, 0));
        wait_for_take(&take, 2);

        // The drained buffer has returned; a second fill reuses it.
        buffer.push(ev(3, 0));
        buffer.push(ev(4, 0));
        wait_for_take(&take, 4);

        assert_eq!(take.len(), 4);
        assert_eq!(buffer.overrun_count(), 0);
        consolidator.stop();
    }
}
