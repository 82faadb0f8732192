// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Transport state shared between control threads and the realtime
//! callback.
//!
//! The transport is a small state machine (Idle / Recording / Playing)
//! plus the anchoring flags that control where delta timestamps are
//! measured from. Control threads write it, the audio thread reads it
//! once per block; everything is a plain atomic, so neither side ever
//! takes a lock.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::recording::TakeHandle;

/// Transport mode. Recording and Playing are mutually exclusive by
/// caller contract: starting one stops the other. The engine does not
/// enforce this itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Idle = 0,
    Recording = 1,
    Playing = 2,
}

impl Mode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Mode::Recording,
            2 => Mode::Playing,
            _ => Mode::Idle,
        }
    }
}

/// Shared transport flags.
///
/// Mode changes take effect at the next block boundary: the realtime
/// callback samples the mode once at the top of each block and never
/// mid-block.
pub struct Transport {
    mode: AtomicU8,
    fresh_take: AtomicBool,
    first_play: AtomicBool,
    cursor: AtomicUsize,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(Mode::Idle as u8),
            fresh_take: AtomicBool::new(true),
            first_play: AtomicBool::new(true),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Start a new recording session: the previous take is discarded
    /// and the timestamp clock re-anchors on the first block recorded.
    ///
    /// Caller contract: stop playback first if it is running.
    pub fn begin_record(&self, take: &TakeHandle) {
        take.clear();
        self.fresh_take.store(true, Ordering::Release);
        self.first_play.store(true, Ordering::Release);
        self.mode.store(Mode::Recording as u8, Ordering::Release);
    }

    /// Start looped playback of the consolidated take from its first
    /// entry.
    ///
    /// Caller contract: stop recording first if it is running.
    pub fn begin_play(&self) {
        self.first_play.store(true, Ordering::Release);
        self.cursor.store(0, Ordering::Relaxed);
        self.mode.store(Mode::Playing as u8, Ordering::Release);
    }

    /// Return to Idle. The previous mode is reported so the caller can
    /// run mode-specific teardown (all-notes-off when leaving Playing,
    /// final buffer hand-off happens on the audio thread when leaving
    /// Recording).
    pub fn stop(&self) -> Mode {
        self.first_play.store(true, Ordering::Release);
        Mode::from_u8(self.mode.swap(Mode::Idle as u8, Ordering::AcqRel))
    }

    /// Audio-thread only: consume the fresh-take flag. True exactly
    /// once per recording session, at which point the caller anchors
    /// the record clock.
    pub fn take_fresh_take(&self) -> bool {
        self.fresh_take.swap(false, Ordering::AcqRel)
    }

    /// Audio-thread only: consume the first-play flag. True exactly
    /// once per playback pass, at which point the caller anchors the
    /// playback clock and rewinds the cursor.
    pub fn take_first_play(&self) -> bool {
        self.first_play.swap(false, Ordering::AcqRel)
    }

    /// Playback cursor index into the take.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Audio-thread only: move the playback cursor.
    pub fn set_cursor(&self, index: usize) {
        self.cursor.store(index, Ordering::Relaxed);
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_starts_idle() {
        let transport = Transport::new();
        assert_eq!(transport.mode(), Mode::Idle);
        assert_eq!(transport.cursor(), 0);
    }

    #[test]
    fn test_begin_record_clears_take() {
        let take = TakeHandle::new();
        take.replace(vec![crate::recording::TimedEvent::new(
            0x90, 60, 100, 3, 0,
        )]);
        assert_eq!(take.len(), 1);

        let transport = Transport::new();
        transport.begin_record(&take);

        assert_eq!(transport.mode(), Mode::Recording);
        assert_eq!(take.len(), 0);
        assert!(transport.take_fresh_take());
        assert!(!transport.take_fresh_take());
    }

    #[test]
    fn test_begin_play_resets_cursor_and_anchor() {
        let transport = Transport::new();
        transport.set_cursor(7);
        // Consume the initial flag so the next assertion sees the
        // begin_play edge, not the constructor default.
        transport.take_first_play();

        transport.begin_play();
        assert_eq!(transport.mode(), Mode::Playing);
        assert_eq!(transport.cursor(), 0);
        assert!(transport.take_first_play());
        assert!(!transport.take_first_play());
    }

    #[test]
    fn test_stop_reports_previous_mode() {
        let transport = Transport::new();
        transport.begin_play();
        assert_eq!(transport.stop(), Mode::Playing);
        assert_eq!(transport.stop(), Mode::Idle);
        assert_eq!(transport.mode(), Mode::Idle);
    }
}
