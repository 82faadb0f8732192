// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Control-value producers: the knob/slider/key surface of the
//! virtual keyboard.
//!
//! Every method builds a fully-formed MIDI byte triple and stages it
//! in the outbox; no range validation happens here - out-of-range
//! values are the caller's responsibility. Submissions are safe from
//! any thread and never touch the audio thread directly.

use std::sync::Arc;

use tracing::debug;

use crate::midi::messages;
use crate::midi::Outbox;

/// Knob and key surface feeding the staging table.
pub struct ControlSurface {
    outbox: Arc<Outbox>,
    velocity: u8,
    bank: u8,
    program: u8,
}

impl ControlSurface {
    pub fn new(outbox: Arc<Outbox>) -> Self {
        Self {
            outbox,
            velocity: 127,
            bank: 0,
            program: 0,
        }
    }

    /// Note-on velocity used by [`note_on`](Self::note_on).
    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: u8) {
        self.velocity = velocity;
    }

    /// Outgoing MIDI channel. Pending messages keep the channel they
    /// were submitted with.
    pub fn channel(&self) -> u8 {
        self.outbox.channel()
    }

    pub fn set_channel(&self, channel: u8) {
        self.outbox.set_channel(channel);
    }

    fn submit(&self, status: u8, data1: u8, data2: u8, len: usize) -> bool {
        let accepted = self.outbox.submit(status, data1, data2, len);
        if !accepted {
            debug!(status, data1, "staging table full, message dropped");
        }
        accepted
    }

    pub fn note_on(&self, note: u8) -> bool {
        self.submit(messages::NOTE_ON, note, self.velocity, 3)
    }

    pub fn note_off(&self, note: u8) -> bool {
        self.submit(messages::NOTE_OFF, note, self.velocity, 3)
    }

    /// Pitch wheel position 0..=127; expanded to the 14-bit wire value.
    pub fn pitch_bend(&self, value: u8) -> bool {
        let change = 128u16 * value as u16;
        let low = (change & 0x7F) as u8;
        let high = ((change >> 7) & 0x7F) as u8;
        self.submit(messages::PITCH_BEND, low, high, 3)
    }

    pub fn mod_wheel(&self, value: u8) -> bool {
        self.submit(messages::CONTROL_CHANGE, messages::CC_MOD_WHEEL, value, 3)
    }

    pub fn detune(&self, value: u8) -> bool {
        self.submit(messages::CONTROL_CHANGE, messages::CC_DETUNE, value, 3)
    }

    pub fn attack(&self, value: u8) -> bool {
        self.submit(messages::CONTROL_CHANGE, messages::CC_ATTACK_TIME, value, 3)
    }

    pub fn release(&self, value: u8) -> bool {
        self.submit(messages::CONTROL_CHANGE, messages::CC_RELEASE_TIME, value, 3)
    }

    pub fn volume(&self, value: u8) -> bool {
        self.submit(messages::CONTROL_CHANGE, messages::CC_VOLUME, value, 3)
    }

    pub fn expression(&self, value: u8) -> bool {
        self.submit(messages::CONTROL_CHANGE, messages::CC_EXPRESSION, value, 3)
    }

    pub fn balance(&self, value: u8) -> bool {
        self.submit(messages::CONTROL_CHANGE, messages::CC_BALANCE, value, 3)
    }

    pub fn sustain(&self, on: bool) -> bool {
        let value = if on { 127 } else { 0 };
        self.submit(messages::CONTROL_CHANGE, messages::CC_SUSTAIN, value, 3)
    }

    pub fn sostenuto(&self, on: bool) -> bool {
        let value = if on { 127 } else { 0 };
        self.submit(messages::CONTROL_CHANGE, messages::CC_SOSTENUTO, value, 3)
    }

    /// Select a bank; re-sends the program change so the synth applies
    /// both together.
    pub fn bank_select(&mut self, bank: u8) -> bool {
        self.bank = bank;
        self.send_bank_and_program()
    }

    /// Select a program within the current bank.
    pub fn program_select(&mut self, program: u8) -> bool {
        self.program = program;
        self.send_bank_and_program()
    }

    fn send_bank_and_program(&self) -> bool {
        let bank = self.submit(messages::CONTROL_CHANGE, messages::CC_BANK_LSB, self.bank, 3);
        let program = self.submit(messages::PROGRAM_CHANGE, self.program, 0, 2);
        bank && program
    }

    /// Release everything that might still be sounding.
    pub fn all_notes_off(&self) -> bool {
        self.submit(messages::CONTROL_CHANGE, messages::CC_ALL_NOTES_OFF, 0, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_all(outbox: &Outbox) -> Vec<(Vec<u8>, usize)> {
        let mut drained = Vec::new();
        let mut from = 0;
        while let Some(i) = outbox.next_ready(from) {
            let (bytes, len) = outbox.drain(i);
            drained.push((bytes[..len].to_vec(), len));
            from = i + 1;
        }
        drained
    }

    #[test]
    fn test_note_on_off_use_velocity() {
        let outbox = Arc::new(Outbox::with_capacity(8));
        let mut surface = ControlSurface::new(Arc::clone(&outbox));
        surface.set_velocity(100);

        assert!(surface.note_on(60));
        assert!(surface.note_off(60));

        let drained = drain_all(&outbox);
        assert_eq!(drained[0].0, vec![0x90, 60, 100]);
        assert_eq!(drained[1].0, vec![0x80, 60, 100]);
    }

    #[test]
    fn test_channel_merged_into_messages() {
        let outbox = Arc::new(Outbox::with_capacity(8));
        let surface = ControlSurface::new(Arc::clone(&outbox));
        surface.set_channel(3);

        surface.mod_wheel(64);
        let drained = drain_all(&outbox);
        assert_eq!(drained[0].0, vec![0xB3, 1, 64]);
    }

    #[test]
    fn test_pitch_bend_splits_14_bits() {
        let outbox = Arc::new(Outbox::with_capacity(8));
        let surface = ControlSurface::new(Arc::clone(&outbox));

        // Center position: 64 * 128 = 8192 = 0x2000.
        surface.pitch_bend(64);
        let drained = drain_all(&outbox);
        assert_eq!(drained[0].0, vec![0xE0, 0x00, 0x40]);
    }

    #[test]
    fn test_bank_and_program_sent_together() {
        let outbox = Arc::new(Outbox::with_capacity(8));
        let mut surface = ControlSurface::new(Arc::clone(&outbox));

        assert!(surface.bank_select(2));
        let drained = drain_all(&outbox);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, vec![0xB0, 32, 2]);
        assert_eq!(drained[1].0, vec![0xC0, 0]);
        assert_eq!(drained[1].1, 2);

        assert!(surface.program_select(9));
        let drained = drain_all(&outbox);
        assert_eq!(drained[0].0, vec![0xB0, 32, 2]);
        assert_eq!(drained[1].0, vec![0xC0, 9]);
    }

    #[test]
    fn test_pedals_and_all_notes_off() {
        let outbox = Arc::new(Outbox::with_capacity(8));
        let surface = ControlSurface::new(Arc::clone(&outbox));

        surface.sustain(true);
        surface.sostenuto(false);
        surface.all_notes_off();

        let drained = drain_all(&outbox);
        assert_eq!(drained[0].0, vec![0xB0, 64, 127]);
        assert_eq!(drained[1].0, vec![0xB0, 66, 0]);
        assert_eq!(drained[2].0, vec![0xB0, 123, 0]);
    }

    #[test]
    fn test_full_outbox_reports_drop() {
        let outbox = Arc::new(Outbox::with_capacity(1));
        let surface = ControlSurface::new(Arc::clone(&outbox));

        assert!(surface.mod_wheel(1));
        assert!(!surface.volume(2));
    }
}
