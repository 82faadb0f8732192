// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! CLAVIATURE - Virtual MIDI keyboard engine.
//!
//! Moves MIDI events between a keyboard controller/UI and a realtime
//! audio callback, records everything that was sent, and plays the
//! captured take back in a loop. The realtime path never locks,
//! allocates, or blocks: outgoing messages travel through a lock-free
//! staging table, recorded events leave the audio thread through a
//! double-buffered hand-off to a background consolidator.

pub mod config;
pub mod control;
pub mod engine;
pub mod midi;
pub mod recording;
pub mod transport;
pub mod ui;

pub use config::EngineConfig;
pub use control::ControlSurface;
pub use engine::{Engine, OutputPort};
pub use midi::outbox::Outbox;
pub use midi::RawEvent;
pub use recording::{Consolidator, DoubleBuffer, TakeHandle, TimedEvent};
pub use transport::{Mode, Transport};
pub use ui::{note_feed, KeyMatrix, NoteEvent, NoteReceiver, NoteSender};
