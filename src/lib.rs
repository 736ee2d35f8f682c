//! hidkeys-midi - play MIDI from a HID keyboard
//!
//! Key presses from a generic HID keyboard-like device are mapped to
//! intervals and turned into MIDI note-on messages, either as direct
//! semitone offsets or quantized to a scale.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod midi;
pub mod scale;
