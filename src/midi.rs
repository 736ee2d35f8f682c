//! MIDI output
//!
//! Note-on encoding and the sink the note engine writes to.

use anyhow::{anyhow, Context, Result};
use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use tracing::{debug, info, warn};

use crate::config::MidiConfig;

/// Note-on status byte on channel 1
pub const NOTE_ON: u8 = 0x90;

/// Velocity used for every emitted note
pub const MAX_VELOCITY: u8 = 127;

/// A note-on message. The note is kept unclamped; see [`NoteOn::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteOn {
    pub channel: u8,
    pub note: i64,
    pub velocity: u8,
}

impl NoteOn {
    pub fn new(note: i64) -> Self {
        Self {
            channel: 0,
            note,
            velocity: MAX_VELOCITY,
        }
    }

    /// Wire bytes. Notes outside 0-127 are not clamped and are truncated
    /// to a byte.
    pub fn encode(&self) -> [u8; 3] {
        [NOTE_ON | (self.channel & 0x0F), self.note as u8, self.velocity]
    }
}

/// Destination for outgoing MIDI bytes. Fire-and-forget.
pub trait MidiSink {
    fn send(&mut self, data: &[u8]);
}

/// `midir` backed sink
pub struct MidirSink {
    conn: MidiOutputConnection,
    port_name: String,
}

impl MidirSink {
    /// Connect to the configured output port, or publish a virtual one
    pub fn open(config: &MidiConfig) -> Result<Self> {
        let midi_out =
            MidiOutput::new(&config.client_name).context("Failed to create MIDI output")?;

        match &config.output_port {
            Some(pattern) => {
                let (port, port_name) = find_output_port(&midi_out, pattern)
                    .ok_or_else(|| anyhow!("Output port '{}' not found", pattern))?;
                Self::connect(midi_out, &port, port_name, &config.client_name)
            }
            None => Self::open_default(midi_out, &config.client_name),
        }
    }

    #[cfg(unix)]
    fn open_default(midi_out: MidiOutput, client_name: &str) -> Result<Self> {
        use midir::os::unix::VirtualOutput;

        let conn = midi_out
            .create_virtual(client_name)
            .map_err(|e| anyhow!("Failed to create virtual output port: {}", e))?;
        info!("Created virtual MIDI output '{}'", client_name);
        Ok(Self {
            conn,
            port_name: client_name.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn open_default(midi_out: MidiOutput, client_name: &str) -> Result<Self> {
        let port = midi_out
            .ports()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No MIDI output ports available"))?;
        let port_name = midi_out.port_name(&port)?;
        Self::connect(midi_out, &port, port_name, client_name)
    }

    fn connect(
        midi_out: MidiOutput,
        port: &MidiOutputPort,
        port_name: String,
        client_name: &str,
    ) -> Result<Self> {
        info!("Connecting to output port: {}", port_name);
        let conn = midi_out
            .connect(port, client_name)
            .map_err(|e| anyhow!("Failed to connect to output port: {}", e))?;
        Ok(Self { conn, port_name })
    }
}

impl MidiSink for MidirSink {
    fn send(&mut self, data: &[u8]) {
        debug!("MIDI -> {}: {}", self.port_name, format_hex(data));
        if let Err(e) = self.conn.send(data) {
            warn!("Failed to send MIDI to '{}': {}", self.port_name, e);
        }
    }
}

/// Find an output port by case-insensitive substring match
fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            if name.to_lowercase().contains(&pattern.to_lowercase()) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// List available MIDI output ports
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new("hidkeys-midi-scanner")?;

    let mut port_names = Vec::new();
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            port_names.push(name);
        }
    }

    Ok(port_names)
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_note_on() {
        assert_eq!(NoteOn::new(60).encode(), [144, 60, 127]);
        assert_eq!(NoteOn::new(127).encode(), [0x90, 127, 127]);
    }

    #[test]
    fn test_out_of_range_note_is_not_clamped() {
        let msg = NoteOn::new(130);
        assert_eq!(msg.note, 130);
        assert_eq!(msg.encode()[1], 130);

        let msg = NoteOn::new(-2);
        assert_eq!(msg.encode()[1], 254);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x90, 60, 127]), "90 3C 7F");
        assert_eq!(format_hex(&[]), "");
    }
}
