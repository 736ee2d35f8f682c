//! Note engine
//!
//! Converts key presses into pitches. Two strategies share one interface:
//!
//! - [`NoteStrategy::Direct`] adds the mapped interval in semitones and
//!   ignores a key repeated without a release in between.
//! - [`NoteStrategy::Scale`] moves the interval in scale degrees, summing
//!   each traversed step, and never suppresses repeats.

use tracing::{debug, info};

use crate::device::{KeyCode, KeyboardReport};
use crate::layout::LayoutTable;
use crate::midi::{MidiSink, NoteOn};
use crate::scale::{Scale, MIDDLE_C};

/// How intervals are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteStrategy {
    Direct,
    Scale(Scale),
}

/// Pitch state for the whole run; survives reconnects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitchState {
    /// Unclamped; only truncated when encoded for the wire
    pub note: i64,
    /// Always `< scale.len()` for the scale strategy, 0 otherwise
    pub degree: usize,
    pub previous: Option<KeyCode>,
}

impl PitchState {
    pub fn new(note: i64) -> Self {
        Self {
            note,
            degree: 0,
            previous: None,
        }
    }
}

impl Default for PitchState {
    fn default() -> Self {
        Self::new(i64::from(MIDDLE_C))
    }
}

pub struct NoteEngine {
    layout: LayoutTable,
    strategy: NoteStrategy,
    pitch: PitchState,
}

impl NoteEngine {
    pub fn new(layout: LayoutTable, strategy: NoteStrategy, start_note: i32) -> Self {
        Self {
            layout,
            strategy,
            pitch: PitchState::new(i64::from(start_note)),
        }
    }

    pub fn pitch(&self) -> &PitchState {
        &self.pitch
    }

    pub fn strategy(&self) -> &NoteStrategy {
        &self.strategy
    }

    /// Handle one device report, forwarding any resulting note to `sink`
    pub fn process_report(
        &mut self,
        report: &KeyboardReport,
        sink: &mut dyn MidiSink,
    ) -> Option<NoteOn> {
        match report.primary() {
            None => {
                self.pitch.previous = None;
                None
            }
            Some(key) => {
                let note_on = self.process_key(key)?;
                sink.send(&note_on.encode());
                Some(note_on)
            }
        }
    }

    /// Apply a key press to the pitch state. Returns the note to play, or
    /// `None` when the key is unmapped, has a zero interval or is a
    /// suppressed repeat.
    pub fn process_key(&mut self, key: KeyCode) -> Option<NoteOn> {
        let Some(interval) = self.layout.interval(key) else {
            debug!("Ignoring unmapped key {}", key);
            return None;
        };

        let delta = match &self.strategy {
            NoteStrategy::Direct => {
                if interval == 0 || self.pitch.previous == Some(key) {
                    return None;
                }
                self.pitch.previous = Some(key);
                i64::from(interval)
            }
            NoteStrategy::Scale(scale) => {
                self.pitch.previous = Some(key);
                if interval == 0 {
                    return None;
                }
                let (delta, degree) = walk_scale(scale, self.pitch.degree, interval);
                self.pitch.degree = degree;
                delta
            }
        };

        self.pitch.note = self.pitch.note.saturating_add(delta);
        info!("> {}: {}", interval, self.pitch.note);
        Some(NoteOn::new(self.pitch.note))
    }
}

/// Move `steps` degrees through `scale` starting at `degree`. Returns the
/// semitone delta and the new degree.
pub fn walk_scale(scale: &Scale, degree: usize, steps: i32) -> (i64, usize) {
    let len = scale.len();
    let octave: i64 = scale.steps().iter().map(|s| i64::from(*s)).sum();

    // Whole cycles land on the same degree
    let mut delta = i64::from(steps) / len as i64 * octave;
    let remainder = steps.unsigned_abs() as usize % len;
    let mut degree = degree % len;

    if steps > 0 {
        for _ in 0..remainder {
            delta += i64::from(scale.step(degree));
            degree = (degree + 1) % len;
        }
    } else {
        for _ in 0..remainder {
            degree = (degree + len - 1) % len;
            delta -= i64::from(scale.step(degree));
        }
    }

    (delta, degree)
}
