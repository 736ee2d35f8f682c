//! Key layout lookup table
//!
//! Turns the config's `label -> key codes` description into a flat
//! `key code -> interval` table.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::config::KeyCodes;
use crate::device::KeyCode;
use crate::error::ConfigError;

/// Convert a textual interval label to a signed interval.
///
/// `minus` becomes a sign, `zero` becomes `0` and `plus` is dropped, so
/// `"minus3"` is -3, `"plus5"` is 5 and `"zero"` is 0.
pub fn parse_interval(label: &str) -> Result<i32, ConfigError> {
    let text = label
        .replacen("minus", "-", 1)
        .replacen("zero", "0", 1)
        .replacen("plus", "", 1);

    text.trim()
        .parse::<i32>()
        .map_err(|_| ConfigError::InvalidInterval(label.to_string()))
}

/// Read-only mapping from key code to interval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutTable {
    intervals: HashMap<KeyCode, i32>,
}

impl LayoutTable {
    /// Build the table. Labels are visited in map order; when two labels
    /// claim the same key the later one wins.
    pub fn build(layout: &BTreeMap<String, KeyCodes>) -> Result<Self, ConfigError> {
        let mut intervals = HashMap::new();

        for (label, codes) in layout {
            let interval = parse_interval(label)?;

            for spec in codes.specs() {
                let code = spec.resolve().ok_or_else(|| ConfigError::InvalidKeyCode {
                    label: label.clone(),
                    code: spec.to_string(),
                })?;

                if let Some(previous) = intervals.insert(code, interval) {
                    if previous != interval {
                        warn!(
                            "Key {} mapped twice, '{}' overrides interval {}",
                            code, label, previous
                        );
                    }
                }
            }
        }

        debug!("Layout table built with {} keys", intervals.len());
        Ok(Self { intervals })
    }

    /// Interval for a key, `None` when the key is unmapped
    pub fn interval(&self, code: KeyCode) -> Option<i32> {
        self.intervals.get(&code).copied()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

impl FromIterator<(KeyCode, i32)> for LayoutTable {
    fn from_iter<I: IntoIterator<Item = (KeyCode, i32)>>(iter: I) -> Self {
        Self {
            intervals: iter.into_iter().collect(),
        }
    }
}
