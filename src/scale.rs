//! Musical scales and key-signature resolution
//!
//! A key signature is one letter `a`-`g`, an optional `sharp`/`flat`
//! modifier and a required `major`/`minor` mode, e.g. `fsharpminor`.
//! The token `twelvetone` selects the chromatic scale.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Middle C
pub const MIDDLE_C: i32 = 60;

/// A below middle C, the reference for letter offsets
const A_MINOR_ROOT: i32 = 57;

pub const MAJOR_STEPS: [u8; 7] = [2, 2, 1, 2, 2, 2, 1];
pub const MINOR_STEPS: [u8; 7] = [2, 1, 2, 2, 1, 2, 2];
pub const CHROMATIC_STEPS: [u8; 12] = [1; 12];

/// Cyclic sequence of semitone steps; `steps[d]` is the distance from
/// degree `d` to degree `d + 1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scale {
    steps: Vec<u8>,
}

impl Scale {
    pub fn new(steps: &[u8]) -> Self {
        debug_assert!(!steps.is_empty());
        debug_assert!(steps.iter().all(|s| *s > 0));
        Self {
            steps: steps.to_vec(),
        }
    }

    pub fn major() -> Self {
        Self::new(&MAJOR_STEPS)
    }

    pub fn minor() -> Self {
        Self::new(&MINOR_STEPS)
    }

    pub fn chromatic() -> Self {
        Self::new(&CHROMATIC_STEPS)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step size leaving `degree`
    pub fn step(&self, degree: usize) -> i32 {
        i32::from(self.steps[degree % self.steps.len()])
    }

    pub fn steps(&self) -> &[u8] {
        &self.steps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Sharp,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Major,
    Minor,
}

/// A parsed key signature token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySignature {
    TwelveTone,
    Diatonic {
        letter: char,
        modifier: Option<Modifier>,
        mode: Mode,
    },
}

impl FromStr for KeySignature {
    type Err = ConfigError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidKeySignature(token.to_string());

        if token == "twelvetone" {
            return Ok(KeySignature::TwelveTone);
        }

        let mut chars = token.chars();
        let letter = chars.next().filter(|c| ('a'..='g').contains(c)).ok_or_else(invalid)?;
        let mut rest = chars.as_str();

        let modifier = if let Some(r) = rest.strip_prefix("sharp") {
            rest = r;
            Some(Modifier::Sharp)
        } else if let Some(r) = rest.strip_prefix("flat") {
            rest = r;
            Some(Modifier::Flat)
        } else {
            None
        };

        let mode = match rest {
            "major" => Mode::Major,
            "minor" => Mode::Minor,
            _ => return Err(invalid()),
        };

        Ok(KeySignature::Diatonic {
            letter,
            modifier,
            mode,
        })
    }
}

impl fmt::Display for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySignature::TwelveTone => write!(f, "twelvetone"),
            KeySignature::Diatonic {
                letter,
                modifier,
                mode,
            } => {
                write!(f, "{}", letter)?;
                match modifier {
                    Some(Modifier::Sharp) => write!(f, "sharp")?,
                    Some(Modifier::Flat) => write!(f, "flat")?,
                    None => {}
                }
                match mode {
                    Mode::Major => write!(f, "major"),
                    Mode::Minor => write!(f, "minor"),
                }
            }
        }
    }
}

impl KeySignature {
    /// Scale and starting note for this signature
    pub fn resolve(&self) -> (Scale, i32) {
        match *self {
            KeySignature::TwelveTone => (Scale::chromatic(), MIDDLE_C),
            KeySignature::Diatonic {
                letter,
                modifier,
                mode,
            } => {
                let offset = (letter as u8 - b'a') as usize;
                let mut note = A_MINOR_ROOT
                    + MINOR_STEPS[..offset].iter().map(|s| i32::from(*s)).sum::<i32>();
                if note < MIDDLE_C {
                    note += 12;
                }
                match modifier {
                    Some(Modifier::Sharp) => note += 1,
                    Some(Modifier::Flat) => note -= 1,
                    None => {}
                }

                let scale = match mode {
                    Mode::Major => Scale::major(),
                    Mode::Minor => Scale::minor(),
                };
                (scale, note)
            }
        }
    }
}

/// Resolve a key-signature token; `None` means no signature was given
pub fn resolve(token: Option<&str>) -> Result<(Scale, i32), ConfigError> {
    match token {
        None => Ok(KeySignature::TwelveTone.resolve()),
        Some(token) => Ok(token.parse::<KeySignature>()?.resolve()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twelvetone() {
        let (scale, note) = resolve(Some("twelvetone")).unwrap();
        assert_eq!(note, 60);
        assert_eq!(scale.len(), 12);
        assert!(scale.steps().iter().all(|s| *s == 1));
        assert_eq!(resolve(None).unwrap(), (scale, 60));
    }

    #[test]
    fn test_c_major() {
        let (scale, note) = resolve(Some("cmajor")).unwrap();
        assert_eq!(note, 60);
        assert_eq!(scale, Scale::major());
    }

    #[test]
    fn test_letters_normalize_above_middle_c() {
        assert_starting_notes(&[
            ("aminor", 69),
            ("bminor", 71),
            ("cminor", 60),
            ("dmajor", 62),
            ("emajor", 64),
            ("fmajor", 65),
            ("gmajor", 67),
        ]);
    }

    #[test]
    fn test_modifiers() {
        assert_starting_notes(&[
            ("fsharpminor", 66),
            ("bflatmajor", 70),
            ("cflatmajor", 59),
            ("asharpminor", 70),
        ]);
        assert_eq!(resolve(Some("fsharpminor")).unwrap().0, Scale::minor());
    }

    #[test]
    fn test_invalid_tokens() {
        for token in [
            "",
            "hmajor",
            "c",
            "cmaj",
            "csharp",
            "cmajorx",
            "Cmajor",
            "csharpflatmajor",
            "twelve",
        ] {
            assert_eq!(
                resolve(Some(token)),
                Err(ConfigError::InvalidKeySignature(token.to_string())),
                "token {:?}",
                token
            );
        }
    }

    #[test]
    fn test_display_round_trips_token() {
        let sig: KeySignature = "dflatminor".parse().unwrap();
        assert_eq!(sig.to_string(), "dflatminor");
    }

    fn assert_starting_notes(cases: &[(&str, i32)]) {
        for (token, expected) in cases {
            let (_, note) = resolve(Some(token)).unwrap();
            assert_eq!(note, *expected, "starting note for {}", token);
        }
    }
}
