//! Melody notation for audible feedback
//!
//! A melody alternates notes and durations separated by `/`:
//! `"A4/0.5/-/0.5/A4/0.5/-"` plays A4 for half a second, pauses, then A4 again.
//! Durations are seconds. What a note token means depends on the buzzer:
//! - simple buzzer: `X` (on) and `-` (off) only
//! - tonal buzzer: `-` (silence), `X` (A4), note names (`C#5`, `Bb3`),
//!   frequencies containing a dot (`523.25`) or MIDI note numbers (`72`)

use serde::Deserialize;
use smallvec::SmallVec;
use std::time::Duration;
use thiserror::Error;

/// Concert pitch, MIDI note 69
const A4_HZ: f64 = 440.0;
const A4_MIDI: i32 = 69;

/// Kind of buzzer attached to the feedback pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuzzerKind {
    /// On/off buzzer driven by a plain GPIO line
    #[default]
    Buzzer,
    /// Buzzer that can play pitches, driven by PWM
    Tonal,
}

/// What the buzzer should sound
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tone {
    On,
    Hz(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MelodyStep {
    /// Set the buzzer output; `None` silences it
    Sound(Option<Tone>),
    Wait(Duration),
}

#[derive(Debug, Error, PartialEq)]
pub enum MelodyError {
    #[error("a simple buzzer only supports X (on) and - (off), got {0:?}")]
    UnsupportedNote(String),
    #[error("invalid note {0:?}")]
    InvalidNote(String),
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
}

/// A parsed melody, ready to be played on a buzzer of the kind it was parsed for
#[derive(Debug, Clone, PartialEq)]
pub struct Melody {
    steps: SmallVec<[MelodyStep; 8]>,
}

impl Melody {
    pub fn parse(source: &str, kind: BuzzerKind) -> Result<Self, MelodyError> {
        let mut steps = SmallVec::new();

        for (i, part) in source.split('/').enumerate() {
            let part = part.trim();
            if i % 2 == 0 {
                let tone = match kind {
                    BuzzerKind::Buzzer => parse_switch(part)?,
                    BuzzerKind::Tonal => parse_tone(part)?,
                };
                steps.push(MelodyStep::Sound(tone));
            } else {
                steps.push(MelodyStep::Wait(parse_duration(part)?));
            }
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[MelodyStep] {
        &self.steps
    }

    /// Total time spent waiting while the melody plays
    pub fn duration(&self) -> Duration {
        self.steps
            .iter()
            .filter_map(|step| match step {
                MelodyStep::Wait(d) => Some(*d),
                MelodyStep::Sound(_) => None,
            })
            .sum()
    }
}

fn parse_switch(token: &str) -> Result<Option<Tone>, MelodyError> {
    match token {
        "X" => Ok(Some(Tone::On)),
        "-" => Ok(None),
        other => Err(MelodyError::UnsupportedNote(other.to_string())),
    }
}

fn parse_tone(token: &str) -> Result<Option<Tone>, MelodyError> {
    let invalid = || MelodyError::InvalidNote(token.to_string());

    if token == "-" {
        return Ok(None);
    }
    if token == "X" {
        return Ok(Some(Tone::Hz(A4_HZ)));
    }

    let first = token.chars().next().ok_or_else(invalid)?;
    let midi = if first.is_ascii_uppercase() {
        note_to_midi(token).ok_or_else(invalid)?
    } else if token.contains('.') {
        let hz: f64 = token.parse().map_err(|_| invalid())?;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(invalid());
        }
        return Ok(Some(Tone::Hz(hz)));
    } else {
        token.parse::<u8>().ok().filter(|m| *m <= 127).ok_or_else(invalid)? as i32
    };

    Ok(Some(Tone::Hz(midi_to_hz(midi))))
}

/// Note name such as `A4`, `C#5` or `Bb3` to a MIDI note number (`C4` = 60)
fn note_to_midi(name: &str) -> Option<i32> {
    let mut chars = name.chars().peekable();
    let base = match chars.next()? {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let accidental = match chars.peek() {
        Some('#') | Some('♯') => 1,
        Some('b') | Some('♭') => -1,
        _ => 0,
    };
    if accidental != 0 {
        chars.next();
    }

    let octave: String = chars.collect();
    if octave.len() != 1 {
        return None;
    }
    let octave = octave.parse::<i32>().ok()?;

    let midi = (octave + 1) * 12 + base + accidental;
    (0..=127).contains(&midi).then_some(midi)
}

fn midi_to_hz(midi: i32) -> f64 {
    A4_HZ * 2f64.powf((midi - A4_MIDI) as f64 / 12.0)
}

fn parse_duration(token: &str) -> Result<Duration, MelodyError> {
    let secs: f64 =
        token.parse().map_err(|_| MelodyError::InvalidDuration(token.to_string()))?;
    Duration::try_from_secs_f64(secs).map_err(|_| MelodyError::InvalidDuration(token.to_string()))
}
