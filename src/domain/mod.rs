//! Domain models - scan events, decisions, stock actions and melodies
//!
//! This module contains the canonical data types used throughout the system:
//! - `ScanEvent` - a barcode read reported by a feed
//! - `Decision` - a resolved single or double scan
//! - `StockAction` - the Grocy operation a decision maps to
//! - `Melody` - parsed buzzer notation for audible feedback

pub mod action;
pub mod melody;
pub mod scan;

pub use action::StockAction;
pub use melody::{BuzzerKind, Melody, MelodyError, MelodyStep, Tone};
pub use scan::{Decision, ScanEvent, ScanKind};
