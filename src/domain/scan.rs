//! Scan events and disambiguation decisions

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A single barcode read reported by a feed
#[derive(Debug, Clone)]
pub struct ScanEvent {
    /// Barcode value as reported by the scanner
    pub barcode: String,
    /// When the feed decoded the event. Only used to log how long a scan
    /// queued; pairing windows follow the consumer's clock.
    pub observed_at: Instant,
    /// Scanner-side timestamp (epoch ms), advisory only
    pub source_time_ms: Option<u64>,
    /// Name of the reporting device, if the feed provides one
    pub device: Option<String>,
}

impl ScanEvent {
    pub fn new(barcode: impl Into<String>) -> Self {
        Self {
            barcode: barcode.into(),
            observed_at: Instant::now(),
            source_time_ms: None,
            device: None,
        }
    }

    pub fn with_observed_at(mut self, at: Instant) -> Self {
        self.observed_at = at;
        self
    }

    pub fn with_source_time_ms(mut self, ms: u64) -> Self {
        self.source_time_ms = Some(ms);
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// Whether a barcode was scanned once or twice within the pairing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    Single,
    Double,
}

impl ScanKind {
    /// Number of scan events a decision of this kind accounts for
    pub fn event_count(self) -> usize {
        match self {
            ScanKind::Single => 1,
            ScanKind::Double => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanKind::Single => "single",
            ScanKind::Double => "double",
        }
    }
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved scan: one barcode and how many times it was scanned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub barcode: String,
    pub kind: ScanKind,
}

impl Decision {
    pub fn single(barcode: impl Into<String>) -> Self {
        Self { barcode: barcode.into(), kind: ScanKind::Single }
    }

    pub fn double(barcode: impl Into<String>) -> Self {
        Self { barcode: barcode.into(), kind: ScanKind::Double }
    }
}
