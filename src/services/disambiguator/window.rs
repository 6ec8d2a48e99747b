//! Pairing-window state machine
//!
//! Pure logic: the caller supplies the clock. At most one barcode is pending
//! at a time. Windows are measured from when the consumer handles a scan,
//! not from when the feed saw it.

use crate::domain::{Decision, ScanEvent};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A barcode waiting for its confirming second scan
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    barcode: String,
    deadline: Instant,
}

/// Decides single vs. double scans from a sequence of scan arrivals
#[derive(Debug)]
pub struct ScanWindow {
    double_scan_enabled: bool,
    timeout: Duration,
    pending: Option<Pending>,
}

impl ScanWindow {
    pub fn new(double_scan_enabled: bool, timeout: Duration) -> Self {
        Self { double_scan_enabled, timeout, pending: None }
    }

    /// Feed one scan, judged at `now`
    ///
    /// A scan handled exactly at the deadline still pairs. A scan handled
    /// after it resolves the pending barcode as single and opens a new window,
    /// which covers a late poll of the deadline timer.
    pub fn on_scan(&mut self, event: ScanEvent, now: Instant) -> Option<Decision> {
        let barcode = event.barcode;

        if !self.double_scan_enabled {
            return Some(Decision::single(barcode));
        }

        let Some(pending) = self.pending.take() else {
            self.open(barcode, now);
            return None;
        };

        if now <= pending.deadline && pending.barcode == barcode {
            debug!(barcode = %barcode, "scan_paired");
            return Some(Decision::double(barcode));
        }

        debug!(
            pending = %pending.barcode,
            barcode = %barcode,
            expired = now > pending.deadline,
            "scan_window_replaced"
        );
        self.open(barcode, now);
        Some(Decision::single(pending.barcode))
    }

    /// Restart the pending window at `now`
    ///
    /// The consumer calls this once the decision that displaced the previous
    /// barcode has been dispatched, so the new window starts counting when
    /// the machine is actually waiting for it.
    pub fn rearm(&mut self, now: Instant) {
        if let Some(pending) = self.pending.as_mut() {
            pending.deadline = now + self.timeout;
        }
    }

    /// Resolve the pending barcode as single if its deadline has passed
    pub fn on_deadline(&mut self, now: Instant) -> Option<Decision> {
        match &self.pending {
            Some(pending) if now >= pending.deadline => {
                self.pending.take().map(|p| Decision::single(p.barcode))
            }
            _ => None,
        }
    }

    /// Resolve whatever is pending, used when the feed ends
    pub fn flush(&mut self) -> Option<Decision> {
        self.pending.take().map(|p| Decision::single(p.barcode))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn pending_barcode(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.barcode.as_str())
    }

    pub fn double_scan_enabled(&self) -> bool {
        self.double_scan_enabled
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn open(&mut self, barcode: String, at: Instant) {
        self.pending = Some(Pending { barcode, deadline: at + self.timeout });
    }
}
