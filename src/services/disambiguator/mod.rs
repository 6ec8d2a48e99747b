//! Scan disambiguation and decision dispatch loop
//!
//! The Disambiguator is the single consumer of the scan channel. It drives
//! the pairing window, races the next scan against the pending deadline and
//! hands each decision to the dispatcher before reading further scans.

mod window;

pub use window::ScanWindow;

use crate::domain::{Decision, ScanEvent};
use crate::infra::metrics::Metrics;
use crate::services::dispatcher::Dispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

/// What woke the loop up
enum Wake {
    Scan(Option<ScanEvent>),
    Deadline(Instant),
}

/// Owns the pairing window and dispatches decisions in resolution order
pub struct Disambiguator<D> {
    window: ScanWindow,
    dispatcher: D,
    metrics: Arc<Metrics>,
}

impl<D: Dispatcher> Disambiguator<D> {
    pub fn new(
        double_scan_enabled: bool,
        timeout: Duration,
        dispatcher: D,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { window: ScanWindow::new(double_scan_enabled, timeout), dispatcher, metrics }
    }

    /// Consume scans until every sender is dropped, then flush the pending scan
    pub async fn run(&mut self, mut scan_rx: mpsc::Receiver<ScanEvent>) {
        info!(
            double_scan_enabled = %self.window.double_scan_enabled(),
            timeout_ms = %self.window.timeout().as_millis(),
            "disambiguator_started"
        );

        loop {
            let wake = match self.window.deadline() {
                Some(deadline) => {
                    tokio::select! {
                        // Scans win ties with the deadline
                        biased;
                        event = scan_rx.recv() => Wake::Scan(event),
                        _ = sleep_until(deadline) => Wake::Deadline(deadline),
                    }
                }
                None => Wake::Scan(scan_rx.recv().await),
            };

            match wake {
                Wake::Scan(Some(event)) => self.handle_scan(event, Instant::now()).await,
                Wake::Scan(None) => {
                    if let Some(decision) = self.window.flush() {
                        info!(barcode = %decision.barcode, "scan_flushed_on_close");
                        self.metrics.record_flush();
                        self.emit(decision).await;
                    }
                    break;
                }
                Wake::Deadline(deadline) => {
                    // A scan queued in the same tick still counts as a second scan
                    match scan_rx.try_recv() {
                        Ok(event) => self.handle_scan(event, deadline).await,
                        Err(_) => {
                            debug!("scan_window_expired");
                            if let Some(decision) = self.window.on_deadline(deadline) {
                                self.emit(decision).await;
                            }
                        }
                    }
                }
            }
        }

        info!("disambiguator_stopped");
    }

    async fn handle_scan(&mut self, event: ScanEvent, now: Instant) {
        self.metrics.record_scan_received();
        info!(
            barcode = %event.barcode,
            device = event.device.as_deref().unwrap_or("-"),
            pending = self.window.pending_barcode().unwrap_or("-"),
            queued_ms = %now.saturating_duration_since(event.observed_at).as_millis(),
            "scan_received"
        );

        if let Some(decision) = self.window.on_scan(event, now) {
            self.emit(decision).await;
            // A barcode left pending by a mismatch starts its window now
            self.window.rearm(Instant::now());
        }
    }

    /// Dispatch one decision; failures are logged and never alter the window
    async fn emit(&mut self, decision: Decision) {
        info!(barcode = %decision.barcode, kind = %decision.kind, "scan_decided");
        self.metrics.record_decision(decision.kind);

        let start = Instant::now();
        let result = self.dispatcher.dispatch(&decision).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_dispatch(latency_ms, result.is_err());

        if let Err(e) = result {
            error!(
                barcode = %decision.barcode,
                kind = %decision.kind,
                error = %e,
                latency_ms = %latency_ms,
                "dispatch_failed"
            );
        }
    }
}
