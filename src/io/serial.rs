//! Serial (USB-CDC / RS232) scanner feed
//!
//! Scanners in serial mode send one barcode per line, terminated by CR, LF
//! or CRLF. Blank lines are skipped.

use crate::domain::ScanEvent;
use crate::infra::metrics::Metrics;
use crate::io::feed::{forward, wait_for_shutdown};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info, warn};

const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Lines longer than this are discarded as line noise
const MAX_LINE_LEN: usize = 256;

pub struct SerialFeed {
    device: String,
    baud: u32,
    metrics: Arc<Metrics>,
    buffer: BytesMut,
}

/// Split complete lines off the front of `buffer`
///
/// A trailing partial line stays in the buffer for the next read.
fn drain_lines(buffer: &mut BytesMut) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(end) = buffer.iter().position(|b| *b == b'\r' || *b == b'\n') {
        let line = buffer.split_to(end + 1);
        let text = String::from_utf8_lossy(&line[..end]);
        let text = text.trim();
        if !text.is_empty() {
            lines.push(text.to_string());
        }
    }
    lines
}

impl SerialFeed {
    pub fn new(device: impl Into<String>, baud: u32, metrics: Arc<Metrics>) -> Self {
        Self { device: device.into(), baud, metrics, buffer: BytesMut::with_capacity(MAX_LINE_LEN) }
    }

    /// Read barcodes until shutdown or until the scan channel closes
    pub async fn run(mut self, scan_tx: mpsc::Sender<ScanEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(device = %self.device, baud = %self.baud, "serial_feed_started");

        loop {
            let port = tokio_serial::new(&self.device, self.baud).open_native_async();
            let mut port = match port {
                Ok(p) => {
                    self.metrics.record_feed_connect();
                    info!(device = %self.device, "feed_connected");
                    p
                }
                Err(e) => {
                    error!(device = %self.device, error = %e, "serial_port_open_failed");
                    tokio::select! {
                        _ = tokio::time::sleep(REOPEN_DELAY) => continue,
                        _ = wait_for_shutdown(&mut shutdown) => {
                            info!("serial_feed_shutdown");
                            return;
                        }
                    }
                }
            };
            self.buffer.clear();

            loop {
                let read = tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => {
                        info!("serial_feed_shutdown");
                        return;
                    }
                    read = port.read_buf(&mut self.buffer) => read,
                };

                match read {
                    Ok(0) => {
                        warn!(device = %self.device, "feed_disconnected");
                        break;
                    }
                    Ok(_) => {
                        for barcode in drain_lines(&mut self.buffer) {
                            if !forward(ScanEvent::new(barcode), &scan_tx).await {
                                return;
                            }
                        }
                        if self.buffer.len() > MAX_LINE_LEN {
                            self.metrics.record_feed_message_invalid();
                            warn!(bytes = %self.buffer.len(), "serial_line_too_long");
                            self.buffer.clear();
                        }
                    }
                    Err(e) => {
                        warn!(device = %self.device, error = %e, "feed_read_error");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(REOPEN_DELAY) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("serial_feed_shutdown");
                    return;
                }
            }
        }
    }
}
