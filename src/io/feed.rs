//! Shared pieces of the scan feeds
//!
//! barcode-server publishes one JSON document per scan:
//! `{"id": "...", "date": "2024-05-01T10:00:00.123+00:00", "device": {"name": "..."}, "barcode": "4006381333931"}`
//! Only `barcode` is required.

use crate::domain::ScanEvent;
use crate::infra::metrics::Metrics;
use serde::Deserialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid scan message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
    #[error("scan message has an empty barcode")]
    EmptyBarcode,
    #[error("websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

#[derive(Debug, Deserialize)]
struct ScanMessage {
    barcode: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    device: Option<DeviceInfo>,
}

#[derive(Debug, Deserialize)]
struct DeviceInfo {
    #[serde(default)]
    name: Option<String>,
}

/// Parse RFC 3339 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .and_then(|dt| u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok())
}

/// Decode a barcode-server JSON message into a scan event
pub fn parse_scan_message(payload: &[u8]) -> Result<ScanEvent, FeedError> {
    let message: ScanMessage = serde_json::from_slice(payload)?;
    let barcode = message.barcode.trim();
    if barcode.is_empty() {
        return Err(FeedError::EmptyBarcode);
    }

    let mut event = ScanEvent::new(barcode);
    if let Some(ms) = message.date.as_deref().and_then(parse_iso_time) {
        event = event.with_source_time_ms(ms);
    }
    if let Some(name) = message.device.and_then(|d| d.name) {
        event = event.with_device(name);
    }
    Ok(event)
}

/// Decode a payload and push it to the disambiguator
///
/// Returns false once the scan channel is closed.
pub(crate) async fn forward_payload(
    payload: &[u8],
    scan_tx: &mpsc::Sender<ScanEvent>,
    metrics: &Metrics,
) -> bool {
    match parse_scan_message(payload) {
        Ok(event) => forward(event, scan_tx).await,
        Err(e) => {
            metrics.record_feed_message_invalid();
            warn!(error = %e, payload = %String::from_utf8_lossy(payload), "feed_message_invalid");
            true
        }
    }
}

pub(crate) async fn forward(event: ScanEvent, scan_tx: &mpsc::Sender<ScanEvent>) -> bool {
    debug!(barcode = %event.barcode, "feed_scan");
    if scan_tx.send(event).await.is_err() {
        warn!("scan_channel_closed");
        return false;
    }
    true
}

/// Resolve once shutdown is signalled or the signalling side is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_message() {
        let json = br#"{
            "id": "0b6c4f8e-2f55-4c3d-9c2a-0d3f1c1b9e11",
            "serverId": "kitchen-pi",
            "date": "2026-01-05T16:41:30.048+00:00",
            "device": {"name": "Honeywell Scanner", "path": "/dev/input/event3"},
            "barcode": "4006381333931"
        }"#;

        let event = parse_scan_message(json).unwrap();
        assert_eq!(event.barcode, "4006381333931");
        assert_eq!(event.device.as_deref(), Some("Honeywell Scanner"));
        let ms = event.source_time_ms.unwrap();
        assert!(ms > 1767000000000, "timestamp should be in 2026");
        assert!(ms < 1800000000000, "timestamp should be before 2027");
    }

    #[test]
    fn test_parse_minimal_message() {
        let event = parse_scan_message(br#"{"barcode": " 42 "}"#).unwrap();
        assert_eq!(event.barcode, "42");
        assert_eq!(event.source_time_ms, None);
        assert_eq!(event.device, None);
    }

    #[test]
    fn test_unparseable_date_is_ignored() {
        let event =
            parse_scan_message(br#"{"barcode": "42", "date": "2026-01-05 16:41:30"}"#).unwrap();
        assert_eq!(event.source_time_ms, None);
    }

    #[test]
    fn test_parse_invalid_messages() {
        assert!(matches!(parse_scan_message(b"not json"), Err(FeedError::InvalidMessage(_))));
        assert!(matches!(
            parse_scan_message(br#"{"device": {"name": "x"}}"#),
            Err(FeedError::InvalidMessage(_))
        ));
        assert!(matches!(parse_scan_message(br#"{"barcode": "  "}"#), Err(FeedError::EmptyBarcode)));
    }

    #[tokio::test]
    async fn test_forward_payload_skips_invalid() {
        let (scan_tx, mut scan_rx) = mpsc::channel(4);
        let metrics = Metrics::new();

        assert!(forward_payload(b"garbage", &scan_tx, &metrics).await);
        assert!(forward_payload(br#"{"barcode": "A"}"#, &scan_tx, &metrics).await);

        assert_eq!(scan_rx.recv().await.unwrap().barcode, "A");
        assert_eq!(metrics.report().feed_messages_invalid, 1);

        drop(scan_rx);
        assert!(!forward_payload(br#"{"barcode": "B"}"#, &scan_tx, &metrics).await);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut rx).await });
        tx.send(true).unwrap();
        waiter.await.unwrap();

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        wait_for_shutdown(&mut rx).await;
    }
}
