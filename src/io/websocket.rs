//! barcode-server websocket feed
//!
//! Connects with a `Client-ID` header (and `X-Auth-Token` when configured),
//! forwards every scan message and reconnects with exponential backoff.

use crate::domain::ScanEvent;
use crate::infra::metrics::Metrics;
use crate::io::feed::{forward_payload, wait_for_shutdown, FeedError};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WebsocketFeedConfig {
    pub url: String,
    pub client_id: String,
    pub auth_token: Option<String>,
}

/// Why a connection stopped being read
enum SessionEnd {
    Shutdown,
    ChannelClosed,
    Disconnected,
}

pub struct WebsocketFeed {
    config: WebsocketFeedConfig,
    metrics: Arc<Metrics>,
}

impl WebsocketFeed {
    pub fn new(config: WebsocketFeedConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics }
    }

    /// Run until shutdown or until the scan channel closes
    pub async fn run(self, scan_tx: mpsc::Sender<ScanEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown.borrow() {
                info!("websocket_feed_shutdown");
                return;
            }

            match self.connect().await {
                Ok(stream) => {
                    backoff = INITIAL_BACKOFF;
                    self.metrics.record_feed_connect();
                    info!(url = %self.config.url, client_id = %self.config.client_id, "feed_connected");

                    match self.read_scans(stream, &scan_tx, &mut shutdown).await {
                        SessionEnd::Shutdown => {
                            info!("websocket_feed_shutdown");
                            return;
                        }
                        SessionEnd::ChannelClosed => return,
                        SessionEnd::Disconnected => {
                            warn!(url = %self.config.url, "feed_disconnected");
                        }
                    }
                }
                Err(e) => {
                    error!(url = %self.config.url, error = %e, backoff_ms = %backoff.as_millis(), "feed_connect_failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("websocket_feed_shutdown");
                    return;
                }
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn connect(&self) -> Result<WsStream, FeedError> {
        let mut request = self.config.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Client-ID",
            HeaderValue::from_str(&self.config.client_id)
                .map_err(|_| FeedError::InvalidHeader("Client-ID"))?,
        );
        if let Some(token) = &self.config.auth_token {
            headers.insert(
                "X-Auth-Token",
                HeaderValue::from_str(token).map_err(|_| FeedError::InvalidHeader("X-Auth-Token"))?,
            );
        }

        let (stream, _response) = connect_async(request).await?;
        Ok(stream)
    }

    async fn read_scans(
        &self,
        mut stream: WsStream,
        scan_tx: &mpsc::Sender<ScanEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => {
                    let _ = stream.close(None).await;
                    return SessionEnd::Shutdown;
                }
                message = stream.next() => {
                    let forwarded = match message {
                        Some(Ok(Message::Text(text))) => {
                            forward_payload(text.as_bytes(), scan_tx, &self.metrics).await
                        }
                        Some(Ok(Message::Binary(data))) => {
                            forward_payload(&data, scan_tx, &self.metrics).await
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "feed_closed_by_server");
                            return SessionEnd::Disconnected;
                        }
                        // tungstenite queues pongs for pings on its own
                        Some(Ok(_)) => true,
                        Some(Err(e)) => {
                            warn!(error = %e, "feed_read_error");
                            return SessionEnd::Disconnected;
                        }
                        None => return SessionEnd::Disconnected,
                    };
                    if !forwarded {
                        return SessionEnd::ChannelClosed;
                    }
                }
            }
        }
    }
}
