//! Prometheus metrics HTTP endpoint
//!
//! Exposes bridge metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Write a histogram metric with cumulative buckets, sum and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum {sum}");
    let _ = writeln!(output, "{name}_count {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary) -> String {
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "scan_bridge_scans_total",
        "Scans received from the feed",
        MetricType::Counter,
        summary.scans_received,
    );

    let _ = writeln!(output, "# HELP scan_bridge_decisions_total Decisions emitted by scan kind");
    let _ = writeln!(output, "# TYPE scan_bridge_decisions_total counter");
    let _ = writeln!(output, "scan_bridge_decisions_total{{kind=\"single\"}} {}", summary.decisions_single);
    let _ = writeln!(output, "scan_bridge_decisions_total{{kind=\"double\"}} {}", summary.decisions_double);

    write_metric(
        &mut output,
        "scan_bridge_decisions_flushed_total",
        "Pending scans resolved at shutdown",
        MetricType::Counter,
        summary.decisions_flushed,
    );
    write_metric(
        &mut output,
        "scan_bridge_dispatch_failures_total",
        "Dispatches that returned an error",
        MetricType::Counter,
        summary.dispatch_failures,
    );
    write_histogram(
        &mut output,
        "scan_bridge_dispatch_latency_ms",
        "Dispatch latency in milliseconds",
        &summary.dispatch_latency_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.dispatch_latency_sum_ms,
    );
    write_metric(
        &mut output,
        "scan_bridge_dispatch_latency_max_ms",
        "Maximum dispatch latency",
        MetricType::Gauge,
        summary.dispatch_latency_max_ms,
    );
    write_metric(
        &mut output,
        "scan_bridge_feed_connects_total",
        "Successful feed (re)connects",
        MetricType::Counter,
        summary.feed_connects,
    );
    write_metric(
        &mut output,
        "scan_bridge_feed_messages_invalid_total",
        "Feed messages that could not be decoded",
        MetricType::Counter,
        summary.feed_messages_invalid,
    );

    output
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut response =
                text_response(StatusCode::OK, format_prometheus_metrics(&metrics.report()));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    serve(listener, metrics, &mut shutdown).await;
    Ok(())
}

async fn serve(listener: TcpListener, metrics: Arc<Metrics>, shutdown: &mut watch::Receiver<bool>) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "prometheus_metrics_server_started");
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, metrics.clone()));

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = crate::io::feed::wait_for_shutdown(shutdown) => {
                info!("prometheus_metrics_server_shutdown");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ScanKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_scan_received();
        metrics.record_scan_received();
        metrics.record_decision(ScanKind::Double);
        metrics.record_dispatch(15, false);
        metrics.record_dispatch(3000, true);

        let output = format_prometheus_metrics(&metrics.report());

        assert!(output.contains("scan_bridge_scans_total 2\n"));
        assert!(output.contains("scan_bridge_decisions_total{kind=\"double\"} 1\n"));
        assert!(output.contains("scan_bridge_decisions_total{kind=\"single\"} 0\n"));
        assert!(output.contains("scan_bridge_dispatch_failures_total 1\n"));
        assert!(output.contains("scan_bridge_dispatch_latency_ms_bucket{le=\"10\"} 0\n"));
        assert!(output.contains("scan_bridge_dispatch_latency_ms_bucket{le=\"20\"} 1\n"));
        assert!(output.contains("scan_bridge_dispatch_latency_ms_bucket{le=\"+Inf\"} 2\n"));
        assert!(output.contains("scan_bridge_dispatch_latency_ms_sum 3015\n"));
        assert!(output.contains("scan_bridge_dispatch_latency_ms_count 2\n"));
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_server_routes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = Arc::new(Metrics::new());
        metrics.record_scan_received();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let server = tokio::spawn(async move { serve(listener, metrics, &mut shutdown_rx).await });

        let health = get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("ok"));

        let scrape = get(addr, "/metrics").await;
        assert!(scrape.contains("scan_bridge_scans_total 1"));

        let missing = get(addr, "/nope").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
