//! Integration tests for the Grocy client against a canned HTTP server

use scan_bridge::domain::StockAction;
use scan_bridge::io::{GrocyClient, GrocyError, StockApi};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Request line, headers (lowercased names) and body of one HTTP request
struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }
}

/// Serve one request with `status` and `body`, returning what the client sent
async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];

        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            raw.extend_from_slice(&chunk[..n]);
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        let content_length: usize = headers
            .iter()
            .find(|(n, _)| n == "content-length")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap_or(0);
        while raw.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            raw.extend_from_slice(&chunk[..n]);
        }
        let body_sent = String::from_utf8_lossy(&raw[header_end..]).to_string();

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();

        CapturedRequest { request_line, headers, body: body_sent }
    });

    (base_url, handle)
}

#[tokio::test]
async fn test_consume_posts_to_by_barcode_endpoint() {
    let (base_url, server) = serve_once(
        "200 OK",
        r#"[{"id": 91, "product_id": 4, "transaction_id": "5f2a", "amount": -1}]"#,
    )
    .await;
    let client = GrocyClient::new(&base_url, "secret-key", Duration::from_secs(5)).unwrap();

    let receipt = client.perform(StockAction::Consume, "4006381333931").await.unwrap();
    assert_eq!(receipt.product_id, "4");
    assert_eq!(receipt.transaction_id, "5f2a");

    let request = server.await.unwrap();
    assert_eq!(
        request.request_line,
        "POST /api/stock/products/by-barcode/4006381333931/consume HTTP/1.1"
    );
    assert_eq!(request.header("grocy-api-key"), Some("secret-key"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body, serde_json::json!({"amount": 1}));
}

#[tokio::test]
async fn test_unknown_barcode_is_status_error() {
    let (base_url, server) =
        serve_once("400 Bad Request", r#"{"error_message": "No product with barcode 999 found"}"#)
            .await;
    let client = GrocyClient::new(&base_url, "secret-key", Duration::from_secs(5)).unwrap();

    let err = client.perform(StockAction::Add, "999").await.unwrap_err();
    match err {
        GrocyError::Status { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("No product"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_empty_log_is_empty_response() {
    let (base_url, server) = serve_once("200 OK", "[]").await;
    let client = GrocyClient::new(&base_url, "secret-key", Duration::from_secs(5)).unwrap();

    let err = client.perform(StockAction::Open, "42").await.unwrap_err();
    assert!(matches!(err, GrocyError::EmptyResponse));
    server.await.unwrap();
}

#[tokio::test]
async fn test_non_json_success_is_decode_error() {
    let (base_url, server) = serve_once("200 OK", "<html>Bad Gateway</html>").await;
    let client = GrocyClient::new(&base_url, "secret-key", Duration::from_secs(5)).unwrap();

    let err = client.perform(StockAction::Consume, "42").await.unwrap_err();
    assert!(matches!(err, GrocyError::Decode(_)), "got {err:?}");
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = GrocyClient::new(&base_url, "secret-key", Duration::from_secs(2)).unwrap();
    let err = client.perform(StockAction::Add, "42").await.unwrap_err();
    assert!(matches!(err, GrocyError::Request(_)));
}
