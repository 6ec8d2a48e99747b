//! Grocy stock API client
//!
//! Applies stock actions through the by-barcode endpoints:
//! `POST {url}/api/stock/products/by-barcode/{barcode}/{add|consume|open}`
//! with body `{"amount": 1}`. Grocy answers with the stock log entries it
//! created; the first entry identifies the product and transaction.

use crate::domain::StockAction;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Deserializer};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const API_KEY_HEADER: &str = "GROCY-API-KEY";

#[derive(Debug, Error)]
pub enum GrocyError {
    #[error("invalid Grocy url {0:?}")]
    InvalidUrl(String),
    #[error("Grocy request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Grocy returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Grocy returned no stock log entries")]
    EmptyResponse,
    #[error("could not decode Grocy response: {0}")]
    Decode(serde_json::Error),
}

/// Identifies the stock booking Grocy made for an action
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StockReceipt {
    #[serde(deserialize_with = "deserialize_id")]
    pub product_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub transaction_id: String,
}

/// Grocy reports ids as numbers or strings depending on version
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct IdVisitor;

    impl<'de> Visitor<'de> for IdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer id")
        }

        fn visit_str<E>(self, value: &str) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

/// Parse the stock log entries returned by a by-barcode action
///
/// An empty log is `EmptyResponse`; anything that is not a log is `Decode`.
pub fn parse_receipt(body: &str) -> Result<StockReceipt, GrocyError> {
    let entries: Vec<StockReceipt> = serde_json::from_str(body).map_err(GrocyError::Decode)?;
    entries.into_iter().next().ok_or(GrocyError::EmptyResponse)
}

/// Inventory operations the dispatcher needs
#[async_trait]
pub trait StockApi: Send + Sync {
    async fn perform(&self, action: StockAction, barcode: &str) -> Result<StockReceipt, GrocyError>;
}

pub struct GrocyClient {
    base_url: Url,
    api_key: String,
    http: reqwest::Client,
}

impl GrocyClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, GrocyError> {
        let base_url =
            Url::parse(base_url).map_err(|_| GrocyError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(GrocyError::InvalidUrl(base_url.to_string()));
        }

        // Create HTTP client once for reuse (connection pooling)
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { base_url, api_key: api_key.into(), http })
    }

    /// Build the by-barcode endpoint; the barcode is encoded as one path segment
    pub fn endpoint(&self, action: StockAction, barcode: &str) -> Result<Url, GrocyError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GrocyError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "stock", "products", "by-barcode", barcode, action.as_path()]);
        Ok(url)
    }
}

#[async_trait]
impl StockApi for GrocyClient {
    async fn perform(&self, action: StockAction, barcode: &str) -> Result<StockReceipt, GrocyError> {
        let start = Instant::now();
        let url = self.endpoint(action, barcode)?;
        debug!(url = %url, "grocy_request");

        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "amount": 1 }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GrocyError::Status { status: status.as_u16(), body });
        }

        let receipt = parse_receipt(&body)?;

        info!(
            action = %action,
            barcode = %barcode,
            product_id = %receipt.product_id,
            transaction_id = %receipt.transaction_id,
            latency_ms = %start.elapsed().as_millis(),
            "stock_action_applied"
        );

        Ok(receipt)
    }
}
