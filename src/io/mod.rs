//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `feed` - Scan message decoding shared by the feeds
//! - `websocket` - barcode-server websocket client
//! - `mqtt` - MQTT subscriber for scan messages
//! - `serial` - Line-oriented serial scanner input
//! - `grocy` - Grocy stock API client
//! - `buzzer` - GPIO/PWM buzzer output
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod buzzer;
pub mod feed;
pub mod grocy;
pub mod mqtt;
pub mod prometheus;
pub mod serial;
pub mod websocket;

// Re-export commonly used types
pub use buzzer::{Buzzer, SysfsBuzzer, SysfsPwmBuzzer};
pub use feed::{parse_scan_message, FeedError};
pub use grocy::{GrocyClient, GrocyError, StockApi, StockReceipt};
pub use mqtt::{start_mqtt_feed, MqttFeedConfig};
pub use serial::SerialFeed;
pub use websocket::{WebsocketFeed, WebsocketFeedConfig};
