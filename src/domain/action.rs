//! Stock actions that a decided scan can trigger

use serde::Deserialize;
use std::str::FromStr;

/// Grocy stock operation applied to the product behind a barcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum StockAction {
    Add,
    Consume,
    Open,
}

impl StockAction {
    /// Path segment used by the by-barcode stock endpoints
    pub fn as_path(self) -> &'static str {
        match self {
            StockAction::Add => "add",
            StockAction::Consume => "consume",
            StockAction::Open => "open",
        }
    }
}

impl std::fmt::Display for StockAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_path())
    }
}

impl FromStr for StockAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADD" => Ok(StockAction::Add),
            "CONSUME" => Ok(StockAction::Consume),
            "OPEN" => Ok(StockAction::Open),
            other => Err(format!("unknown stock action {other:?}, expected ADD, CONSUME or OPEN")),
        }
    }
}

impl TryFrom<String> for StockAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
