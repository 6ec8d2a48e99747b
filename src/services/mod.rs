//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `disambiguator` - Turns the scan stream into single/double decisions
//! - `dispatcher` - Maps decisions to Grocy stock actions
//! - `feedback` - Buzzer melodies around dispatch

pub mod disambiguator;
pub mod dispatcher;
pub mod feedback;

// Re-export commonly used types
pub use disambiguator::Disambiguator;
pub use dispatcher::{ActionDispatcher, DispatchError, Dispatcher};
pub use feedback::FeedbackDispatcher;
