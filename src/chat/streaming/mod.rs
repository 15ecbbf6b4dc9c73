//! Streaming ingestion: request lifecycle and delta cleanup.

pub mod pipeline;
pub mod sanitize;

pub use pipeline::{ERROR_NOTICE, NO_RESPONSE_NOTICE, SendOutcome, SendRequest};
pub use sanitize::{Sanitizer, TRUNCATION_MARKER};
