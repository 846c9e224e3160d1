//! Envelope delivery.
//!
//! - **Transport**: the async seam every delivery backend implements
//! - **HttpTransport**: POSTs envelopes to the DSN's envelope endpoint
//! - **RecordingTransport**: keeps envelopes in memory
//! - **retry**: exponential backoff with jitter around any transport call

pub mod http;
pub mod recording;
pub mod retry;

pub use http::{HttpTransport, HttpTransportConfig};
pub use recording::{EnvelopeCallback, RecordingTransport};
pub use retry::{retry, RetryConfig, RetryableError};

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Envelope;

/// Abstract interface for envelope delivery backends
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one envelope. A single attempt; retries are the caller's concern.
    async fn send(&self, envelope: &Envelope) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
