use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::protocol::{BackendUpdate, FrontendUpdate};

pub mod mock;

pub use mock::{Gate, RecordedRequest, ScriptedTransport};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("transport io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunks of one backend response, in arrival order.
pub type ResponseStream = BoxStream<'static, Result<BackendUpdate, TransportError>>;

/// Moves a frontend update to the backend bound to `route` and returns the
/// streamed response.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn render(
        &self,
        route: &str,
        request: FrontendUpdate,
    ) -> Result<ResponseStream, TransportError>;
}
