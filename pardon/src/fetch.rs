//! The HTTP transport collaborator (spec.md §6, external to this engine):
//! `Engine::process` drives a [`Fetch`] implementation to actually send a
//! rendered request and hand back a response envelope, but owns none of the
//! networking itself.

use async_trait::async_trait;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::PardonEngineError;

/// Sends a rendered request and returns the response actually received.
/// Left unimplemented by this crate — tests and `pardon-cli` supply a stub
/// or a real HTTP client.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope, PardonEngineError>;
}

/// A [`Fetch`] that always returns a fixed response, for tests that only
/// want to exercise the render → match pipeline.
#[derive(Debug, Clone)]
pub struct StaticFetch {
    pub response: ResponseEnvelope,
}

#[async_trait]
impl Fetch for StaticFetch {
    async fn fetch(&self, _request: &RequestEnvelope) -> Result<ResponseEnvelope, PardonEngineError> {
        Ok(self.response.clone())
    }
}
