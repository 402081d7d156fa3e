//! Disabled observer used when observability is off and in tests.

use crate::{GenerationAttrs, GenerationHandle, Observer};
use async_trait::async_trait;

/// Observer that records nothing. Handles are still unique so log
/// correlation by trace id keeps working with observability disabled.
#[derive(Clone, Default)]
pub struct NoopObserver;

impl NoopObserver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Observer for NoopObserver {
    async fn start_generation(&self, _name: &str, _attrs: &GenerationAttrs) -> GenerationHandle {
        GenerationHandle::new()
    }

    async fn end_generation(
        &self,
        _handle: &GenerationHandle,
        _output: Option<&str>,
        _error: Option<&str>,
    ) {
    }

    async fn score(&self, _handle: &GenerationHandle, _name: &str, _value: f64) {}

    async fn flush(&self) {}
}
