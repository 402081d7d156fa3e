//! # Observer Abstraction
//!
//! Tracing and scoring sink for LLM extractions.
//!
//! ## The never-throws contract
//!
//! Observability must not change extraction outcomes. Every method on
//! [`Observer`] is infallible at the signature level; implementations
//! catch their own errors, log the first sink failure, and stay silent
//! afterwards. A broken tracer degrades to a no-op, never to a failed
//! extraction.
//!
//! ## Implementations
//!
//! - **LangfuseObserver**: batched ingestion into a Langfuse-compatible
//!   endpoint (production)
//! - **NoopObserver**: disabled observability and tests

mod langfuse;
mod noop;

pub use langfuse::LangfuseObserver;
pub use noop::NoopObserver;

use async_trait::async_trait;
use uuid::Uuid;

/// Attributes attached to a generation trace at start.
#[derive(Debug, Clone)]
pub struct GenerationAttrs {
    pub vendor_type: String,
    pub provider: String,
    pub template_version: String,
    pub page_count: u32,
}

/// Handle linking start/end/score calls for one generation.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    pub trace_id: Uuid,
    pub generation_id: Uuid,
}

impl GenerationHandle {
    fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            generation_id: Uuid::new_v4(),
        }
    }
}

/// Tracing/scoring capability around LLM calls.
///
/// Methods never fail and never panic; see the module docs.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Open a generation context. Always returns a usable handle.
    async fn start_generation(&self, name: &str, attrs: &GenerationAttrs) -> GenerationHandle;

    /// Close a generation with its output or an error message.
    async fn end_generation(
        &self,
        handle: &GenerationHandle,
        output: Option<&str>,
        error: Option<&str>,
    );

    /// Attach a named score (e.g. `confidence`) to a generation.
    async fn score(&self, handle: &GenerationHandle, name: &str, value: f64);

    /// Push buffered events to the sink. Safe to call at any time;
    /// binaries call it from a background task and once at shutdown.
    async fn flush(&self);
}
