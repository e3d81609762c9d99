//! LLM invoker abstraction
//!
//! The orchestration core consumes the [`LlmInvoker`] capability; provider
//! specifics stay behind it. [`AnthropicInvoker`] is the reference
//! implementation, [`RecordingInvoker`] decorates any invoker with replay
//! files, and [`mock::MockInvoker`] scripts deterministic test runs.

use std::sync::Arc;

use tracing::debug;

mod anthropic;
pub mod client;
mod error;
mod recorder;
mod types;

pub use anthropic::AnthropicInvoker;
pub use client::{LlmInvoker, mock};
pub use error::LlmError;
pub use recorder::RecordingInvoker;
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, Role, StopReason, TokenUsage,
    ToolCall, ToolDefinition,
};

use crate::config::LlmConfig;

/// Create an invoker based on the provider specified in config
pub fn create_invoker(config: &LlmConfig) -> Result<Arc<dyn LlmInvoker>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_invoker: called");
    match config.provider.as_str() {
        "anthropic" => {
            debug!("create_invoker: creating Anthropic invoker");
            Ok(Arc::new(AnthropicInvoker::from_config(config)?))
        }
        other => {
            debug!(provider = %other, "create_invoker: unknown provider");
            Err(LlmError::InvalidResponse(format!(
                "Unknown LLM provider: '{}'. Supported: anthropic",
                other
            )))
        }
    }
}
