//! LlmInvoker trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM capability - each call is independent
///
/// This is the core abstraction the director, workers, and strategist
/// consume. No conversation state lives in the client; callers carry the
/// message history themselves, so a fresh invoker can always be substituted
/// (restart, test mock, recorded replay).
#[async_trait]
pub trait LlmInvoker: Send + Sync {
    /// Send a single completion request, blocking until complete
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

pub mod mock {
    //! Deterministic scripted invoker for unit and scenario tests

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted mock invoker
    ///
    /// Returns the queued responses in order; errors once exhausted. A
    /// response slot may also be a scripted failure.
    pub struct MockInvoker {
        responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
        call_count: AtomicUsize,
    }

    impl MockInvoker {
        pub fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(Ok).collect()),
                call_count: AtomicUsize::new(0),
            }
        }

        /// Build a mock from explicit per-call outcomes
        pub fn scripted(outcomes: Vec<Result<CompletionResponse, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(outcomes),
                call_count: AtomicUsize::new(0),
            }
        }

        /// Append another response to the script
        pub fn push(&self, response: CompletionResponse) {
            self.responses.lock().unwrap().push(Ok(response));
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmInvoker for MockInvoker {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if idx < responses.len() {
                // Replace the consumed slot so the vec keeps its indexing
                std::mem::replace(
                    &mut responses[idx],
                    Err(LlmError::InvalidResponse("mock response already consumed".to_string())),
                )
            } else {
                Err(LlmError::InvalidResponse("No more mock responses".to_string()))
            }
        }
    }

}
