//! Brain module: LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait used by the relevance filter and the
//! final selector, plus a scriptable mock for tests and offline runs.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Send a system + user prompt and return the text of the reply.
pub async fn ask(
    provider: &dyn LlmProvider,
    system: &str,
    user: String,
    temperature: f32,
    max_tokens: Option<usize>,
) -> Result<String, LlmError> {
    let request = CompletionRequest {
        messages: vec![Message::system(system), Message::user(user)],
        temperature,
        max_tokens,
        ..Default::default()
    };
    let response = provider.complete(request).await?;
    Ok(response.message.content)
}

type Handler = Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>;

/// A mock LLM provider for testing and development.
///
/// Answers from a queue of scripted replies, or from a handler closure that
/// sees each request. Every call is counted and its request retained.
pub struct MockLlmProvider {
    model: String,
    replies: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            replies: Mutex::new(VecDeque::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let owned = text.to_string();
        Self::with_handler(move |_| Ok(owned.clone()))
    }

    /// Create a MockLlmProvider whose reply is computed from each request.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_replies().push_back(Ok(response));
    }

    /// Queue a text reply.
    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    /// Queue an error for the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_replies().push_back(Err(error));
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn lock_replies(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<CompletionResponse, LlmError>>> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        let queued = self.lock_replies().pop_front();
        if let Some(reply) = queued {
            return reply;
        }
        match &self.handler {
            Some(handler) => handler(&request).map(|text| Self::text_response(&text)),
            None => Ok(Self::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_default_response() {
        let provider = MockLlmProvider::new();
        let response = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        assert!(response.text().contains("mock"));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_queued_responses() {
        let provider = MockLlmProvider::new();
        provider.queue_text("first");
        provider.queue_error(LlmError::Timeout { timeout_secs: 5 });
        provider.queue_text("second");

        let r1 = provider.complete(CompletionRequest::default()).await;
        assert_eq!(r1.unwrap().text(), "first");

        let r2 = provider.complete(CompletionRequest::default()).await;
        assert!(matches!(r2, Err(LlmError::Timeout { timeout_secs: 5 })));

        let r3 = provider.complete(CompletionRequest::default()).await;
        assert_eq!(r3.unwrap().text(), "second");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_provider_handler_sees_request() {
        let provider = MockLlmProvider::with_handler(|req| {
            let last = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("echo: {last}"))
        });
        let reply = ask(&provider, "system", "ping".to_string(), 0.0, None)
            .await
            .unwrap();
        assert_eq!(reply, "echo: ping");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].temperature, 0.0);
    }

    #[tokio::test]
    async fn test_queue_takes_priority_over_handler() {
        let provider = MockLlmProvider::with_response("handler");
        provider.queue_text("queued");
        let first = ask(&provider, "s", "u".into(), 0.0, None).await.unwrap();
        let second = ask(&provider, "s", "u".into(), 0.0, None).await.unwrap();
        assert_eq!(first, "queued");
        assert_eq!(second, "handler");
    }
}
