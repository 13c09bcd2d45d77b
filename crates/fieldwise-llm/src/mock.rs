//! Scripted inference provider for tests and dry runs
//!
//! Rules match on a substring of the prompt, which lets a test target one
//! chunk by a marker in its text. Rules are checked in insertion order and
//! the first applicable one wins; prompts matching no rule get the default
//! response.

use fieldwise_domain::{
    InferenceError, InferenceProvider, InferenceRequest, InferenceResponse, TokenUsage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Behavior {
    Respond(String),
    Fail(InferenceError),
    FailTimes { remaining: usize, error: InferenceError },
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    behavior: Behavior,
}

/// Mock inference provider
///
/// Clones share rules, counters and the request log.
///
/// # Examples
///
/// ```
/// use fieldwise_llm::MockProvider;
/// use fieldwise_domain::InferenceError;
///
/// let mut provider = MockProvider::new("{}");
/// provider.add_response("chunk-a", r#"{"name": "Ada"}"#);
/// provider.add_error("chunk-b", InferenceError::Timeout);
/// provider.add_failures("chunk-c", 2, InferenceError::ConnectionFailure("reset".into()));
/// assert_eq!(provider.call_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockProvider {
    default_response: String,
    rules: Arc<Mutex<Vec<Rule>>>,
    requests: Arc<Mutex<Vec<InferenceRequest>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    latency: Duration,
}

impl MockProvider {
    /// Create a provider answering every prompt with `response`
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            default_response: response.into(),
            rules: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            latency: Duration::ZERO,
        }
    }

    /// Simulate backend latency on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer prompts containing `needle` with `response`
    pub fn add_response(&mut self, needle: impl Into<String>, response: impl Into<String>) {
        self.push_rule(needle.into(), Behavior::Respond(response.into()));
    }

    /// Fail every prompt containing `needle`
    pub fn add_error(&mut self, needle: impl Into<String>, error: InferenceError) {
        self.push_rule(needle.into(), Behavior::Fail(error));
    }

    /// Fail the first `times` prompts containing `needle`, then fall through
    /// to later rules or the default response
    pub fn add_failures(&mut self, needle: impl Into<String>, times: usize, error: InferenceError) {
        self.push_rule(
            needle.into(),
            Behavior::FailTimes {
                remaining: times,
                error,
            },
        );
    }

    /// Total number of invocations so far
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Number of invocations whose prompt contained `needle`
    pub fn calls_containing(&self, needle: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }

    /// Every request received, in arrival order
    pub fn requests(&self) -> Vec<InferenceRequest> {
        lock(&self.requests).clone()
    }

    /// Highest number of simultaneous in-flight calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Forget recorded requests and the in-flight high-water mark
    pub fn reset_call_count(&self) {
        lock(&self.requests).clear();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    fn push_rule(&mut self, needle: String, behavior: Behavior) {
        lock(&self.rules).push(Rule { needle, behavior });
    }

    fn reply_for(&self, prompt: &str) -> Result<String, InferenceError> {
        let mut rules = lock(&self.rules);
        for rule in rules.iter_mut() {
            if !prompt.contains(&rule.needle) {
                continue;
            }
            match &mut rule.behavior {
                Behavior::Respond(text) => return Ok(text.clone()),
                Behavior::Fail(error) => return Err(error.clone()),
                Behavior::FailTimes { remaining, error } => {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(error.clone());
                    }
                }
            }
        }
        Ok(self.default_response.clone())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("{}")
    }
}

impl InferenceProvider for MockProvider {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let _guard = InFlightGuard::enter(&self.in_flight, &self.max_in_flight);
        lock(&self.requests).push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let text = self.reply_for(&request.prompt)?;
        let token_usage = TokenUsage {
            prompt_tokens: (request.prompt.len() as u64).div_ceil(4),
            completion_tokens: (text.len() as u64).div_ceil(4),
        };
        Ok(InferenceResponse { text, token_usage })
    }
}

/// Tracks one in-flight call; decrements on drop so abandoned calls are
/// accounted for too
struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, max_in_flight: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> InferenceRequest {
        InferenceRequest {
            prompt: prompt.to_string(),
            model_name: "mock".to_string(),
            temperature: 0.0,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_default_response() {
        let provider = MockProvider::new("fixed");
        let response = provider.invoke(request("anything")).await.unwrap();
        assert_eq!(response.text, "fixed");
        assert!(response.token_usage.prompt_tokens > 0);
    }

    #[tokio::test]
    async fn test_specific_responses() {
        let mut provider = MockProvider::default();
        provider.add_response("alpha", "A");
        provider.add_response("beta", "B");

        assert_eq!(provider.invoke(request("x alpha x")).await.unwrap().text, "A");
        assert_eq!(provider.invoke(request("x beta x")).await.unwrap().text, "B");
        assert_eq!(provider.invoke(request("gamma")).await.unwrap().text, "{}");
    }

    #[tokio::test]
    async fn test_permanent_error() {
        let mut provider = MockProvider::default();
        provider.add_error("bad", InferenceError::Other("boom".into()));

        for _ in 0..3 {
            let result = provider.invoke(request("bad prompt")).await;
            assert!(matches!(result, Err(InferenceError::Other(_))));
        }
        assert_eq!(provider.calls_containing("bad"), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let mut provider = MockProvider::new("ok");
        provider.add_failures("flaky", 2, InferenceError::Timeout);

        assert_eq!(provider.invoke(request("flaky")).await, Err(InferenceError::Timeout));
        assert_eq!(provider.invoke(request("flaky")).await, Err(InferenceError::Timeout));
        assert_eq!(provider.invoke(request("flaky")).await.unwrap().text, "ok");
    }

    #[tokio::test]
    async fn test_transient_failures_fall_through_to_later_rule() {
        let mut provider = MockProvider::default();
        provider.add_failures("flaky", 1, InferenceError::Timeout);
        provider.add_response("flaky", "recovered");

        assert!(provider.invoke(request("flaky")).await.is_err());
        assert_eq!(provider.invoke(request("flaky")).await.unwrap().text, "recovered");
    }

    #[tokio::test]
    async fn test_call_count_and_reset() {
        let provider = MockProvider::new("x");
        provider.invoke(request("one")).await.unwrap();
        provider.invoke(request("two")).await.unwrap();
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.requests()[1].prompt, "two");

        provider.reset_call_count();
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let provider1 = MockProvider::new("x");
        let provider2 = provider1.clone();

        provider1.invoke(request("p")).await.unwrap();
        assert_eq!(provider2.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracks_concurrent_calls() {
        let provider = MockProvider::new("x").with_latency(Duration::from_millis(50));

        let (a, b, c) = tokio::join!(
            provider.invoke(request("a")),
            provider.invoke(request("b")),
            provider.invoke(request("c")),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(provider.max_in_flight(), 3);
    }
}
