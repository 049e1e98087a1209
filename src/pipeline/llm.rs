//! Vision-model transport: one image plus instructions in, text out.
//!
//! Both model tiers go through [`VisionModel`]. It owns transport concerns
//! only: message layout, per-call timeout, exponential-backoff retries on
//! provider errors, and usage accounting. Whether the text that comes back
//! is a usable classification or payload is decided by the caller.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient under concurrent load. Backoff is
//! `retry_backoff_ms * 2^(attempt-1)`: with 500 ms base and 2 retries the
//! wait sequence is 500 ms → 1 s.

use crate::config::ExtractionConfig;
use crate::usage::{Tier, UsageMeter};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A provider bound to one tier and its call settings.
#[derive(Clone)]
pub struct VisionModel {
    provider: Arc<dyn LLMProvider>,
    tier: Tier,
    usage: Arc<UsageMeter>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
}

impl VisionModel {
    /// Bind `provider` to `tier`, taking call settings from `config`.
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        tier: Tier,
        config: &ExtractionConfig,
        usage: Arc<UsageMeter>,
    ) -> Self {
        let max_tokens = match tier {
            Tier::Precheck => config.precheck_max_tokens,
            Tier::Extraction => config.max_tokens,
        };
        Self {
            provider,
            tier,
            usage,
            temperature: config.temperature,
            max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Send one system message and one user turn carrying `image`.
    ///
    /// Returns the raw response text, or the last transport error after all
    /// retries are spent.
    pub async fn complete(
        &self,
        page_num: usize,
        system: &str,
        user_text: &str,
        image: ImageData,
    ) -> Result<String, String> {
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(user_text, vec![image]),
        ];
        let options = self.options();
        let start = Instant::now();
        let mut last_err = String::from("no attempt made");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Page {}: {:?} retry {}/{} after {}ms",
                    page_num, self.tier, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.call_timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    self.usage.record(
                        self.tier,
                        response.prompt_tokens,
                        response.completion_tokens,
                    );
                    debug!(
                        "Page {}: {:?} {} input tokens, {} output tokens, {:?}",
                        page_num,
                        self.tier,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!(
                        "Page {}: {:?} attempt {} failed: {}",
                        page_num,
                        self.tier,
                        attempt + 1,
                        last_err
                    );
                }
                Err(_) => {
                    last_err = format!("timed out after {}s", self.call_timeout.as_secs());
                    warn!(
                        "Page {}: {:?} attempt {} {}",
                        page_num,
                        self.tier,
                        attempt + 1,
                        last_err
                    );
                }
            }
        }

        Err(last_err)
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

// ── JSON recovery ────────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)\n?```").unwrap());

/// Pull a JSON object out of a model response.
///
/// Accepts bare JSON, JSON inside a code fence, or JSON surrounded by prose
/// (first `{` to last `}`). Returns `Err` with a short reason otherwise.
pub fn extract_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty response".into());
    }

    let candidate = RE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);

    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return Ok(v);
    }

    match (candidate.find('{'), candidate.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str::<Value>(&candidate[start..=end]).map_err(|e| e.to_string())
        }
        _ => Err(format!("no JSON object in {} chars", candidate.len())),
    }
}

/// `base * 2^(attempt-1)`, saturating instead of overflowing.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}
