//! Vision-model interaction: one multimodal request per document.
//!
//! This module is intentionally thin — the instruction text lives in
//! [`crate::prompts`] so it can be changed without touching retry or
//! error-handling logic here, and the model itself sits behind the
//! [`VisionModel`] trait so tests can script responses.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent.
//! Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`) avoids
//! thundering-herd: with 500 ms base and 2 retries the wait sequence is
//! 500 ms → 1 s, totalling < 2 s of back-off per document.

use crate::config::ExtractionConfig;
use crate::error::MedcertError;
use crate::prompts::EXTRACTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A vision-capable model that turns an instruction plus page images into
/// free-form text.
///
/// The production implementation is [`ProviderModel`]; tests substitute a
/// scripted fake via [`crate::config::ExtractionConfigBuilder::vision_model`].
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Issue one multimodal completion. `pages` is ordered: index 0 is the
    /// first physical page.
    async fn complete(
        &self,
        instruction: &str,
        pages: Vec<ImageData>,
        options: &CompletionOptions,
    ) -> Result<String, MedcertError>;
}

/// [`VisionModel`] backed by an `edgequake-llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl VisionModel for ProviderModel {
    async fn complete(
        &self,
        instruction: &str,
        pages: Vec<ImageData>,
        options: &CompletionOptions,
    ) -> Result<String, MedcertError> {
        // A single user turn carries both the instruction and every page
        // image; the model reads the pages left to right in upload order.
        let messages = vec![ChatMessage::user_with_images(instruction, pages)];

        let response = self
            .provider
            .chat(&messages, Some(options))
            .await
            .map_err(|e| MedcertError::Extraction {
                detail: e.to_string(),
            })?;

        debug!(
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "model responded"
        );

        Ok(response.content)
    }
}

/// Run the extraction request against the model, with timeout and retries.
///
/// Returns the model's raw response text; parsing it is the normalizer's
/// job. Fails only when the call itself fails — a syntactically garbage
/// response is still `Ok`.
pub async fn extract_fields(
    model: &Arc<dyn VisionModel>,
    pages: Vec<ImageData>,
    config: &ExtractionConfig,
) -> Result<String, MedcertError> {
    let options = build_options(config);
    let api_timeout = Duration::from_secs(config.api_timeout_secs);
    let start = Instant::now();

    let mut last_err: Option<MedcertError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                attempt,
                max = config.max_retries,
                backoff_ms = backoff,
                "retrying model call"
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(
            api_timeout,
            model.complete(EXTRACTION_PROMPT, pages.clone(), &options),
        )
        .await
        {
            Ok(Ok(text)) => {
                debug!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    response_len = text.len(),
                    "extraction call succeeded"
                );
                return Ok(text);
            }
            Ok(Err(e)) => {
                warn!(attempt = attempt + 1, error = %e, "model call failed");
                last_err = Some(e);
            }
            Err(_) => {
                warn!(
                    attempt = attempt + 1,
                    timeout_secs = config.api_timeout_secs,
                    "model call timed out"
                );
                last_err = Some(MedcertError::ApiTimeout {
                    secs: config.api_timeout_secs,
                });
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| MedcertError::Internal("retry loop exited without an error".into())))
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let config = ExtractionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(2500));
    }
}
