//! VLM interaction: the [`VisionModel`] seam and its provider-backed
//! implementation.
//!
//! The pipeline talks to the hosted model only through [`VisionModel`], so
//! tests and alternative backends plug in via
//! [`crate::config::ExtractionConfigBuilder::vision_model`]. All prompt text
//! lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! Transport failures (HTTP errors, rate limits, timeouts) are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base
//! and 3 retries the waits are 500 ms → 1 s → 2 s. An answer that arrives but
//! cannot be parsed is returned as an error straight away; asking again at
//! temperature 0.1 rarely changes the shape of the answer.

use crate::config::ExtractionConfig;
use crate::error::{ServiceStage, SurveyError};
use crate::pipeline::encode::EncodedPage;
use crate::pipeline::postprocess::{parse_page_numbers, parse_record};
use crate::prompts::{extraction_prompt, EXTRACTION_SYSTEM_PROMPT};
use crate::schema::ExtractionSchema;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A hosted multimodal model able to answer the two pipeline questions.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Ask which of `pages` (numbered renders, in page order) belong to the
    /// section described by `instruction`.
    ///
    /// Returns the page numbers as the model reported them; the caller
    /// sorts, de-duplicates, and clips them to the document.
    async fn identify_pages(
        &self,
        pages: &[EncodedPage],
        instruction: &str,
    ) -> Result<Vec<usize>, SurveyError>;

    /// Extract one clean page into a JSON object shaped by `schema`.
    async fn extract_structured(
        &self,
        page: &EncodedPage,
        schema: &ExtractionSchema,
    ) -> Result<Value, SurveyError>;
}

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    /// Send `messages`, retrying transport failures. Returns the raw answer text.
    async fn chat_with_retry(
        &self,
        stage: ServiceStage,
        messages: &[ChatMessage],
    ) -> Result<String, SurveyError> {
        let options = self.build_options();
        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    stage, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.call_timeout, self.provider.chat(messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        stage,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{}", e);
                    warn!("{}: attempt {} failed: {}", stage, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
                Err(_) => {
                    let err_msg = format!("no response within {}s", self.call_timeout.as_secs());
                    warn!("{}: attempt {} timed out", stage, attempt + 1);
                    last_err = Some(err_msg);
                }
            }
        }

        let detail = last_err.unwrap_or_else(|| "Unknown error".to_string());
        Err(SurveyError::service(
            stage,
            format!("{} (after {} retries)", detail, self.max_retries),
        ))
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn identify_pages(
        &self,
        pages: &[EncodedPage],
        instruction: &str,
    ) -> Result<Vec<usize>, SurveyError> {
        let images = pages.iter().map(|p| p.image.clone()).collect();
        let messages = vec![ChatMessage::user_with_images(instruction, images)];

        let answer = self
            .chat_with_retry(ServiceStage::Identification, &messages)
            .await?;
        parse_page_numbers(&answer).ok_or_else(|| {
            SurveyError::service(
                ServiceStage::Identification,
                format!("unparseable response: {}", excerpt(&answer)),
            )
        })
    }

    async fn extract_structured(
        &self,
        page: &EncodedPage,
        schema: &ExtractionSchema,
    ) -> Result<Value, SurveyError> {
        let stage = ServiceStage::Extraction {
            page: page.page_num,
        };
        let messages = vec![
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user_with_images(
                &extraction_prompt(schema, page.page_num),
                vec![page.image.clone()],
            ),
        ];

        let answer = self.chat_with_retry(stage, &messages).await?;
        parse_record(&answer).ok_or_else(|| {
            SurveyError::service(
                stage,
                format!("expected a JSON object, got: {}", excerpt(&answer)),
            )
        })
    }
}

fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// First 200 characters of an answer, for error messages.
fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_png_bytes;
    use edgequake_llm::providers::MockAgentProvider;
    use edgequake_llm::{ChatRole, LLMResponse, LlmError, MockProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn page(page_num: usize) -> EncodedPage {
        EncodedPage {
            page_num,
            image: encode_png_bytes(b"\x89PNG\r\n\x1a\n"),
        }
    }

    fn model_over(provider: Arc<dyn LLMProvider>, max_retries: u32) -> LlmVisionModel {
        let config = ExtractionConfig {
            max_retries,
            retry_backoff_ms: 1,
            ..ExtractionConfig::default()
        };
        LlmVisionModel::new(provider, &config)
    }

    /// Fails the first `failures` calls with a network error, then answers
    /// with `answer`. Keeps the messages of every call.
    struct Flaky {
        failures: usize,
        answer: String,
        delay: Duration,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Flaky {
        fn new(failures: usize, answer: &str) -> Arc<Self> {
            Arc::new(Self {
                failures,
                answer: answer.to_string(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LLMProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn model(&self) -> &str {
            "flaky-vision"
        }

        fn max_context_length(&self) -> usize {
            128_000
        }

        async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
            self.chat(&[], None).await
        }

        async fn complete_with_options(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.complete(prompt).await
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            if call < self.failures {
                return Err(LlmError::NetworkError("connection reset".into()));
            }
            Ok(LLMResponse::new(self.answer.clone(), "flaky-vision"))
        }
    }

    #[tokio::test]
    async fn fenced_identify_answer_parses() {
        let mock = Arc::new(MockProvider::new());
        mock.add_response("```json\n{\"found\": true, \"page_numbers\": [7, 3, 3]}\n```")
            .await;
        let model = model_over(mock, 3);

        let pages = model
            .identify_pages(&[page(1), page(2)], "Find the section.")
            .await
            .unwrap();
        assert_eq!(pages, vec![7, 3, 3]);
    }

    #[tokio::test]
    async fn record_wrapped_in_prose_parses() {
        let mock = Arc::new(MockProvider::new());
        mock.add_response("Sure, here it is: {\"machinery_systems\": []} Hope this helps.")
            .await;
        let model = model_over(mock, 3);

        let value = model
            .extract_structured(&page(4), &ExtractionSchema::default())
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({ "machinery_systems": [] }));
    }

    #[tokio::test]
    async fn garbage_answer_is_not_retried() {
        let mock = Arc::new(MockAgentProvider::new());
        mock.add_response("I could not find any table on this page.").await;
        let model = model_over(mock.clone(), 3);

        let err = model
            .extract_structured(&page(5), &ExtractionSchema::default())
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                SurveyError::ExtractionService {
                    stage: ServiceStage::Extraction { page: 5 },
                    ..
                }
            ),
            "got: {err:?}"
        );
        assert!(err.to_string().contains("could not find any table"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn garbage_identify_answer_is_service_error() {
        let mock = Arc::new(MockAgentProvider::new());
        mock.add_response("no idea").await;
        let model = model_over(mock.clone(), 2);

        let err = model.identify_pages(&[page(1)], "Find it.").await.unwrap_err();
        assert!(err.to_string().starts_with("Page identification failed"), "got: {err}");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn transport_failures_are_retried() {
        let flaky = Flaky::new(2, r#"{"page_numbers": [2]}"#);
        let model = model_over(flaky.clone(), 3);

        let pages = model.identify_pages(&[page(1), page(2)], "Find it.").await.unwrap();
        assert_eq!(pages, vec![2]);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn retries_run_out() {
        let flaky = Flaky::new(10, "{}");
        let model = model_over(flaky.clone(), 1);

        let err = model
            .extract_structured(&page(9), &ExtractionSchema::default())
            .await
            .unwrap_err();
        assert_eq!(flaky.calls(), 2);
        let msg = err.to_string();
        assert!(msg.starts_with("Extraction of page 9 failed"), "got: {msg}");
        assert!(msg.contains("connection reset"), "got: {msg}");
        assert!(msg.contains("after 1 retries"), "got: {msg}");
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let flaky = Arc::new(Flaky {
            failures: 0,
            answer: "{}".into(),
            delay: Duration::from_secs(30),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        });
        let config = ExtractionConfig {
            max_retries: 0,
            api_timeout_secs: 1,
            ..ExtractionConfig::default()
        };
        let model = LlmVisionModel::new(flaky.clone(), &config);

        let err = model.identify_pages(&[page(1)], "Find it.").await.unwrap_err();
        assert!(err.to_string().contains("no response within 1s"), "got: {err}");
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn messages_carry_the_page_images() {
        let flaky = Flaky::new(0, r#"{"found": false, "page_numbers": []}"#);
        let model = model_over(flaky.clone(), 0);
        model
            .identify_pages(&[page(1), page(2), page(3)], "Find the section.")
            .await
            .unwrap();

        let flaky_extract = Flaky::new(0, r#"{"machinery_systems": []}"#);
        let model = model_over(flaky_extract.clone(), 0);
        model
            .extract_structured(&page(3), &ExtractionSchema::default())
            .await
            .unwrap();

        let seen = flaky.seen.lock().unwrap();
        let identify = &seen[0];
        assert_eq!(identify.len(), 1);
        assert_eq!(identify[0].content, "Find the section.");
        assert_eq!(identify[0].images.as_ref().map(Vec::len), Some(3));

        let seen = flaky_extract.seen.lock().unwrap();
        let extract = &seen[0];
        assert_eq!(extract.len(), 2);
        assert!(matches!(extract[0].role, ChatRole::System));
        assert!(extract[1].content.contains("page 3"));
        assert_eq!(extract[1].images.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(u64::MAX, 9), u64::MAX);
    }

    #[test]
    fn excerpt_truncates_long_answers() {
        let long = "x".repeat(500);
        let e = excerpt(&long);
        assert_eq!(e.chars().count(), 201);
        assert_eq!(excerpt("  short  "), "short");
    }
}
