//! Description service client.
//!
//! The service is an Ollama-style HTTP endpoint: a JSON chat request
//! carrying the base64 image, answered with newline-delimited JSON
//! fragments whose `message.content` pieces concatenate into the full
//! description. Every call runs under a hard wall-clock watchdog so a
//! hung request cannot stall the run.

pub mod recovery;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::error::{ProcessError, ServiceFailure};

/// Low-level failures from a single service request.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Connection(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("service returned no description text")]
    Empty,
}

/// Trait for description backends.
///
/// The shipped implementation is [`OllamaService`]; tests substitute
/// fakes.
#[async_trait::async_trait]
pub trait DescriptionService: Send + Sync {
    /// The display name of this service.
    fn name(&self) -> &str;
    /// Describe a base64-encoded image.
    async fn describe(&self, image_base64: &str, prompt: &str) -> Result<String, ServiceError>;
}

/// Ollama-style chat endpoint.
pub struct OllamaService {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaService {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            endpoint,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl DescriptionService for OllamaService {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn describe(&self, image_base64: &str, prompt: &str) -> Result<String, ServiceError> {
        let url = format!("{}/api/chat", self.endpoint.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt,
                    "images": [image_base64]
                }
            ]
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Connection(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::Connection(e.to_string()))?;

        if !status.is_success() {
            let mut body = text;
            body.truncate(500);
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let description = concat_ndjson(&text);
        if description.is_empty() {
            return Err(ServiceError::Empty);
        }
        Ok(description)
    }
}

/// Concatenate the `message.content` fragments of a newline-delimited
/// JSON response, in arrival order. Lines that are not JSON or carry no
/// content are ignored.
pub(crate) fn concat_ndjson(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if let Some(content) = value["message"]["content"].as_str() {
                out.push_str(content);
            }
        }
    }
    out.trim().to_string()
}

/// The default description prompt.
pub fn build_prompt() -> String {
    "Describe this image in one or two complete sentences, covering the main \
     subject, setting, and any notable detail. Return plain text only — no \
     markdown, no preamble."
        .to_string()
}

/// Pick simple keyword tags out of a description. Quality is not the
/// point — these seed the keyword fields and the tracking record.
pub fn derive_tags(description: &str, max: usize) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "the", "a", "an", "and", "with", "over", "under", "this", "that", "these", "there",
        "image", "photo", "picture", "shows", "appears", "some", "from", "into", "onto", "its",
        "are", "is", "was", "of", "in", "on", "at", "to", "for", "near", "very", "while",
    ];

    let mut tags: Vec<String> = Vec::new();
    for word in description.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() < 4 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !tags.contains(&word) {
            tags.push(word);
        }
        if tags.len() == max {
            break;
        }
    }
    tags
}

/// The watchdog-and-retry wrapper the orchestrator calls.
///
/// Each request runs as a supervised worker awaited up to a deadline;
/// on timeout the in-flight request is abandoned (best-effort — the
/// loop never blocks on its completion). Failures are retried with a
/// fixed delay up to the configured cap.
pub struct DescriptionClient {
    service: Arc<dyn DescriptionService>,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl DescriptionClient {
    pub fn new(
        service: Arc<dyn DescriptionService>,
        timeout: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            service,
            timeout,
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            Arc::new(OllamaService::new(
                config.endpoint.clone(),
                config.model.clone(),
            )),
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
            Duration::from_secs(config.retry_delay_secs),
        )
    }

    pub async fn describe(&self, image_base64: &str, prompt: &str) -> Result<String, ProcessError> {
        let mut last_err = None;
        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.describe_once(image_base64, prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    log::warn!(
                        "{}: attempt {attempt}/{} failed: {e}",
                        self.service.name(),
                        self.max_retries
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("max_retries >= 1"))
    }

    async fn describe_once(&self, image_base64: &str, prompt: &str) -> Result<String, ProcessError> {
        let service = Arc::clone(&self.service);
        let image = image_base64.to_owned();
        let prompt = prompt.to_owned();
        let worker = tokio::spawn(async move { service.describe(&image, &prompt).await });

        match tokio::time::timeout(self.timeout, worker).await {
            // Dropping the JoinHandle abandons the worker without
            // waiting for it.
            Err(_) => Err(ProcessError::DescriptionService {
                kind: ServiceFailure::Timeout,
                detail: format!("no response within {}s", self.timeout.as_secs()),
            }),
            Ok(Err(join_err)) => Err(ProcessError::DescriptionService {
                kind: ServiceFailure::Connection,
                detail: format!("request worker failed: {join_err}"),
            }),
            Ok(Ok(Err(ServiceError::Connection(detail)))) => {
                Err(ProcessError::DescriptionService {
                    kind: ServiceFailure::Connection,
                    detail,
                })
            }
            Ok(Ok(Err(err @ ServiceError::Http { .. }))) => Err(ProcessError::DescriptionService {
                kind: ServiceFailure::Http,
                detail: err.to_string(),
            }),
            Ok(Ok(Err(ServiceError::Empty))) => Err(ProcessError::DescriptionService {
                kind: ServiceFailure::Http,
                detail: "service returned no description text".into(),
            }),
            Ok(Ok(Ok(text))) => Ok(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ── concat_ndjson ────────────────────────────────────────────────

    #[test]
    fn ndjson_fragments_concatenate_in_order() {
        let body = [
            r#"{"message":{"content":"A red "}}"#,
            r#"{"message":{"content":"barn at "}}"#,
            r#"{"message":{"content":"dusk."},"done":true}"#,
        ]
        .join("\n");
        assert_eq!(concat_ndjson(&body), "A red barn at dusk.");
    }

    #[test]
    fn ndjson_skips_blank_and_garbage_lines() {
        let body = "\n{\"message\":{\"content\":\"hello\"}}\nnot json\n\n{\"done\":true}\n";
        assert_eq!(concat_ndjson(body), "hello");
    }

    #[test]
    fn ndjson_empty_body_is_empty() {
        assert_eq!(concat_ndjson(""), "");
        assert_eq!(concat_ndjson("{\"done\":true}"), "");
    }

    // ── derive_tags ──────────────────────────────────────────────────

    #[test]
    fn tags_skip_stopwords_and_short_words() {
        let tags = derive_tags("A tabby cat sleeping on the warm windowsill", 8);
        assert!(tags.contains(&"tabby".to_string()));
        assert!(tags.contains(&"sleeping".to_string()));
        assert!(tags.contains(&"windowsill".to_string()));
        assert!(!tags.contains(&"the".to_string()));
        assert!(!tags.contains(&"cat".to_string())); // under 4 chars
    }

    #[test]
    fn tags_are_deduplicated_and_capped() {
        let tags = derive_tags("snow snow snow mountain mountain valley river forest lake cloud", 4);
        assert_eq!(tags.len(), 4);
        assert_eq!(tags[0], "snow");
        assert_eq!(tags[1], "mountain");
    }

    #[test]
    fn empty_description_gives_no_tags() {
        assert!(derive_tags("", 8).is_empty());
    }

    // ── watchdog / retry ─────────────────────────────────────────────

    struct SlowService;

    #[async_trait::async_trait]
    impl DescriptionService for SlowService {
        fn name(&self) -> &str {
            "slow"
        }
        async fn describe(&self, _: &str, _: &str) -> Result<String, ServiceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    struct FlakyService {
        failures: AtomicU32,
    }

    #[async_trait::async_trait]
    impl DescriptionService for FlakyService {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn describe(&self, _: &str, _: &str) -> Result<String, ServiceError> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(ServiceError::Connection("refused".into()))
            } else {
                Ok("a quiet harbor at dawn".into())
            }
        }
    }

    #[tokio::test]
    async fn watchdog_times_out_hung_request() {
        let client = DescriptionClient::new(
            Arc::new(SlowService),
            Duration::from_millis(50),
            1,
            Duration::from_millis(1),
        );
        let err = client.describe("b64", "prompt").await.unwrap_err();
        match err {
            ProcessError::DescriptionService { kind, .. } => {
                assert_eq!(kind, ServiceFailure::Timeout);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn retries_recover_from_transient_failures() {
        let client = DescriptionClient::new(
            Arc::new(FlakyService {
                failures: AtomicU32::new(2),
            }),
            Duration::from_secs(5),
            3,
            Duration::from_millis(1),
        );
        let text = client.describe("b64", "prompt").await.unwrap();
        assert_eq!(text, "a quiet harbor at dawn");
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_last_error() {
        let client = DescriptionClient::new(
            Arc::new(FlakyService {
                failures: AtomicU32::new(100),
            }),
            Duration::from_secs(5),
            2,
            Duration::from_millis(1),
        );
        let err = client.describe("b64", "prompt").await.unwrap_err();
        match err {
            ProcessError::DescriptionService { kind, detail } => {
                assert_eq!(kind, ServiceFailure::Connection);
                assert!(detail.contains("refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
