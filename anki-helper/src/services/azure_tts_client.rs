//! Azure text-to-speech client
//!
//! Sends one SSML request per distinct text and returns MP3 audio. Requests
//! are spaced by at least `minPauseBetweenRequests` using a token bucket
//! rate limiter. HTTP 429 responses are retried when configured to.

use crate::config::AzureConfig;
use crate::types::{SpeechError, SpeechResult, SpeechSynthesizer};
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use governor::{Quota, RateLimiter};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

const OUTPUT_FORMAT: &str = "audio-24khz-160kbitrate-mono-mp3";
const SSML_NAMESPACE: &str = "http://www.w3.org/2001/10/synthesis";

/// Longest response body excerpt kept in errors
const MAX_ERROR_BODY: usize = 1000;

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Azure Cognitive Services speech client
pub struct AzureTtsClient {
    http_client: reqwest::Client,
    endpoint: reqwest::Url,
    api_key: String,
    voice: String,
    language: String,
    log_requests: bool,
    retry_policy: RetryPolicy,
    retry_on_too_many_requests: bool,
    /// `None` when no pause between requests is configured
    rate_limiter: Option<DirectRateLimiter>,
}

impl AzureTtsClient {
    pub fn new(config: &AzureConfig) -> Result<Self, SpeechError> {
        let endpoint = reqwest::Url::parse(&config.endpoint_url)
            .map_err(|e| SpeechError::InvalidRequest(format!("invalid endpoint URL: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SpeechError::Network(e.to_string()))?;

        let rate_limiter =
            Quota::with_period(config.min_pause_between_requests).map(RateLimiter::direct);

        Ok(Self {
            http_client,
            endpoint,
            api_key: config.api_key.clone(),
            voice: config.voice.clone(),
            language: config.language.clone(),
            log_requests: config.log_requests,
            retry_policy: RetryPolicy::default().with_max_attempts(config.max_retries.saturating_add(1)),
            retry_on_too_many_requests: config.retry_on_too_many_requests,
            rate_limiter,
        })
    }

    /// Pause before the first retry after HTTP 429
    pub fn with_retry_delay(mut self, initial_delay: Duration) -> Self {
        self.retry_policy.initial_delay = initial_delay;
        self
    }

    /// Synthesize a single text, retrying rate-limit rejections if enabled
    pub async fn synthesize_one(&self, text: &str) -> SpeechResult {
        let body = ssml_body(&self.language, &self.voice, text);
        let retry_on_too_many_requests = self.retry_on_too_many_requests;

        retry_with_backoff(
            "text-to-speech",
            &self.retry_policy,
            |e: &SpeechError| retry_on_too_many_requests && matches!(e, SpeechError::TooManyRequests),
            || self.send_once(&body),
        )
        .await
        .map_err(|failure| failure.error)
    }

    async fn send_once(&self, body: &str) -> SpeechResult {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        if self.log_requests {
            debug!(body = %body, "Azure text-to-speech request");
        }

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .body(body.to_string())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if self.log_requests {
            debug!(status = status.as_u16(), "Azure text-to-speech response");
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SpeechError::TooManyRequests);
        }
        if status != reqwest::StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api(status.as_u16(), truncate(&text)));
        }

        let audio = response.bytes().await.map_err(transport_error)?;
        Ok(audio.to_vec())
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for AzureTtsClient {
    async fn synthesize(&self, texts: &BTreeSet<String>) -> BTreeMap<String, SpeechResult> {
        let total = texts.len();
        let mut results = BTreeMap::new();

        for (i, text) in texts.iter().enumerate() {
            info!("Speech synthesis [{}/{}]: {:?}", i + 1, total, text);
            let result = self.synthesize_one(text).await;
            if let Err(e) = &result {
                warn!(text = %text, error = %e, "Speech synthesis failed");
            }
            results.insert(text.clone(), result);
        }

        results
    }
}

/// SSML document asking `voice` to speak `text`
pub fn ssml_body(language: &str, voice: &str, text: &str) -> String {
    format!(
        r#"<speak version="1.0" xml:lang="{}" xmlns="{}"><voice name="{}">{}</voice></speak>"#,
        xml_escape(language),
        SSML_NAMESPACE,
        xml_escape(voice),
        xml_escape(text)
    )
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn transport_error(e: reqwest::Error) -> SpeechError {
    if e.is_timeout() {
        SpeechError::Timeout
    } else {
        SpeechError::Network(e.to_string())
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
