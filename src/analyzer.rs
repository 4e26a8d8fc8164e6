//! Advertisement detection with a vision model, with exponential backoff retry logic.
//!
//! # Architecture
//!
//! - [`AskVision`]: core trait sending one page image plus a prompt to a model
//! - [`ClaudeVision`]: the Anthropic Messages API implementation
//! - [`RetryAsk`]: decorator that adds retry logic to any `AskVision` implementation
//! - [`PageAnalyzer`]: turns a page image file into [`AdInfo`] records
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//!
//! # Response format
//!
//! The model is asked to answer with one block per ad:
//!
//! ```text
//! ---
//! ADVERTISER: Acme Co
//! DESCRIPTION: Spring tire sale
//! LOCATION: bottom right
//! SIZE: quarter page
//! CONFIDENCE: high
//! ---
//! ```
//!
//! or with "No advertisements found." for a page without ads.

use crate::imaging::{self, ImagingError};
use crate::models::AdInfo;
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use serde_json::json;
use std::fmt;
use std::path::Path;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(300);

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vision API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("vision API response had no text content")]
    EmptyResponse,

    #[error(transparent)]
    Image(#[from] ImagingError),

    #[error("invalid vision configuration: {0}")]
    Config(String),
}

/// A page image ready to send: base64 of a JPEG.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    pub base64_jpeg: String,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("base64_len", &self.base64_jpeg.len())
            .finish()
    }
}

/// Trait for async vision model interaction.
///
/// This abstraction allows for different model backends or decorators (like retry logic).
#[allow(async_fn_in_trait)]
pub trait AskVision {
    /// Send one image and a prompt, and receive the model's text answer.
    async fn ask(&self, image: &PageImage, prompt: &str) -> Result<String, VisionError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskVision`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The underlying model client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskVision,
{
    /// Create a new retry wrapper around an existing [`AskVision`] implementation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let claude = ClaudeVision::new(api_key, None)?;
    /// let retrying = RetryAsk::new(claude, 5, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskVision for RetryAsk<T>
where
    T: AskVision + fmt::Debug,
{
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, image: &PageImage, prompt: &str) -> Result<String, VisionError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(image, prompt).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(16);
                    let delay = self
                        .base_delay
                        .saturating_mul(1 << shift)
                        .min(self.max_delay);
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Claude over the Anthropic Messages API.
pub struct ClaudeVision {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl fmt::Debug for ClaudeVision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaudeVision")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ClaudeVision {
    /// `base_url` defaults to [`DEFAULT_BASE_URL`].
    pub fn new(api_key: &str, base_url: Option<&str>) -> Result<Self, VisionError> {
        if api_key.trim().is_empty() {
            return Err(VisionError::Config("ANTHROPIC_API_KEY is empty".to_string()));
        }
        let base_url = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        url::Url::parse(base_url).map_err(|e| VisionError::Config(format!("{base_url}: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

impl AskVision for ClaudeVision {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, image: &PageImage, prompt: &str) -> Result<String, VisionError> {
        let t0 = Instant::now();
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/jpeg",
                            "data": image.base64_jpeg,
                        }
                    },
                    { "type": "text", "text": prompt }
                ]
            }]
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis(),
                body = %truncate_for_log(&body, 300),
                "API call failed"
            );
            return Err(VisionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: serde_json::Value = response.json().await?;
        let text = data["content"][0]["text"]
            .as_str()
            .ok_or(VisionError::EmptyResponse)?
            .to_string();
        debug!(
            elapsed_ms = t0.elapsed().as_millis(),
            chars = text.len(),
            "API call succeeded"
        );
        Ok(text)
    }
}

/// Finds the ads on one page image.
#[allow(async_fn_in_trait)]
pub trait PageAnalyzer {
    async fn analyze_page(
        &self,
        image_path: &Path,
        clients: &[String],
    ) -> Result<Vec<AdInfo>, VisionError>;
}

/// [`PageAnalyzer`] backed by a vision model, with retries.
#[derive(Debug)]
pub struct VisionAnalyzer<T> {
    model: RetryAsk<T>,
}

impl<T: AskVision> VisionAnalyzer<T> {
    /// Retry up to 5 times starting from a 1 second delay.
    pub fn new(model: T) -> Self {
        Self::with_retry(model, 5, StdDuration::from_secs(1))
    }

    pub fn with_retry(model: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            model: RetryAsk::new(model, max_retries, base_delay),
        }
    }
}

impl<T> PageAnalyzer for VisionAnalyzer<T>
where
    T: AskVision + fmt::Debug,
{
    #[instrument(level = "info", skip_all, fields(image = %image_path.display()))]
    async fn analyze_page(
        &self,
        image_path: &Path,
        clients: &[String],
    ) -> Result<Vec<AdInfo>, VisionError> {
        let t0 = Instant::now();
        let image = PageImage {
            base64_jpeg: imaging::analysis_payload(image_path)?,
        };
        let prompt = build_prompt(clients);
        let response = self.model.ask(&image, &prompt).await?;
        let ads = parse_ad_response(&response);
        info!(
            ads = ads.len(),
            elapsed_ms_total = t0.elapsed().as_millis(),
            "Analyzed page"
        );
        Ok(ads)
    }
}

/// Prompt asking for every ad on the page in the block format, naming `clients` if any.
pub fn build_prompt(clients: &[String]) -> String {
    let client_context = if clients.is_empty() {
        String::new()
    } else {
        let list: Vec<String> = clients.iter().map(|c| format!("- {c}")).collect();
        format!(
            "\nPay special attention to ads from these clients (case-insensitive):\n{}\n\n\
             If you find any ads from these specific clients, make sure to note them clearly.\n",
            list.join("\n")
        )
    };

    format!(
        "Analyze this newspaper page image and identify ALL advertisements.

For each advertisement found, provide:
1. Advertiser name (the company/business being advertised)
2. Brief description of what's being advertised
3. Location on page (e.g., \"top right\", \"bottom half\", \"left column\")
4. Size (e.g., \"full page\", \"half page\", \"quarter page\", \"small banner\", \"classified\")
5. Confidence level (high/medium/low)

{client_context}

Format your response as a structured list. If there are no ads on this page, say \"No advertisements found.\"

Be thorough - look for:
- Display ads (large visual ads)
- Banner ads
- Small business ads
- Classified-style ads
- Sponsored content
- Any commercial messaging

Respond in this exact format for each ad:
---
ADVERTISER: [company name]
DESCRIPTION: [what they're advertising]
LOCATION: [where on page]
SIZE: [ad size]
CONFIDENCE: [high/medium/low]
---
"
    )
}

#[derive(Default)]
struct PartialAd {
    advertiser: Option<String>,
    description: Option<String>,
    location: Option<String>,
    size: Option<String>,
    confidence: Option<String>,
}

/// Parse the model's block-formatted answer.
///
/// Fields accumulate across `---` separators until a block supplies an
/// advertiser; a block without one contributes its fields to the next ad.
pub fn parse_ad_response(text: &str) -> Vec<AdInfo> {
    if text.to_lowercase().contains("no advertisements found") {
        return Vec::new();
    }

    let mut ads = Vec::new();
    let mut current = PartialAd::default();

    for block in text.split("---").map(str::trim).filter(|b| !b.is_empty()) {
        for line in block.lines().map(str::trim) {
            let field = |prefix: &str| line.strip_prefix(prefix).map(|v| v.trim().to_string());
            if let Some(v) = field("ADVERTISER:") {
                current.advertiser = Some(v);
            } else if let Some(v) = field("DESCRIPTION:") {
                current.description = Some(v);
            } else if let Some(v) = field("LOCATION:") {
                current.location = Some(v);
            } else if let Some(v) = field("SIZE:") {
                current.size = Some(v);
            } else if let Some(v) = field("CONFIDENCE:") {
                current.confidence = Some(v);
            }
        }

        if current.advertiser.as_deref().is_some_and(|a| !a.is_empty()) {
            let ad = std::mem::take(&mut current);
            ads.push(AdInfo {
                advertiser: ad.advertiser.unwrap_or_default(),
                description: ad.description.unwrap_or_default(),
                location: ad.location.unwrap_or_default(),
                size: ad.size.unwrap_or_default(),
                confidence: ad.confidence.unwrap_or_else(|| "medium".to_string()),
            });
        }
    }
    ads
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl AskVision for Flaky {
        async fn ask(&self, _image: &PageImage, _prompt: &str) -> Result<String, VisionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(VisionError::Status {
                    status: 529,
                    body: "overloaded".to_string(),
                })
            } else {
                Ok("No advertisements found.".to_string())
            }
        }
    }

    fn image() -> PageImage {
        PageImage {
            base64_jpeg: String::new(),
        }
    }

    #[test]
    fn test_parse_blocks() {
        let response = "Here is what I found:\n\
            ---\n\
            ADVERTISER: Acme Co\n\
            DESCRIPTION: Spring tire sale\n\
            LOCATION: bottom right\n\
            SIZE: quarter page\n\
            CONFIDENCE: high\n\
            ---\n\
            ADVERTISER: Bolt Hardware\n\
            SIZE: banner\n\
            ---\n";

        let ads = parse_ad_response(response);

        assert_eq!(ads.len(), 2);
        assert_eq!(ads[0].advertiser, "Acme Co");
        assert_eq!(ads[0].description, "Spring tire sale");
        assert_eq!(ads[0].location, "bottom right");
        assert_eq!(ads[0].size, "quarter page");
        assert_eq!(ads[0].confidence, "high");
        assert_eq!(ads[1].advertiser, "Bolt Hardware");
        assert_eq!(ads[1].description, "");
        assert_eq!(ads[1].confidence, "medium");
    }

    #[test]
    fn test_no_ads_phrase_wins() {
        assert!(parse_ad_response("No Advertisements Found on this page.").is_empty());
    }

    #[test]
    fn test_block_without_advertiser_carries_fields_forward() {
        let response = "---\nSIZE: full page\n---\nADVERTISER: Acme Co\n---";
        let ads = parse_ad_response(response);
        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0].size, "full page");
    }

    #[test]
    fn test_prompt_lists_clients() {
        let prompt = build_prompt(&["Acme Co".to_string(), "Bolt Hardware".to_string()]);
        assert!(prompt.contains("- Acme Co\n- Bolt Hardware"));
        assert!(!build_prompt(&[]).contains("Pay special attention"));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let flaky = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let retrying = RetryAsk::new(flaky, 5, StdDuration::from_millis(1));

        let answer = retrying.ask(&image(), "prompt").await.unwrap();

        assert_eq!(answer, "No advertisements found.");
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let flaky = Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let retrying = RetryAsk::new(flaky, 2, StdDuration::from_millis(1));

        let err = retrying.ask(&image(), "prompt").await.unwrap_err();

        assert!(matches!(err, VisionError::Status { status: 529, .. }));
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_claude_rejects_empty_key() {
        assert!(matches!(
            ClaudeVision::new(" ", None),
            Err(VisionError::Config(_))
        ));
        let claude = ClaudeVision::new("key", Some("http://localhost:8080/")).unwrap();
        assert_eq!(claude.base_url, "http://localhost:8080");
    }
}
