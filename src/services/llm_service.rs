use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::LlmError;
use crate::models::{EventType, ImpactLabel};
use crate::services::rate_limiter::RateLimiter;

/// Spacing between consecutive LLM calls, shared across every capability and
/// caller through one token bucket.
const LLM_CALL_SPACING: Duration = Duration::from_millis(100);

/// Attempts per logical call; transient failures back off between attempts.
const MAX_ATTEMPTS: u32 = 3;

/// Worth a second try: provider hiccups, not contract violations. A 4xx or
/// an unparseable body will not get better by asking again.
fn is_retryable(e: &LlmError) -> bool {
    matches!(
        e,
        LlmError::Timeout | LlmError::RateLimited | LlmError::NetworkError(_)
    )
}

/// Configuration for the LLM collaborator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            api_key: None,
            max_tokens: 500,
            temperature: 0.4,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("LLM_ENABLED")
                .ok()
                .and_then(|s| s.parse::<bool>().ok())
                .unwrap_or(false),
            provider: std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            temperature: std::env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.4),
        }
    }
}

/// Trait for LLM providers. One method; the capabilities below are prompt
/// contracts layered on top, each with a deterministic fallback at the caller.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

// ==============================================================================
// OpenAI provider
// ==============================================================================

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Single-shot chat transport. Deliberately attempt-free: retry policy and
/// pacing live in `LlmService::generate`, where every attempt draws from the
/// one token bucket all capabilities share.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String, max_tokens: usize, temperature: f32) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self {
            api_key,
            model: DEFAULT_CHAT_MODEL.to_string(),
            max_tokens,
            temperature,
            client,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            info!(
                "LLM completion: {} prompt + {} completion = {} tokens",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))
    }
}

// ==============================================================================
// Response cache
// ==============================================================================

#[derive(Debug, Clone)]
struct CachedResponse {
    content: String,
    created_at: Instant,
}

/// LLM response cache with TTL, keyed by prompt hash.
pub struct LlmCache {
    cache: Arc<RwLock<HashMap<String, CachedResponse>>>,
    ttl: Duration,
}

impl LlmCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let cache = self.cache.read().await;
        if let Some(cached) = cache.get(key) {
            if cached.created_at.elapsed() < self.ttl {
                return Some(cached.content.clone());
            }
        }
        None
    }

    pub async fn set(&self, key: String, value: String) {
        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CachedResponse {
                content: value,
                created_at: Instant::now(),
            },
        );
    }

    pub async fn clear_expired(&self) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, v| v.created_at.elapsed() < self.ttl);
    }
}

// ==============================================================================
// Capability responses
// ==============================================================================

/// Generated briefing text for one theme.
#[derive(Debug, Clone, Deserialize)]
pub struct ThemeText {
    pub hook: String,
    #[serde(rename = "context")]
    pub context_explanation: String,
    #[serde(rename = "whyItMatters")]
    pub why_it_matters: String,
}

/// One theme proposed by the grouping prompt: a name plus indices into the
/// cluster list the prompt was shown.
#[derive(Debug, Clone, Deserialize)]
pub struct ThemeAssignment {
    pub theme_name: String,
    pub cluster_indices: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct ThemeAssignmentResponse {
    themes: Vec<ThemeAssignment>,
}

// ==============================================================================
// Digit hygiene
// ==============================================================================

/// The LLM must never invent numbers: every digit run in `output` must appear
/// verbatim somewhere in `input`.
pub fn digits_are_grounded(input: &str, output: &str) -> bool {
    digit_runs(output).iter().all(|run| input.contains(run))
}

fn digit_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

// ==============================================================================
// Service
// ==============================================================================

const ALERT_SYSTEM_PROMPT: &str = "You write one-sentence, calm push notifications about a user's \
stock holdings. Never use panic language. Never emit any number that is not present in the user \
message. No advice, no predictions.";

const THEME_SYSTEM_PROMPT: &str = "You write short, calm briefings about financial news for a \
retail investor. Never use panic language. Never invent numbers: any figure you mention must \
appear in the user message. The hook is at most 3 sentences. No buy/sell advice.";

/// LLM collaborator with provider abstraction, shared pacing, and caching.
/// Every capability has a deterministic fallback at its call site; the system
/// never requires the LLM to function.
pub struct LlmService {
    provider: Option<Arc<dyn LlmProvider>>,
    cache: LlmCache,
    pacer: Arc<RateLimiter>,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Self {
        let provider: Option<Arc<dyn LlmProvider>> = if config.enabled {
            match &config.api_key {
                Some(api_key) if !api_key.is_empty() => match config.provider.as_str() {
                    "openai" => {
                        info!("Initializing LLM service with provider: {}", config.provider);
                        OpenAiProvider::new(api_key.clone(), config.max_tokens, config.temperature)
                            .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                            .map_err(|e| warn!("Failed to build LLM provider: {}", e))
                            .ok()
                    }
                    other => {
                        warn!("Unknown LLM provider: {}. LLM features disabled.", other);
                        None
                    }
                },
                _ => {
                    warn!("LLM enabled but no API key configured. LLM features disabled.");
                    None
                }
            }
        } else {
            info!("LLM features are disabled in configuration");
            None
        };

        Self {
            provider,
            cache: LlmCache::new(Duration::from_secs(3600)),
            pacer: Arc::new(RateLimiter::new(1, LLM_CALL_SPACING)),
        }
    }

    /// Build a service around an injected provider. Tests use this with a
    /// deterministic stub.
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider: Some(provider),
            cache: LlmCache::new(Duration::from_secs(3600)),
            pacer: Arc::new(RateLimiter::new(1, LLM_CALL_SPACING)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(LlmConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// One paced, cached, retried call. Each attempt (retries included)
    /// takes a fresh permit from the shared bucket, so a retrying caller
    /// cannot crowd out concurrent capability calls.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let provider = self.provider.as_ref().ok_or(LlmError::Disabled)?;

        let cache_key = Self::hash_prompt(system, prompt);
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let result = {
                let _guard = self.pacer.acquire().await;
                provider.generate(system, prompt).await
            };

            match result {
                Ok(text) => {
                    self.cache.set(cache_key, text.clone()).await;
                    return Ok(text);
                }
                Err(e) if attempt < MAX_ATTEMPTS && is_retryable(&e) => {
                    let jitter = rand::thread_rng().gen_range(0..250u64);
                    let backoff =
                        Duration::from_millis(500 * 2u64.pow(attempt - 1) + jitter);
                    warn!(
                        "LLM call failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt, MAX_ATTEMPTS, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    warn!("LLM call gave up after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    // --------------------------------------------------------------------------
    // Capabilities
    // --------------------------------------------------------------------------

    /// Classify an article into exactly one event type token.
    pub async fn classify_event_type(
        &self,
        title: &str,
        description: &str,
        body: &str,
    ) -> Result<EventType, LlmError> {
        let prompt = format!(
            "Classify this financial news article into exactly one category.\n\
             Answer with only one token from: earnings, guidance, productLaunch, \
             mergerAcquisition, regulation, litigation, analystNote, macro, \
             socialSentiment, rumor, fluff.\n\n\
             TITLE: {}\nDESCRIPTION: {}\nBODY: {}",
            title,
            description,
            truncate(body, 1500)
        );

        let response = self
            .generate("You are a precise financial news classifier.", &prompt)
            .await?;

        EventType::from_str(response.trim())
            .ok_or_else(|| LlmError::InvalidResponse(format!("unknown event type: {}", response)))
    }

    /// Are two articles about the same real-world event? YES/NO contract.
    pub async fn same_event(
        &self,
        title_a: &str,
        summary_a: &str,
        title_b: &str,
        summary_b: &str,
    ) -> Result<bool, LlmError> {
        let prompt = format!(
            "Are these two articles about the SAME EVENT? Answer only YES or NO.\n\n\
             ARTICLE 1: {}\n{}\n\nARTICLE 2: {}\n{}",
            title_a,
            truncate(summary_a, 400),
            title_b,
            truncate(summary_b, 400)
        );

        let response = self
            .generate("You judge whether two news articles describe one event.", &prompt)
            .await?;

        let upper = response.trim().to_uppercase();
        if upper.starts_with("YES") {
            Ok(true)
        } else if upper.starts_with("NO") {
            Ok(false)
        } else {
            Err(LlmError::InvalidResponse(format!(
                "expected YES/NO, got: {}",
                response
            )))
        }
    }

    /// Impact labels for an article; the result is unioned with the rule pass.
    pub async fn label_impacts(
        &self,
        title: &str,
        description: &str,
    ) -> Result<Vec<ImpactLabel>, LlmError> {
        let prompt = format!(
            "Which of these impact labels apply to this article? Answer with a \
             comma-separated list drawn from: mostImpactful, surprising, drama, \
             priceAffectingAbnormal, bigMoves, allTimeHigh, allTimeLow, \
             stockPopularity. Answer 'none' if none apply.\n\n\
             TITLE: {}\nDESCRIPTION: {}",
            title, description
        );

        let response = self
            .generate("You tag financial news with market-impact labels.", &prompt)
            .await?;

        let labels: Vec<ImpactLabel> = response
            .split(',')
            .filter_map(|token| ImpactLabel::from_str(token.trim()))
            .collect();

        Ok(labels)
    }

    /// Group cluster summaries (shown by index) into at most `max_themes`
    /// themes. Returns assignments of cluster indices to named themes.
    pub async fn group_into_themes(
        &self,
        cluster_summaries: &[String],
        max_themes: usize,
    ) -> Result<Vec<ThemeAssignment>, LlmError> {
        let listing: String = cluster_summaries
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] {}", i, s))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Group these news clusters into 1 to {} themes. Every cluster index \
             must appear in exactly one theme.\n\nCLUSTERS:\n{}\n\n\
             Respond with valid JSON: {{\"themes\": [{{\"theme_name\": \"...\", \
             \"cluster_indices\": [0, 2]}}]}}",
            max_themes, listing
        );

        let response = self
            .generate("You organize financial news into readable themes.", &prompt)
            .await?;

        let parsed: ThemeAssignmentResponse = serde_json::from_str(response.trim())
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(parsed.themes)
    }

    /// Hook / context / why-it-matters text for one theme. Returns an error
    /// when the model invents numbers, so the caller falls back.
    pub async fn write_theme_text(
        &self,
        theme_name: &str,
        article_digest: &str,
        owned_symbols: &[String],
    ) -> Result<ThemeText, LlmError> {
        let prompt = format!(
            "Write briefing text for the theme \"{}\".\n\
             The reader holds: {}.\n\nARTICLES:\n{}\n\n\
             Respond with valid JSON: {{\"hook\": \"...\", \"context\": \"...\", \
             \"whyItMatters\": \"...\"}}",
            theme_name,
            if owned_symbols.is_empty() {
                "no related positions".to_string()
            } else {
                owned_symbols.join(", ")
            },
            article_digest
        );

        let response = self.generate(THEME_SYSTEM_PROMPT, &prompt).await?;

        let text: ThemeText = serde_json::from_str(response.trim())
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let combined = format!(
            "{} {} {}",
            text.hook, text.context_explanation, text.why_it_matters
        );
        if !digits_are_grounded(&prompt, &combined) {
            return Err(LlmError::InvalidResponse(
                "generated text contains ungrounded digits".to_string(),
            ));
        }

        Ok(text)
    }

    /// One-line calm alert message. Same digit-hygiene contract.
    pub async fn write_alert_text(&self, facts: &str) -> Result<String, LlmError> {
        let prompt = format!("Write the notification body for these facts:\n{}", facts);

        let response = self.generate(ALERT_SYSTEM_PROMPT, &prompt).await?;
        let text = response.trim().to_string();

        if !digits_are_grounded(&prompt, &text) {
            return Err(LlmError::InvalidResponse(
                "generated text contains ungrounded digits".to_string(),
            ));
        }

        Ok(text)
    }

    fn hash_prompt(system: &str, prompt: &str) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        system.hash(&mut hasher);
        prompt.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }

    pub async fn cleanup(&self) {
        self.cache.clear_expired().await;
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
