//! [`VisionDriver`] – camera-frame navigation decisions from a vision model.
//!
//! Sends the latest camera frame plus [`NAVIGATION_PROMPT`] to an
//! OpenAI-compatible `/v1/chat/completions` endpoint, such as
//! [Ollama](https://ollama.com) (`http://localhost:11434`) serving a
//! multimodal model.  The JSON Schema of [`NavigationReply`] is injected via
//! `response_format`; models that ignore it are still understood.
//!
//! Replies are read in three passes, stopping at the first that yields an
//! action:
//!
//! 1. a JSON object `{"action": ..., "reason": ...}` (optionally fenced);
//! 2. `ACTION: <command> REASON: <text>` tags, case-insensitive;
//! 3. keywords: an exact command name (`turn_left`) anywhere in the text,
//!    else a bare direction word, with `stop` winning over all others.
//!
//! A reply with none of these is an invalid decision.  Requests are
//! rate-limited with `governor` and bounded by the caller's timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use strider_hal::sim::SimCamera;
//! use strider_runtime::decision::DecisionSource;
//! use strider_runtime::vision_driver::VisionDriver;
//!
//! # async fn demo() {
//! let driver = VisionDriver::new("http://localhost:11434", "llava", Box::new(SimCamera::new("front")))
//!     .with_min_interval(Duration::from_secs(1));
//!
//! // Requires a running model server.
//! let decision = driver.request_decision(Duration::from_secs(30)).await;
//! # }
//! ```

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use strider_hal::camera::Camera;
use strider_types::{MotionKind, StriderError};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::decision::{Decision, DecisionSource};

// ─────────────────────────────────────────────────────────────────────────────
// Prompt
// ─────────────────────────────────────────────────────────────────────────────

/// Instruction sent alongside every frame.
pub const NAVIGATION_PROMPT: &str = "\
Analyze this image from a legged robot's front camera. You are choosing its next movement.

Focus on:
1. Obstacles within 2 meters ahead
2. Clear paths for navigation
3. Ground conditions and safety
4. Any people or animals that should be avoided

Respond with ONE of these exact commands:
- \"move_forward\" - if the path ahead is clear for at least 2 meters
- \"turn_left\" - if there is an obstacle ahead and clear space to the left
- \"turn_right\" - if there is an obstacle ahead and clear space to the right
- \"strafe_left\" / \"strafe_right\" - to sidestep a narrow obstacle
- \"move_backward\" - if surrounded or you need to retreat
- \"stop\" - if conditions are unsafe or people are nearby

Also give a one-sentence reason.
Reply as JSON: {\"action\": \"<command>\", \"reason\": \"<explanation>\"}
If you cannot reply in JSON, use: ACTION: <command> REASON: <explanation>";

/// Words that lower the confidence estimate.
const HEDGE_WORDS: [&str; 5] = ["maybe", "might", "possibly", "unclear", "uncertain"];

/// Bare direction words accepted by the keyword fallback.
const DIRECTION_WORDS: [(&str, MotionKind); 4] = [
    ("forward", MotionKind::MoveForward),
    ("backward", MotionKind::MoveBackward),
    ("left", MotionKind::TurnLeft),
    ("right", MotionKind::TurnRight),
];

/// Length of the reply excerpt used as the reason when none is tagged.
const REASON_EXCERPT_CHARS: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from vision driver operations.
#[derive(Error, Debug)]
pub enum VisionError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The reply could not be understood.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// No frame could be captured.
    #[error("Camera error: {0}")]
    Camera(StriderError),
}

impl VisionError {
    /// Map into the shared taxonomy.  `timeout` is the budget the request ran
    /// under.
    pub fn into_strider(self, timeout: Duration) -> StriderError {
        match self {
            VisionError::Http(e) if e.is_timeout() => {
                StriderError::DecisionTimeout(timeout.as_millis() as u64)
            }
            VisionError::Http(e) => StriderError::DecisionSource(e.to_string()),
            VisionError::BadResponse(msg) => StriderError::DecisionInvalid(msg),
            VisionError::Camera(err) => err,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The structured reply the model is asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NavigationReply {
    #[schemars(with = "MotionKind")]
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    response_format: serde_json::Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// VisionDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async vision-model client that implements [`DecisionSource`].
pub struct VisionDriver {
    base_url: String,
    model: String,
    api_key: Option<Zeroizing<String>>,
    client: reqwest::Client,
    camera: Mutex<Box<dyn Camera>>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl VisionDriver {
    /// Create a driver pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// using `model` (e.g. `"llava"`), with no rate limit and no API key.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        camera: Box<dyn Camera>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
            camera: Mutex::new(camera),
            limiter: None,
        }
    }

    /// Send `key` as a bearer token.
    pub fn with_api_key(mut self, key: Zeroizing<String>) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Allow at most one request per `interval`.  Zero disables the limit.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.limiter = Quota::with_period(interval).map(RateLimiter::direct);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the server which models it serves.  Used once at start-up so an
    /// unreachable backend fails fast instead of degrading the scheduler.
    ///
    /// # Errors
    ///
    /// [`VisionError::Http`] if the server cannot be reached or answers with
    /// an error status, [`VisionError::BadResponse`] if the listing is not an
    /// OpenAI-style model list.
    pub async fn list_models(&self, timeout: Duration) -> Result<Vec<String>, VisionError> {
        let url = format!("{}/v1/models", self.base_url);
        let mut request = self.client.get(&url).timeout(timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.as_str());
        }
        let body = request.send().await?.error_for_status()?.text().await?;
        let list: ModelList = serde_json::from_str(&body)
            .map_err(|e| VisionError::BadResponse(format!("model list: {e}")))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    /// Whether `models` contains the configured model.  A bare name matches
    /// any tag (`llava` matches `llava:latest`).
    pub fn serves_model(&self, models: &[String]) -> bool {
        models.iter().any(|id| {
            id == &self.model
                || id
                    .split_once(':')
                    .is_some_and(|(name, _)| !self.model.contains(':') && name == self.model)
        })
    }

    /// Capture a frame, query the model and parse its reply.
    pub async fn decide(&self, timeout: Duration) -> Result<Decision, VisionError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let frame = self
            .camera
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capture()
            .map_err(VisionError::Camera)?;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: NAVIGATION_PROMPT,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: frame.data_url(),
                        },
                    },
                ],
            }],
            stream: false,
            response_format: response_format(),
        };

        let mut request = self.client.post(&url).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.as_str());
        }

        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| VisionError::BadResponse("empty choices array".into()))?;

        debug!(model = %self.model, reply = %content, "Vision model replied");
        parse_reply(&content)
    }
}

impl fmt::Debug for VisionDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionDriver")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

#[async_trait]
impl DecisionSource for VisionDriver {
    fn name(&self) -> &str {
        "vision"
    }

    async fn request_decision(&self, timeout: Duration) -> Result<Decision, StriderError> {
        self.decide(timeout)
            .await
            .map_err(|e| e.into_strider(timeout))
    }
}

fn response_format() -> serde_json::Value {
    let schema =
        serde_json::to_value(schema_for!(NavigationReply)).unwrap_or(serde_json::Value::Null);
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "navigation_reply",
            "schema": schema,
        },
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Turn raw model text into a [`Decision`].
///
/// # Errors
///
/// [`VisionError::BadResponse`] when no action can be found.
pub fn parse_reply(text: &str) -> Result<Decision, VisionError> {
    if let Some(reply) = parse_json_reply(text) {
        return Ok(Decision {
            action: reply.action,
            reason: reply.reason,
            confidence: estimate_confidence(text, true),
        });
    }

    let tagged_action = tag_value(text, "ACTION:").and_then(|rest| {
        let word: String = rest
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '[' | '"' | '\''))
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        (!word.is_empty()).then(|| word.to_ascii_lowercase())
    });

    let action = match tagged_action {
        Some(action) => action,
        None => keyword_action(text)
            .ok_or_else(|| VisionError::BadResponse("no recognizable action in reply".into()))?
            .as_str()
            .to_string(),
    };

    let reason = tag_value(text, "REASON:")
        .map(|rest| rest.lines().next().unwrap_or_default().trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| excerpt(text));

    let structured = tag_value(text, "ACTION:").is_some() && tag_value(text, "REASON:").is_some();
    Ok(Decision {
        action,
        reason: Some(reason),
        confidence: estimate_confidence(text, structured),
    })
}

fn parse_json_reply(text: &str) -> Option<NavigationReply> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    serde_json::from_str(unfenced.get(start..=end)?).ok()
}

/// Text following the first case-insensitive occurrence of `tag`.
fn tag_value<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let upper = text.to_ascii_uppercase();
    let at = upper.find(tag)?;
    text.get(at + tag.len()..)
}

fn keyword_action(text: &str) -> Option<MotionKind> {
    let lower = text.to_ascii_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();

    if let Some(kind) = tokens
        .iter()
        .find_map(|t| MotionKind::ALL.into_iter().find(|k| k.as_str() == *t))
    {
        return Some(kind);
    }
    if tokens.contains(&"stop") {
        return Some(MotionKind::Stop);
    }
    tokens.iter().find_map(|t| {
        DIRECTION_WORDS
            .iter()
            .find(|(word, _)| word == t)
            .map(|(_, kind)| *kind)
    })
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > REASON_EXCERPT_CHARS {
        let cut: String = trimmed.chars().take(REASON_EXCERPT_CHARS).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

/// Heuristic confidence: 0.5 base, +0.3 for a structured reply, +0.1 for a
/// reply longer than 50 characters, −0.1 per hedge word, clamped to `[0, 1]`.
pub fn estimate_confidence(text: &str, structured: bool) -> f32 {
    let lower = text.to_lowercase();
    let mut confidence = 0.5_f32;
    if structured {
        confidence += 0.3;
    }
    if text.chars().count() > 50 {
        confidence += 0.1;
    }
    for word in HEDGE_WORDS {
        if lower.contains(word) {
            confidence -= 0.1;
        }
    }
    confidence.clamp(0.0, 1.0)
}
