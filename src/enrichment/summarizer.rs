use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};
use ureq::Agent;

use crate::config::SummarizerConfig;

/// Written in place of a summary when every retry round has failed. The
/// article is still persisted; content is never discarded over enrichment.
pub const SUMMARY_FAILED_SENTINEL: &str = "[AI摘要失败]";

/// Written when no API credential is configured. A valid disabled state,
/// not a failure: it does not consume retry budget.
pub const SUMMARIZER_DISABLED_SENTINEL: &str = "[AI未配置]";

/// Reasoning models wrap chain-of-thought in think tags; strip it.
static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think pattern is valid"));

const SYSTEM_PROMPT: &str = "你是通知公告摘要助手。请基于输入的通知原文，提取事件主题、发布单位、\
主要行动与关键细节（名单、截止时间、地点、联系方式等），生成一段简洁、客观、正式的中文摘要。\
仅总结原文明确提及的内容，忽略“特此通知”“附件下载”等格式性文字，直接返回摘要文本，不输出其他信息。";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Chat-completions client for announcement summaries.
#[derive(Debug, Clone)]
pub struct Summarizer {
    agent: Agent,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl Summarizer {
    #[inline]
    pub fn new(config: &SummarizerConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Self {
            agent,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Summarize one announcement. Returns the disabled sentinel when no
    /// credential is configured, and `None` on any transport, status, or
    /// parse failure so the caller's retry bookkeeping can act on it.
    #[inline]
    pub fn summarize(&self, content: &str) -> Option<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Some(SUMMARIZER_DISABLED_SENTINEL.to_string());
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: content.to_string(),
                },
            ],
            stream: false,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let request_json = match serde_json::to_string(&request) {
            Ok(json) => json,
            Err(error) => {
                warn!("Failed to serialize summary request: {}", error);
                return None;
            }
        };

        let result = self
            .agent
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .header("Authorization", &format!("Bearer {api_key}"))
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string());

        let body = match result {
            Ok(body) => body,
            Err(ureq::Error::StatusCode(status)) => {
                warn!("Summary endpoint returned status {}", status);
                return None;
            }
            Err(error) => {
                warn!("Summary request failed: {}", error);
                return None;
            }
        };

        let response: ChatResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(error) => {
                warn!("Failed to parse summary response: {}", error);
                return None;
            }
        };

        let raw = response.choices.last().map(|choice| &choice.message.content)?;
        let text = THINK_RE.replace_all(raw, "");
        let text = text.trim().trim_start_matches('#').trim_start();
        if text.is_empty() {
            debug!("Summary endpoint returned an empty completion");
            return None;
        }
        Some(text.to_string())
    }
}
