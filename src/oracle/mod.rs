use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    #[error("oracle throttled the request: {0}")]
    Throttled(String),
    #[error("oracle returned a malformed response: {0}")]
    Malformed(String),
    #[error("oracle is unavailable: {0}")]
    Unavailable(String),
}

impl OracleError {
    pub const fn kind(&self) -> &'static str {
        match self {
            OracleError::Timeout(_) => "timeout",
            OracleError::Throttled(_) => "throttled",
            OracleError::Malformed(_) => "malformed",
            OracleError::Unavailable(_) => "unavailable",
        }
    }
}

pub trait Oracle {
    fn invoke(&self, prompt: &str, max_tokens: u32) -> Result<String, OracleError>;
}

#[derive(Debug, Clone, Default)]
pub struct DisabledOracle;

impl Oracle for DisabledOracle {
    fn invoke(&self, _prompt: &str, _max_tokens: u32) -> Result<String, OracleError> {
        Err(OracleError::Unavailable(
            "no oracle endpoint configured".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct HttpOracleConfig {
    pub endpoint: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub deadline: Option<Instant>,
}

#[derive(Debug)]
pub struct HttpOracle {
    config: HttpOracleConfig,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [RequestMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl HttpOracle {
    pub fn new(config: HttpOracleConfig) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("HTTP クライアントの初期化に失敗しました: {e}"))?;
        Ok(Self { config, client })
    }

    // Never lets a call outlive the invocation budget.
    pub fn call_timeout(&self) -> Duration {
        let Some(deadline) = self.config.deadline else {
            return self.config.timeout;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::cmp::min(self.config.timeout, remaining)
    }
}

impl Oracle for HttpOracle {
    fn invoke(&self, prompt: &str, max_tokens: u32) -> Result<String, OracleError> {
        let timeout = self.call_timeout();
        if timeout.is_zero() {
            return Err(OracleError::Timeout(timeout));
        }

        let body = MessagesRequest {
            model: &self.config.model_id,
            max_tokens,
            messages: [RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut req = self
            .client
            .post(&self.config.endpoint)
            .timeout(timeout)
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.header("x-api-key", key);
        }

        let resp = req.send().map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(timeout)
            } else {
                OracleError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::Throttled(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body_text = resp.text().unwrap_or_default();
            return Err(OracleError::Unavailable(format!("HTTP {status}: {body_text}")));
        }

        let parsed: MessagesResponse = resp.json().map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(timeout)
            } else {
                OracleError::Malformed(e.to_string())
            }
        })?;
        extract_text(parsed)
    }
}

fn extract_text(resp: MessagesResponse) -> Result<String, OracleError> {
    let text = resp
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(OracleError::Malformed("empty content".to_string()));
    }
    Ok(text)
}
