//! 使用大模型为数据文件生成摘要

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::warn;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::metrics;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const NO_DESCRIPTION: &str = "No description available to summarize.";
pub const NOT_CONFIGURED: &str = "Gemini API key not configured.";

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// 摘要生成接口
///
/// 调用没有副作用，失败后可以直接重试。
pub trait Summarizer: Send + Sync {
    fn summarize(&self, prompt: &str) -> Result<String>;
}

/// 指数退避的重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最多调用次数，包括第一次
    pub max_attempts: u32,
    pub multiplier: f64,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier: 1.,
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次调用失败后的等待时间，`attempt` 从 1 开始
    pub fn wait(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.saturating_sub(1).min(62) as i32);
        let secs = self.multiplier * exp;
        let wait = Duration::try_from_secs_f64(secs).unwrap_or(self.max_wait);
        wait.clamp(self.min_wait, self.max_wait.max(self.min_wait))
    }

    /// 调用 `f` 直到成功或达到最大次数，返回最后一次的错误
    pub fn run<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let wait = self.wait(attempt);
                    warn!("第 {attempt} 次调用失败，{:.1}s 后重试: {e}", wait.as_secs_f32());
                    thread::sleep(wait);
                    attempt += 1;
                }
            }
        }
    }
}

/// Gemini `generateContent` 接口
pub struct GeminiSummarizer {
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiSummarizer {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "Gemini API key 为空");
        anyhow::ensure!(!model.trim().is_empty(), "Gemini 模型名称为空");
        Ok(Self { api_key, model, timeout: Duration::from_secs(60) })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Summarizer for GeminiSummarizer {
    fn summarize(&self, prompt: &str) -> Result<String> {
        // 阻塞客户端不能在异步上下文中创建或销毁，所以每次调用时创建
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(self.api_key.trim()).context("无效的 Gemini API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .context("创建 HTTP 客户端失败")?;

        let part = GeneratePart { text: prompt.to_string() };
        let body = GenerateRequest { contents: vec![GenerateContent { parts: vec![part] }] };
        let url = format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model);
        let resp = client.post(url).json(&body).send().context("调用 Gemini 接口失败")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Gemini 返回 {status}: {text}");
        }
        let parsed: GenerateResponse = resp.json().context("解析 Gemini 响应失败")?;
        extract_text(parsed)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeneratePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GenerateContent>,
}

fn extract_text(resp: GenerateResponse) -> Result<String> {
    let Some(candidate) = resp.candidates.into_iter().next() else {
        bail!("Gemini 响应中没有候选结果");
    };
    let text = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
        .unwrap_or_default();
    if text.is_empty() {
        bail!("Gemini 响应中没有文本");
    }
    Ok(text)
}

/// 面向研究人员的摘要提示词
pub fn build_prompt(file: &str, description: &str) -> String {
    format!(
        "Summarize the following geophysical dataset metadata for a researcher. \
         Focus on its format, dimensions, and potential usefulness.\n\n\
         File: {file}\nMetadata: {description}"
    )
}

/// 为数据文件生成摘要
///
/// 描述为空或没有配置模型时返回固定的提示文字，不视为错误。
pub fn summarize_dataset(
    summarizer: Option<&dyn Summarizer>,
    policy: &RetryPolicy,
    file: &str,
    description: &str,
) -> Result<String> {
    if description.trim().is_empty() {
        return Ok(NO_DESCRIPTION.to_string());
    }
    let Some(summarizer) = summarizer else {
        return Ok(NOT_CONFIGURED.to_string());
    };
    let prompt = build_prompt(file, description);
    policy.run(|| summarizer.summarize(&prompt)).inspect_err(|_| metrics::inc_summarize_failure())
}
