// 该文件是 Jingjie （警戒） 项目的一部分。
// src/enrichment/gemini.rs - Gemini 在线查询
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 通过 Gemini `generateContent` 接口获取武器资料与风险评估。
//!
//! 所有请求共享一个限流器；模型返回的 JSON 可能被 Markdown 代码块包裹。

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error};
use url::Url;

use super::{
  DescriptiveRecord, Enricher, EnrichmentError, INFORMATION_ERROR, NO_INFORMATION, RISK_ERROR,
  RISK_UNASSESSED, RateLimiter, RiskRecord,
  clock::{Clock, SystemClock},
  fallback::fallback_record,
};
use crate::config::EnrichmentConfig;

pub struct GeminiEnricher<C = SystemClock> {
  client: Client,
  endpoint: Url,
  model: String,
  api_key: String,
  limiter: RateLimiter<C>,
}

impl<C: Clock> GeminiEnricher<C> {
  pub fn new(config: &EnrichmentConfig, api_key: String, clock: C) -> Result<Self, EnrichmentError> {
    let mut endpoint = Url::parse(&config.endpoint)?;
    if !endpoint.path().ends_with('/') {
      let path = format!("{}/", endpoint.path());
      endpoint.set_path(&path);
    }
    let client = Client::builder().timeout(config.request_timeout).build()?;
    Ok(Self {
      client,
      endpoint,
      model: config.model.clone(),
      api_key,
      limiter: RateLimiter::new(config.rate_limit, config.rate_window, clock),
    })
  }

  pub fn limiter(&self) -> &RateLimiter<C> {
    &self.limiter
  }

  fn request_url(&self) -> Result<Url, EnrichmentError> {
    let model = urlencoding::encode(&self.model);
    let mut url = self
      .endpoint
      .join(&format!("models/{}:generateContent", model))?;
    url.query_pairs_mut().append_pair("key", &self.api_key);
    Ok(url)
  }

  async fn generate(&self, prompt: &str) -> Result<String, EnrichmentError> {
    self.limiter.acquire().await;

    let body = json!({
      "contents": [{ "parts": [{ "text": prompt }] }],
    });
    let response = self
      .client
      .post(self.request_url()?)
      .json(&body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(EnrichmentError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let value: serde_json::Value = response.json().await?;
    value["candidates"][0]["content"]["parts"][0]["text"]
      .as_str()
      .map(str::to_string)
      .ok_or(EnrichmentError::EmptyResponse)
  }

  async fn generate_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, EnrichmentError> {
    let text = self.generate(prompt).await?;
    debug!("Gemini 响应长度 {} 字节", text.len());
    Ok(parse_model_json(&text)?)
  }
}

fn describe_prompt(class_label: &str) -> String {
  format!(
    r#"Analyze this weapon and provide information in the following JSON format:
{{
  "name": "{class_label}",
  "type": "weapon type",
  "description": "detailed description",
  "specifications": {{
    "model": "specific model if known",
    "caliber_or_size": "caliber or size information",
    "effective_range": "effective range",
    "weight": "weight information",
    "manufacturer": "manufacturer if known"
  }},
  "risk_factor": "low/medium/high",
  "prevention_measures": ["list of prevention measures"]
}}

Provide accurate and detailed information about {class_label}. Respond with JSON only."#
  )
}

fn risk_prompt(class_label: &str, confidence: Option<f32>) -> String {
  let confidence = confidence
    .map(|c| format!(" with {:.2} confidence", c))
    .unwrap_or_default();
  format!(
    r#"Analyze the risk of {class_label}{confidence} and provide assessment in the following JSON format:
{{
  "threat_analysis": "detailed threat analysis",
  "risk_level": "low/medium/high",
  "recommended_actions": ["list of recommended actions"],
  "safety_measures": ["list of safety measures"],
  "emergency_procedures": ["list of emergency procedures"]
}}

Provide a comprehensive risk assessment. Respond with JSON only."#
  )
}

/// 去掉 ```json ... ``` 包裹后解析
pub(crate) fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
  let trimmed = text.trim();
  let body = match trimmed.strip_prefix("```") {
    Some(rest) => {
      let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
      rest.trim_end().strip_suffix("```").unwrap_or(rest)
    }
    None => trimmed,
  };
  serde_json::from_str(body.trim())
}

#[async_trait]
impl<C: Clock> Enricher for GeminiEnricher<C> {
  async fn describe(&self, class_label: &str) -> DescriptiveRecord {
    match self
      .generate_json::<DescriptiveRecord>(&describe_prompt(class_label))
      .await
    {
      Ok(mut record) => {
        if record.name.is_empty() {
          record.name = class_label.to_string();
        }
        record
      }
      Err(e) if e.is_parse_failure() => {
        error!("无法解析 {} 的武器资料: {}", class_label, e);
        DescriptiveRecord::unknown(class_label, NO_INFORMATION)
      }
      Err(e) => {
        error!("获取 {} 的武器资料失败: {}", class_label, e);
        fallback_record(class_label)
          .unwrap_or_else(|| DescriptiveRecord::unknown(class_label, INFORMATION_ERROR))
      }
    }
  }

  async fn assess_risk(&self, class_label: &str, confidence: Option<f32>) -> RiskRecord {
    match self
      .generate_json::<RiskRecord>(&risk_prompt(class_label, confidence))
      .await
    {
      Ok(record) => record,
      Err(e) if e.is_parse_failure() => {
        error!("无法解析 {} 的风险评估: {}", class_label, e);
        RiskRecord::unknown(RISK_UNASSESSED)
      }
      Err(e) => {
        error!("获取 {} 的风险评估失败: {}", class_label, e);
        RiskRecord::unknown(RISK_ERROR)
      }
    }
  }
}
