// 该文件是 Jingjie （警戒） 项目的一部分。
// src/enrichment.rs - 武器信息与风险评估
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

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{config::EnrichmentConfig, model::Detection};

mod clock;
mod fallback;
mod gemini;
mod rate_limit;

pub use self::clock::{Clock, SystemClock};
pub use self::fallback::{OfflineEnricher, fallback_record};
pub use self::gemini::GeminiEnricher;
pub use self::rate_limit::RateLimiter;

pub const NO_INFORMATION: &str = "No information available";
pub const INFORMATION_ERROR: &str = "Error retrieving information";
pub const RISK_UNASSESSED: &str = "Unable to assess risk";
pub const RISK_ERROR: &str = "Error assessing risk";
const UNKNOWN: &str = "unknown";

#[derive(Error, Debug)]
pub enum EnrichmentError {
  #[error("HTTP 请求错误: {0}")]
  Http(#[from] reqwest::Error),
  #[error("服务返回错误状态 {status}: {body}")]
  Status { status: u16, body: String },
  #[error("响应中没有文本内容")]
  EmptyResponse,
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("URL 错误: {0}")]
  Url(#[from] url::ParseError),
}

impl EnrichmentError {
  /// 服务有响应但内容无法解析
  pub fn is_parse_failure(&self) -> bool {
    matches!(self, EnrichmentError::Json(_) | EnrichmentError::EmptyResponse)
  }
}

/// 武器的描述性资料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveRecord {
  #[serde(default)]
  pub name: String,
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub specifications: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub risk_factor: String,
  #[serde(default)]
  pub prevention_measures: Vec<String>,
}

impl DescriptiveRecord {
  pub fn unknown(name: &str, description: &str) -> Self {
    Self {
      name: name.to_string(),
      kind: UNKNOWN.to_string(),
      description: description.to_string(),
      specifications: serde_json::Map::new(),
      risk_factor: UNKNOWN.to_string(),
      prevention_measures: Vec::new(),
    }
  }
}

/// 风险评估
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
  #[serde(default)]
  pub threat_analysis: String,
  #[serde(default)]
  pub risk_level: String,
  #[serde(default)]
  pub recommended_actions: Vec<String>,
  #[serde(default)]
  pub safety_measures: Vec<String>,
  #[serde(default)]
  pub emergency_procedures: Vec<String>,
}

impl RiskRecord {
  pub fn unknown(threat_analysis: &str) -> Self {
    Self {
      threat_analysis: threat_analysis.to_string(),
      risk_level: UNKNOWN.to_string(),
      recommended_actions: Vec::new(),
      safety_measures: Vec::new(),
      emergency_procedures: Vec::new(),
    }
  }
}

/// 信息查询能力；失败时返回 "unknown" 记录而不是错误
#[async_trait]
pub trait Enricher: Send + Sync {
  async fn describe(&self, class_label: &str) -> DescriptiveRecord;
  async fn assess_risk(&self, class_label: &str, confidence: Option<f32>) -> RiskRecord;
}

#[async_trait]
impl<E: Enricher + ?Sized> Enricher for Arc<E> {
  async fn describe(&self, class_label: &str) -> DescriptiveRecord {
    (**self).describe(class_label).await
  }

  async fn assess_risk(&self, class_label: &str, confidence: Option<f32>) -> RiskRecord {
    (**self).assess_risk(class_label, confidence).await
  }
}

/// 根据配置选择在线或离线实现
pub fn build_enricher(config: &EnrichmentConfig) -> Result<Arc<dyn Enricher>, EnrichmentError> {
  match &config.api_key {
    Some(key) if !key.trim().is_empty() => {
      let enricher = GeminiEnricher::new(config, key.trim().to_string(), SystemClock)?;
      info!(
        "武器信息使用 Gemini 模型 {}，限流 {} 次 / {:?}",
        config.model, config.rate_limit, config.rate_window
      );
      Ok(Arc::new(enricher))
    }
    _ => {
      info!("未配置 GEMINI_API_KEY，武器信息使用内置资料");
      Ok(Arc::new(OfflineEnricher))
    }
  }
}

/// 每个不同类别只查询一次，使用该类别的最高置信度
pub async fn enrich_classes<'a, I>(
  enricher: &dyn Enricher,
  classes: I,
) -> BTreeMap<String, (DescriptiveRecord, RiskRecord)>
where
  I: IntoIterator<Item = (&'a str, f32)>,
{
  let mut best: BTreeMap<&str, f32> = BTreeMap::new();
  for (label, confidence) in classes {
    let entry = best.entry(label).or_insert(confidence);
    *entry = entry.max(confidence);
  }

  let mut records = BTreeMap::new();
  for (label, confidence) in best {
    let descriptive = enricher.describe(label).await;
    let risk = enricher.assess_risk(label, Some(confidence)).await;
    records.insert(label.to_string(), (descriptive, risk));
  }
  records
}

/// 便于对检测结果直接调用
pub async fn enrich_detections(
  enricher: &dyn Enricher,
  detections: &[Detection],
) -> BTreeMap<String, (DescriptiveRecord, RiskRecord)> {
  enrich_classes(
    enricher,
    detections
      .iter()
      .map(|d| (d.class_label.as_str(), d.confidence)),
  )
  .await
}
