// 该文件是 Jingjie （警戒） 项目的一部分。
// src/enrichment/fallback.rs - 内置武器资料
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

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{DescriptiveRecord, Enricher, NO_INFORMATION, RISK_UNASSESSED, RiskRecord};

struct FallbackEntry {
  name: &'static str,
  kind: &'static str,
  description: &'static str,
  effective_range: &'static str,
  risk_factor: &'static str,
  prevention_measures: &'static [&'static str],
}

const KNIFE: FallbackEntry = FallbackEntry {
  name: "Knife",
  kind: "Edged Weapon",
  description: "A bladed weapon used for cutting or stabbing. Can cause severe injuries or fatalities.",
  effective_range: "Close range",
  risk_factor: "high",
  prevention_measures: &[
    "Install metal detectors",
    "Implement strict security checks",
    "Train security personnel in knife detection",
  ],
};

const GUN: FallbackEntry = FallbackEntry {
  name: "Firearm",
  kind: "Ranged Weapon",
  description: "A ranged weapon that uses explosive propellant to launch projectiles. Can cause multiple casualties.",
  effective_range: "Varies by type",
  risk_factor: "critical",
  prevention_measures: &[
    "Install weapon detection systems",
    "Implement strict access control",
    "Train security personnel in firearm detection",
  ],
};

fn lookup(class_label: &str) -> Option<&'static FallbackEntry> {
  match class_label.trim().to_ascii_lowercase().as_str() {
    "knife" => Some(&KNIFE),
    "gun" | "pistol" | "firearm" => Some(&GUN),
    _ => None,
  }
}

/// 内置资料中的描述，未知类别返回 `None`
pub fn fallback_record(class_label: &str) -> Option<DescriptiveRecord> {
  let entry = lookup(class_label)?;
  let specifications = json!({
    "model": "Various",
    "caliber_or_size": "Varies by type",
    "effective_range": entry.effective_range,
    "weight": "Varies by type",
    "manufacturer": "Various manufacturers",
  });
  Some(DescriptiveRecord {
    name: entry.name.to_string(),
    kind: entry.kind.to_string(),
    description: entry.description.to_string(),
    specifications: specifications.as_object().cloned().unwrap_or_default(),
    risk_factor: entry.risk_factor.to_string(),
    prevention_measures: entry
      .prevention_measures
      .iter()
      .map(|s| s.to_string())
      .collect(),
  })
}

fn fallback_risk(class_label: &str, confidence: Option<f32>) -> Option<RiskRecord> {
  let entry = lookup(class_label)?;
  let confidence = confidence
    .map(|c| format!(" (confidence {:.2})", c))
    .unwrap_or_default();
  Some(RiskRecord {
    threat_analysis: format!("{} detected{}. {}", entry.name, confidence, entry.description),
    risk_level: entry.risk_factor.to_string(),
    recommended_actions: entry
      .prevention_measures
      .iter()
      .map(|s| s.to_string())
      .collect(),
    safety_measures: Vec::new(),
    emergency_procedures: Vec::new(),
  })
}

/// 不访问网络，只使用内置资料
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineEnricher;

#[async_trait]
impl Enricher for OfflineEnricher {
  async fn describe(&self, class_label: &str) -> DescriptiveRecord {
    fallback_record(class_label).unwrap_or_else(|| {
      debug!("内置资料中没有类别 {}", class_label);
      DescriptiveRecord::unknown(class_label, NO_INFORMATION)
    })
  }

  async fn assess_risk(&self, class_label: &str, confidence: Option<f32>) -> RiskRecord {
    fallback_risk(class_label, confidence).unwrap_or_else(|| RiskRecord::unknown(RISK_UNASSESSED))
  }
}
