// 该文件是 Jingjie （警戒） 项目的一部分。
// src/pipeline/summary.rs - 视频检测汇总
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

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
  enrichment::{DescriptiveRecord, RiskRecord},
  model::Detection,
};

/// 单个类别在整段视频中的统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
  /// 检测次数；同一帧内的多个检测各计一次
  pub count: u64,
  pub max_confidence: f32,
  /// 每次检测所在的帧号，按出现顺序
  pub frames_detected: Vec<u64>,
  #[serde(flatten, skip_serializing_if = "Option::is_none")]
  pub enrichment: Option<ClassEnrichment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassEnrichment {
  pub info: DescriptiveRecord,
  pub risk_assessment: RiskRecord,
}

/// 类别名 -> 统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DetectionSummary {
  classes: BTreeMap<String, ClassSummary>,
}

impl DetectionSummary {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, frame_index: u64, detection: &Detection) {
    let entry = self
      .classes
      .entry(detection.class_label.clone())
      .or_insert_with(|| ClassSummary {
        count: 0,
        max_confidence: 0.0,
        frames_detected: Vec::new(),
        enrichment: None,
      });
    entry.count += 1;
    entry.max_confidence = entry.max_confidence.max(detection.confidence);
    entry.frames_detected.push(frame_index);
  }

  pub fn get(&self, class_label: &str) -> Option<&ClassSummary> {
    self.classes.get(class_label)
  }

  pub fn classes(&self) -> impl Iterator<Item = (&str, &ClassSummary)> {
    self.classes.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.classes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.classes.is_empty()
  }

  /// 所有类别的检测总数
  pub fn total_detections(&self) -> u64 {
    self.classes.values().map(|c| c.count).sum()
  }

  pub fn set_enrichment(&mut self, class_label: &str, enrichment: ClassEnrichment) {
    if let Some(entry) = self.classes.get_mut(class_label) {
      entry.enrichment = Some(enrichment);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  #[test]
  fn record_tracks_count_max_and_frames() {
    let mut summary = DetectionSummary::new();
    let bbox = BBox::new(0.0, 0.0, 1.0, 1.0);
    summary.record(0, &Detection::new("gun", 0.5, bbox));
    summary.record(30, &Detection::new("gun", 0.8, bbox));
    summary.record(30, &Detection::new("knife", 0.4, bbox));
    summary.record(60, &Detection::new("gun", 0.7, bbox));

    let gun = summary.get("gun").unwrap();
    assert_eq!(gun.count, 3);
    assert_eq!(gun.max_confidence, 0.8);
    assert_eq!(gun.frames_detected, vec![0, 30, 60]);
    assert_eq!(summary.total_detections(), 4);
    for (_, class) in summary.classes() {
      assert_eq!(class.count as usize, class.frames_detected.len());
    }
  }

  #[test]
  fn serializes_as_plain_map() {
    let mut summary = DetectionSummary::new();
    summary.record(3, &Detection::new("knife", 0.5, BBox::new(0.0, 0.0, 1.0, 1.0)));
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["knife"]["count"], 1);
    assert_eq!(json["knife"]["frames_detected"][0], 3);
    assert!(json["knife"].get("info").is_none());
    assert!(json["knife"].get("enrichment").is_none());
  }
}
