// 该文件是 Jingjie （警戒） 项目的一部分。
// src/model.rs - 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;
/// 默认 NMS IOU 阈值
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.45;

/// 像素坐标下的边界框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn iou(&self, other: &BBox) -> f32 {
    let ix1 = self.x1.max(other.x1);
    let iy1 = self.y1.max(other.y1);
    let ix2 = self.x2.min(other.x2);
    let iy2 = self.y2.min(other.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = self.area() + other.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
  }

  /// 将边界框裁剪到 `width` x `height` 的画面内；裁剪后退化的框返回 `None`
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<BBox> {
    if !(self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite())
    {
      return None;
    }
    let (w, h) = (width as f32, height as f32);
    let x1 = self.x1.min(self.x2).clamp(0.0, w);
    let x2 = self.x1.max(self.x2).clamp(0.0, w);
    let y1 = self.y1.min(self.y2).clamp(0.0, h);
    let y2 = self.y1.max(self.y2).clamp(0.0, h);
    if x1 < x2 && y1 < y2 {
      Some(BBox { x1, y1, x2, y2 })
    } else {
      None
    }
  }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_label: String,
  pub confidence: f32,
  pub bbox: BBox,
}

impl Detection {
  pub fn new(class_label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
    Self {
      class_label: class_label.into(),
      confidence,
      bbox,
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelInferenceError {
  #[error("帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("置信度阈值无效: {0}")]
  InvalidThreshold(f32),
  #[error("模型未加载")]
  NotLoaded,
  #[error("推理后端错误: {0}")]
  Backend(String),
}

/// 检测能力：给定一帧，返回该帧中的检测结果
///
/// 实现不得修改输入帧；返回结果的顺序不作保证。
pub trait Detector: Send + Sync {
  fn detect(
    &self,
    frame: &RgbImage,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, ModelInferenceError>;

  fn is_loaded(&self) -> bool {
    true
  }
}

impl<D: Detector + ?Sized> Detector for Arc<D> {
  fn detect(
    &self,
    frame: &RgbImage,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, ModelInferenceError> {
    (**self).detect(frame, confidence_threshold)
  }

  fn is_loaded(&self) -> bool {
    (**self).is_loaded()
  }
}

/// 推理前的输入检查
pub fn check_input(frame: &RgbImage, confidence_threshold: f32) -> Result<(), ModelInferenceError> {
  if frame.width() == 0 || frame.height() == 0 {
    return Err(ModelInferenceError::EmptyFrame {
      width: frame.width(),
      height: frame.height(),
    });
  }
  if !(confidence_threshold > 0.0 && confidence_threshold <= 1.0) {
    return Err(ModelInferenceError::InvalidThreshold(confidence_threshold));
  }
  Ok(())
}

/// 不信任检测器输出：裁剪到画面内，丢弃退化框和低于阈值的结果
pub fn sanitize_detections(
  detections: Vec<Detection>,
  width: u32,
  height: u32,
  confidence_threshold: f32,
) -> Vec<Detection> {
  let total = detections.len();
  let kept: Vec<Detection> = detections
    .into_iter()
    .filter(|d| d.confidence >= confidence_threshold && d.confidence <= 1.0)
    .filter_map(|d| {
      let bbox = d.bbox.clamp_to(width, height)?;
      Some(Detection { bbox, ..d })
    })
    .collect();
  if kept.len() != total {
    debug!("丢弃 {} 个无效检测结果", total - kept.len());
  }
  kept
}

/// 按类别做贪心 NMS
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
  for det in detections {
    let suppressed = kept
      .iter()
      .any(|k| k.class_label == det.class_label && k.bbox.iou(&det.bbox) > iou_threshold);
    if !suppressed {
      kept.push(det);
    }
  }
  kept
}

/// 未加载模型时的占位检测器
#[derive(Debug, Default, Clone, Copy)]
pub struct UnloadedDetector;

impl Detector for UnloadedDetector {
  fn detect(&self, _frame: &RgbImage, _threshold: f32) -> Result<Vec<Detection>, ModelInferenceError> {
    Err(ModelInferenceError::NotLoaded)
  }

  fn is_loaded(&self) -> bool {
    false
  }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("不支持的模型方案: {0}")]
  UnsupportedScheme(String),
  #[error("标签文件读取错误: {0}")]
  Labels(#[from] std::io::Error),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 模型错误: {0}")]
  Onnx(#[from] onnx::YoloOnnxError),
}

/// 按 URL 方案加载检测模型，例如 `onnx:///models/best.onnx?size=640`
pub fn load_detector(
  url: &Url,
  labels: Vec<String>,
  nms_threshold: f32,
) -> Result<Arc<dyn Detector>, ModelLoadError> {
  match url.scheme() {
    #[cfg(feature = "model_onnx")]
    scheme if scheme == <onnx::YoloOnnxBuilder as crate::FromUrlWithScheme>::SCHEME => {
      use crate::FromUrl;
      let detector = onnx::YoloOnnxBuilder::from_url(url)?
        .labels(labels)
        .nms_threshold(nms_threshold)
        .build()?;
      Ok(Arc::new(detector))
    }
    scheme => {
      warn!("未编译支持的模型方案: {}", scheme);
      let _ = (labels, nms_threshold);
      Err(ModelLoadError::UnsupportedScheme(scheme.to_string()))
    }
  }
}

/// 读取标签文件，每行一个类别名
pub fn read_labels(path: &std::path::Path) -> Result<Vec<String>, ModelLoadError> {
  let text = std::fs::read_to_string(path)?;
  Ok(
    text
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(String::from)
      .collect(),
  )
}

#[cfg(feature = "model_onnx")]
pub mod onnx;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clamp_keeps_boxes_inside_frame() {
    let dets = vec![
      Detection::new("knife", 0.9, BBox::new(-5.0, -3.0, 120.0, 50.0)),
      Detection::new("gun", 0.8, BBox::new(90.0, 50.0, 80.0, 40.0)),
      Detection::new("gun", 0.7, BBox::new(150.0, 10.0, 160.0, 20.0)),
      Detection::new("gun", 0.6, BBox::new(f32::NAN, 10.0, 20.0, 20.0)),
    ];
    let kept = sanitize_detections(dets, 100, 60, 0.3);
    assert_eq!(kept.len(), 2);
    for d in &kept {
      assert!(0.0 <= d.bbox.x1 && d.bbox.x1 < d.bbox.x2 && d.bbox.x2 <= 100.0);
      assert!(0.0 <= d.bbox.y1 && d.bbox.y1 < d.bbox.y2 && d.bbox.y2 <= 60.0);
    }
    assert_eq!(kept[0].bbox, BBox::new(0.0, 0.0, 100.0, 50.0));
    assert_eq!(kept[1].bbox, BBox::new(80.0, 40.0, 90.0, 50.0));
  }

  #[test]
  fn sanitize_drops_below_threshold() {
    let dets = vec![
      Detection::new("knife", 0.29, BBox::new(1.0, 1.0, 5.0, 5.0)),
      Detection::new("knife", 0.3, BBox::new(1.0, 1.0, 5.0, 5.0)),
    ];
    let kept = sanitize_detections(dets, 10, 10, 0.3);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].confidence, 0.3);
  }

  #[test]
  fn nms_suppresses_same_class_only() {
    let dets = vec![
      Detection::new("gun", 0.6, BBox::new(0.0, 0.0, 10.0, 10.0)),
      Detection::new("gun", 0.9, BBox::new(1.0, 1.0, 11.0, 11.0)),
      Detection::new("knife", 0.5, BBox::new(0.0, 0.0, 10.0, 10.0)),
    ];
    let kept = non_max_suppression(dets, 0.45);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].confidence, 0.9);
    assert_eq!(kept[1].class_label, "knife");
  }

  #[test]
  fn rejects_empty_frame() {
    let err = check_input(&RgbImage::new(0, 10), 0.3).unwrap_err();
    assert!(matches!(err, ModelInferenceError::EmptyFrame { width: 0, height: 10 }));
    assert!(check_input(&RgbImage::new(2, 2), 0.0).is_err());
  }

  #[test]
  fn unloaded_detector_reports_not_loaded() {
    let detector = UnloadedDetector;
    assert!(!detector.is_loaded());
    assert!(matches!(
      detector.detect(&RgbImage::new(2, 2), 0.3),
      Err(ModelInferenceError::NotLoaded)
    ));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rknn:///models/best.rknn").unwrap();
    assert!(matches!(
      load_detector(&url, vec![], DEFAULT_NMS_THRESHOLD),
      Err(ModelLoadError::UnsupportedScheme(_))
    ));
  }
}
