// 该文件是 Jingjie （警戒） 项目的一部分。
// src/model/onnx.rs - ONNX YOLO 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 基于 ONNX Runtime 的 YOLO 检测器
//!
//! 支持 YOLOv8 风格的单输出导出模型，输出形状为 `[1, 4 + C, N]`
//! 或 `[1, N, 4 + C]`，前四个特征为输入尺度下的 `cx, cy, w, h`。
//!
//! # URL 格式
//!
//! - `onnx:///models/best.onnx` - 默认输入尺寸 640
//! - `onnx:///models/best.onnx?size=320` - 指定方形输入尺寸

use std::sync::Mutex;

use image::{RgbImage, imageops::FilterType};
use ndarray::Array4;
use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    BBox, DEFAULT_NMS_THRESHOLD, Detection, Detector, ModelInferenceError, check_input,
    non_max_suppression,
  },
};

const DEFAULT_INPUT_SIZE: u32 = 640;
const MIN_INPUT_SIZE: u32 = 32;
const MAX_INPUT_SIZE: u32 = 2048;

#[derive(Error, Debug)]
pub enum YoloOnnxError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型文件不存在: {0}")]
  ModelNotFound(String),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(#[from] ort::Error),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

pub struct YoloOnnxBuilder {
  model_path: String,
  input_size: u32,
  labels: Vec<String>,
  nms_threshold: f32,
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloOnnxBuilder {
  type Error = YoloOnnxError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloOnnxError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let input_size = url
      .query_pairs()
      .find(|(k, _)| k == "size")
      .and_then(|(_, v)| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_INPUT_SIZE);

    if !(MIN_INPUT_SIZE..=MAX_INPUT_SIZE).contains(&input_size) {
      return Err(YoloOnnxError::ValidationError(format!(
        "输入尺寸 {} 超出有效范围 [{}, {}]",
        input_size, MIN_INPUT_SIZE, MAX_INPUT_SIZE
      )));
    }

    Ok(YoloOnnxBuilder {
      model_path: url.path().to_string(),
      input_size,
      labels: Vec::new(),
      nms_threshold: DEFAULT_NMS_THRESHOLD,
    })
  }
}

impl YoloOnnxBuilder {
  pub fn labels(mut self, labels: Vec<String>) -> Self {
    self.labels = labels;
    self
  }

  pub fn nms_threshold(mut self, nms_threshold: f32) -> Self {
    self.nms_threshold = nms_threshold;
    self
  }

  pub fn build(self) -> Result<YoloOnnx, YoloOnnxError> {
    if !std::path::Path::new(&self.model_path).is_file() {
      return Err(YoloOnnxError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path);
    let session = Session::builder()?.commit_from_file(&self.model_path)?;
    info!(
      "模型加载完成，输入尺寸 {}x{}，类别数 {}",
      self.input_size,
      self.input_size,
      self.labels.len()
    );

    Ok(YoloOnnx {
      session: Mutex::new(session),
      input_size: self.input_size,
      labels: self.labels,
      nms_threshold: self.nms_threshold,
    })
  }
}

/// ONNX YOLO 检测器，推理在内部串行执行
pub struct YoloOnnx {
  session: Mutex<Session>,
  input_size: u32,
  labels: Vec<String>,
  nms_threshold: f32,
}

impl YoloOnnx {
  fn label(&self, class_id: usize) -> String {
    self
      .labels
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }

  fn preprocess(&self, frame: &RgbImage) -> Array4<f32> {
    let size = self.input_size;
    let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
    let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
      for c in 0..3 {
        input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
      }
    }
    input
  }

  fn run(&self, input: Array4<f32>) -> Result<(Vec<i64>, Vec<f32>), ModelInferenceError> {
    let backend = |e: ort::Error| {
      error!("ONNX 推理错误: {}", e);
      ModelInferenceError::Backend(e.to_string())
    };

    let tensor = Tensor::from_array(input).map_err(backend)?;
    let mut session = self
      .session
      .lock()
      .map_err(|_| ModelInferenceError::Backend("推理会话锁已中毒".to_string()))?;
    let outputs = session.run(ort::inputs![tensor]).map_err(backend)?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(backend)?;
    Ok((shape.to_vec(), data.to_vec()))
  }

  fn postprocess(
    &self,
    shape: &[i64],
    data: &[f32],
    frame_width: u32,
    frame_height: u32,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, ModelInferenceError> {
    if shape.len() != 3 || shape.iter().any(|&d| d <= 0) {
      return Err(ModelInferenceError::Backend(format!(
        "模型输出形状无效: {:?}",
        shape
      )));
    }

    // 特征维较小的一侧视为 4 + C
    let (features, anchors, transposed) = if shape[1] <= shape[2] {
      (shape[1] as usize, shape[2] as usize, false)
    } else {
      (shape[2] as usize, shape[1] as usize, true)
    };
    if features <= 4 || data.len() < features * anchors {
      return Err(ModelInferenceError::Backend(format!(
        "模型输出大小不匹配: 形状 {:?}, 数据长度 {}",
        shape,
        data.len()
      )));
    }
    let at = |feature: usize, anchor: usize| {
      if transposed {
        data[anchor * features + feature]
      } else {
        data[feature * anchors + anchor]
      }
    };

    let scale_x = frame_width as f32 / self.input_size as f32;
    let scale_y = frame_height as f32 / self.input_size as f32;
    let mut candidates = Vec::new();

    for anchor in 0..anchors {
      let (class_id, score) = (4..features)
        .map(|f| (f - 4, at(f, anchor)))
        .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

      if score < confidence_threshold {
        continue;
      }

      let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
      candidates.push(Detection::new(
        self.label(class_id),
        score.min(1.0),
        BBox::new(
          (cx - w / 2.0) * scale_x,
          (cy - h / 2.0) * scale_y,
          (cx + w / 2.0) * scale_x,
          (cy + h / 2.0) * scale_y,
        ),
      ));
    }

    debug!("NMS 前候选数: {}", candidates.len());
    Ok(non_max_suppression(candidates, self.nms_threshold))
  }
}

impl Detector for YoloOnnx {
  fn detect(
    &self,
    frame: &RgbImage,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, ModelInferenceError> {
    check_input(frame, confidence_threshold)?;
    let input = self.preprocess(frame);
    let (shape, data) = self.run(input)?;
    self.postprocess(
      &shape,
      &data,
      frame.width(),
      frame.height(),
      confidence_threshold,
    )
  }
}
