// 该文件是 Jingjie （警戒） 项目的一部分。
// src/pipeline/image.rs - 单张图像检测流水线
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

use std::time::Instant;

use tracing::{debug, info};

use super::PipelineError;
use crate::{
  config::DetectionConfig,
  input::decode_image,
  model::{Detection, Detector, sanitize_detections},
  output::{Annotator, encode_image},
  storage::{ArtifactStore, ProcessedArtifact},
};

#[derive(Debug, Clone)]
pub struct ImageReport {
  pub detections: Vec<Detection>,
  pub width: u32,
  pub height: u32,
  pub artifact: ProcessedArtifact,
}

/// 解码 -> 推理一次 -> 标注 -> 保存
pub struct ImagePipeline<'a> {
  detector: &'a dyn Detector,
  annotator: &'a Annotator,
  store: &'a ArtifactStore,
  config: &'a DetectionConfig,
}

impl<'a> ImagePipeline<'a> {
  pub fn new(
    detector: &'a dyn Detector,
    annotator: &'a Annotator,
    store: &'a ArtifactStore,
    config: &'a DetectionConfig,
  ) -> Self {
    Self {
      detector,
      annotator,
      store,
      config,
    }
  }

  /// 处理上传的图像字节；任何一步失败都不会留下输出文件
  pub fn process(&self, bytes: &[u8]) -> Result<ImageReport, PipelineError> {
    let now = Instant::now();
    let mut image = decode_image(bytes).map_err(PipelineError::Decode)?;
    let (width, height) = image.dimensions();
    debug!("图像解码完成: {}x{}", width, height);

    let threshold = self.config.confidence_threshold;
    let raw = self.detector.detect(&image, threshold)?;
    let detections = sanitize_detections(raw, width, height, threshold);
    info!("图像推理完成，检测到 {} 个目标", detections.len());

    self.annotator.annotate_in_place(&mut image, &detections);
    let encoded =
      encode_image(&image, self.config.image_format).map_err(PipelineError::Encode)?;

    let pending = self.store.reserve(self.config.image_extension())?;
    pending.write_all(&encoded)?;
    let artifact = pending.commit()?;
    info!("图像处理完成，耗时: {:.2?}", now.elapsed());

    Ok(ImageReport {
      detections,
      width,
      height,
      artifact,
    })
  }
}
