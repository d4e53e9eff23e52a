// 该文件是 Jingjie （警戒） 项目的一部分。
// src/config.rs - 服务配置
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

use std::{path::PathBuf, time::Duration};

use image::ImageFormat;
use thiserror::Error;
use url::Url;

use crate::model::DEFAULT_CONFIDENCE_THRESHOLD;

/// 默认每 30 帧推理一次
pub const DEFAULT_FRAME_STRIDE: u64 = 30;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_RATE_LIMIT: usize = 3;
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("置信度阈值必须在 (0, 1] 内: {0}")]
  InvalidConfidence(f32),
  #[error("抽帧间隔必须大于 0")]
  InvalidStride,
  #[error("限流参数无效: {calls} 次 / {window:?}")]
  InvalidRateLimit { calls: usize, window: Duration },
  #[error("上传大小上限必须大于 0")]
  InvalidUploadLimit,
  #[error("URL 解析错误: {0}")]
  Url(#[from] url::ParseError),
}

/// 检测流水线参数
#[derive(Debug, Clone)]
pub struct DetectionConfig {
  pub confidence_threshold: f32,
  /// 视频每隔多少帧推理一次
  pub stride: u64,
  /// 处理后图像的编码格式
  pub image_format: ImageFormat,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      stride: DEFAULT_FRAME_STRIDE,
      image_format: ImageFormat::Jpeg,
    }
  }
}

impl DetectionConfig {
  pub fn with_confidence_threshold(mut self, confidence_threshold: f32) -> Self {
    self.confidence_threshold = confidence_threshold;
    self
  }

  pub fn with_stride(mut self, stride: u64) -> Self {
    self.stride = stride;
    self
  }

  pub fn with_image_format(mut self, image_format: ImageFormat) -> Self {
    self.image_format = image_format;
    self
  }

  /// 处理后图像的文件扩展名
  pub fn image_extension(&self) -> &'static str {
    self.image_format.extensions_str().first().copied().unwrap_or("jpg")
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
      return Err(ConfigError::InvalidConfidence(self.confidence_threshold));
    }
    if self.stride == 0 {
      return Err(ConfigError::InvalidStride);
    }
    Ok(())
  }
}

/// 武器信息查询参数
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
  /// 未设置时使用内置离线资料
  pub api_key: Option<String>,
  pub model: String,
  /// Gemini REST 接口根地址
  pub endpoint: String,
  pub rate_limit: usize,
  pub rate_window: Duration,
  pub request_timeout: Duration,
}

impl Default for EnrichmentConfig {
  fn default() -> Self {
    Self {
      api_key: None,
      model: DEFAULT_GEMINI_MODEL.to_string(),
      endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
      rate_limit: DEFAULT_RATE_LIMIT,
      rate_window: DEFAULT_RATE_WINDOW,
      request_timeout: Duration::from_secs(30),
    }
  }
}

impl EnrichmentConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.rate_limit == 0 || self.rate_window.is_zero() {
      return Err(ConfigError::InvalidRateLimit {
        calls: self.rate_limit,
        window: self.rate_window,
      });
    }
    Url::parse(&self.endpoint)?;
    Ok(())
  }
}

/// 整个服务的不可变配置
#[derive(Debug, Clone)]
pub struct ServiceConfig {
  pub data_dir: PathBuf,
  pub detection: DetectionConfig,
  pub enrichment: EnrichmentConfig,
  pub max_upload_bytes: usize,
  /// 上传和处理结果的保留时长
  pub retention: Duration,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      data_dir: PathBuf::from("."),
      detection: DetectionConfig::default(),
      enrichment: EnrichmentConfig::default(),
      max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
      retention: DEFAULT_RETENTION,
    }
  }
}

impl ServiceConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    self.detection.validate()?;
    self.enrichment.validate()?;
    if self.max_upload_bytes == 0 {
      return Err(ConfigError::InvalidUploadLimit);
    }
    Ok(())
  }
}
