// 该文件是 Jingjie （警戒） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  io::Cursor,
  path::{Path, PathBuf},
  sync::Arc,
};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{info, warn};

use crate::{frame::StreamInfo, storage::ArtifactError};

pub mod draw;
pub use self::draw::{Annotator, AnnotatorError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerEncoder, GStreamerVideoOutputError, GStreamerVideoSink};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("图像编码错误: {0}")]
  ImageEncodeError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("没有可用的视频编码器，已尝试: {0:?}")]
  NoEncoderAvailable(Vec<String>),
  #[error("帧尺寸不一致: 期望 {expected_width}x{expected_height}，实际 {width}x{height}")]
  FrameSizeMismatch {
    expected_width: u32,
    expected_height: u32,
    width: u32,
    height: u32,
  },
  #[error("视频写入器已关闭")]
  SinkClosed,
  #[error("编码器错误: {0}")]
  Encoder(String),
  #[error("输出文件错误: {0}")]
  Storage(#[from] ArtifactError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
}

/// 将图像编码为指定格式的字节
pub fn encode_image(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, OutputError> {
  let mut bytes = Vec::new();
  image.write_to(&mut Cursor::new(&mut bytes), format)?;
  Ok(bytes)
}

/// 视频写入器
///
/// `finish` 之后文件才完整；未调用 `finish` 就被丢弃视为中止。
pub trait VideoSink: Send {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError>;
  fn finish(&mut self) -> Result<(), OutputError>;
  fn frames_written(&self) -> u64;
}

/// 一个候选编码器（编码格式 + 容器）
pub trait EncoderCandidate: Send + Sync {
  fn name(&self) -> &str;
  /// 输出文件扩展名，不含点
  fn extension(&self) -> &str;
  fn open(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn VideoSink>, OutputError>;
}

/// 成功打开的写入器及其输出目标
pub struct OpenedSink<T> {
  pub encoder: String,
  pub extension: String,
  pub sink: Box<dyn VideoSink>,
  pub target: T,
}

/// 按顺序尝试候选编码器，第一个成功的即被采用
///
/// `reserve` 根据扩展名分配输出目标并返回写入路径；候选失败时目标被丢弃。
pub fn open_first_encoder<T>(
  candidates: &[Arc<dyn EncoderCandidate>],
  info: &StreamInfo,
  mut reserve: impl FnMut(&str) -> Result<(T, PathBuf), OutputError>,
) -> Result<OpenedSink<T>, OutputError> {
  let mut attempted = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let (target, path) = reserve(candidate.extension())?;
    match candidate.open(&path, info) {
      Ok(sink) => {
        info!(
          "使用编码器 {} 输出 {}x{} @ {} fps",
          candidate.name(),
          info.width,
          info.height,
          info.frame_rate
        );
        return Ok(OpenedSink {
          encoder: candidate.name().to_string(),
          extension: candidate.extension().to_string(),
          sink,
          target,
        });
      }
      Err(e) => {
        warn!("编码器 {} 不可用: {}", candidate.name(), e);
        attempted.push(candidate.name().to_string());
      }
    }
  }
  Err(OutputError::NoEncoderAvailable(attempted))
}

/// 当前构建可用的默认编码器列表，按优先级排列
pub fn default_encoders() -> Vec<Arc<dyn EncoderCandidate>> {
  #[cfg(feature = "gstreamer_output")]
  {
    GStreamerEncoder::defaults()
      .into_iter()
      .map(|e| Arc::new(e) as Arc<dyn EncoderCandidate>)
      .collect()
  }
  #[cfg(not(feature = "gstreamer_output"))]
  {
    warn!("未启用 gstreamer_output 特性，没有可用的视频编码器");
    Vec::new()
  }
}
