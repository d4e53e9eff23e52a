// 该文件是 Jingjie （警戒） 项目的一部分。
// src/frame.rs - 帧与视频流参数定义
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

use image::RgbImage;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引，从 0 开始
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, frame_rate: FrameRate) -> Self {
    Self {
      image,
      index,
      timestamp_ms: frame_rate.timestamp_ns(index) / 1_000_000,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 帧率，以分数表示（例如 30000/1001）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
  pub numerator: u32,
  pub denominator: u32,
}

impl FrameRate {
  pub const fn new(numerator: u32, denominator: u32) -> Self {
    Self {
      numerator,
      denominator,
    }
  }

  pub const fn per_second(fps: u32) -> Self {
    Self::new(fps, 1)
  }

  pub fn is_valid(&self) -> bool {
    self.numerator > 0 && self.denominator > 0
  }

  pub fn as_f64(&self) -> f64 {
    if self.denominator == 0 {
      return 0.0;
    }
    self.numerator as f64 / self.denominator as f64
  }

  /// 单帧时长（纳秒）
  pub fn frame_duration_ns(&self) -> u64 {
    if self.numerator == 0 {
      return 0;
    }
    NANOS_PER_SECOND * self.denominator as u64 / self.numerator as u64
  }

  /// 第 `index` 帧的显示时间（纳秒）
  pub fn timestamp_ns(&self, index: u64) -> u64 {
    if self.numerator == 0 {
      return 0;
    }
    index * NANOS_PER_SECOND * self.denominator as u64 / self.numerator as u64
  }
}

impl Default for FrameRate {
  fn default() -> Self {
    Self::per_second(30)
  }
}

impl std::fmt::Display for FrameRate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.numerator, self.denominator)
  }
}

/// 视频流参数：输出写入器必须与输入源保持一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
  pub width: u32,
  pub height: u32,
  pub frame_rate: FrameRate,
  /// 容器声明的帧数（可能不准确或未知）
  pub frame_count: Option<u64>,
}

impl StreamInfo {
  pub fn new(width: u32, height: u32, frame_rate: FrameRate) -> Self {
    Self {
      width,
      height,
      frame_rate,
      frame_count: None,
    }
  }

  pub fn with_frame_count(mut self, frame_count: Option<u64>) -> Self {
    self.frame_count = frame_count;
    self
  }

  pub fn is_valid(&self) -> bool {
    self.width > 0 && self.height > 0 && self.frame_rate.is_valid()
  }

  pub fn matches(&self, image: &RgbImage) -> bool {
    image.width() == self.width && image.height() == self.height
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ntsc_frame_rate_timestamps() {
    let rate = FrameRate::new(30000, 1001);
    assert_eq!(rate.frame_duration_ns(), 33_366_666);
    assert_eq!(rate.timestamp_ns(30), 1_001_000_000);
    assert!((rate.as_f64() - 29.97).abs() < 0.01);
  }

  #[test]
  fn zero_rate_is_invalid() {
    let rate = FrameRate::new(0, 1);
    assert!(!rate.is_valid());
    assert_eq!(rate.timestamp_ns(10), 0);
    assert!(!StreamInfo::new(640, 480, rate).is_valid());
  }

  #[test]
  fn frame_timestamp_follows_rate() {
    let frame = Frame::new(RgbImage::new(4, 4), 45, FrameRate::per_second(30));
    assert_eq!(frame.timestamp_ms, 1500);
  }
}
