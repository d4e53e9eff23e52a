// 该文件是 Jingjie （警戒） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::frame::{Frame, StreamInfo};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerVideoOpener, GStreamerVideoSource};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image decoding error: {0}")]
  ImageDecodeError(#[from] image::ImageError),
  #[error("Decoded image is empty: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid stream parameters: {0:?}")]
  InvalidStream(StreamInfo),
  #[error("Frame read error: {0}")]
  ReadError(String),
  #[error("No video backend available for {0}")]
  Unsupported(String),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 将上传的字节解码为单帧 RGB 图像
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, InputError> {
  let image = image::load_from_memory(bytes)?.to_rgb8();
  if image.width() == 0 || image.height() == 0 {
    return Err(InputError::EmptyImage {
      width: image.width(),
      height: image.height(),
    });
  }
  Ok(image)
}

/// 视频输入源：按源顺序逐帧产出
pub trait VideoSource: Iterator<Item = Result<Frame, InputError>> + Send {
  /// 几何尺寸和帧率，在读取第一帧之前即可获得
  fn info(&self) -> StreamInfo;
}

/// 根据文件路径打开视频输入源
pub trait VideoOpener: Send + Sync {
  fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, InputError>;
}

/// 未编译任何视频后端时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedVideoOpener;

impl VideoOpener for UnsupportedVideoOpener {
  fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, InputError> {
    Err(InputError::Unsupported(path.display().to_string()))
  }
}

/// 当前构建可用的默认视频输入后端
pub fn default_video_opener() -> std::sync::Arc<dyn VideoOpener> {
  #[cfg(feature = "gstreamer_input")]
  {
    std::sync::Arc::new(GStreamerVideoOpener::default())
  }
  #[cfg(not(feature = "gstreamer_input"))]
  {
    tracing::warn!("未启用 gstreamer_input 特性，视频处理不可用");
    std::sync::Arc::new(UnsupportedVideoOpener)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb};
  use std::io::Cursor;

  #[test]
  fn decodes_png_bytes() {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(7, 5, Rgb([1, 2, 3]))
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    let image = decode_image(&bytes).unwrap();
    assert_eq!(image.dimensions(), (7, 5));
    assert_eq!(image.get_pixel(3, 3), &Rgb([1, 2, 3]));
  }

  #[test]
  fn garbage_is_a_decode_error() {
    assert!(matches!(
      decode_image(b"definitely not an image"),
      Err(InputError::ImageDecodeError(_))
    ));
  }

  #[test]
  fn unsupported_opener_refuses() {
    let err = UnsupportedVideoOpener
      .open(Path::new("/tmp/a.mp4"))
      .err()
      .unwrap();
    assert!(matches!(err, InputError::Unsupported(_)));
  }
}
