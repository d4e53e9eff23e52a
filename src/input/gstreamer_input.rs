// 该文件是 Jingjie （警戒） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频文件输入
//!
//! 通过 `filesrc ! decodebin ! videoconvert ! appsink` 逐帧解码上传的视频文件。
//! appsink 不丢帧，保证源中每一帧都按顺序交给调用方。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{InputError, VideoOpener, VideoSource};
use crate::frame::{Frame, FrameRate, StreamInfo};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 基于 GStreamer 的视频文件打开器
#[derive(Debug, Clone)]
pub struct GStreamerVideoOpener {
  /// 等待管道进入 PAUSED 状态的超时
  preroll_timeout: gst::ClockTime,
}

impl Default for GStreamerVideoOpener {
  fn default() -> Self {
    Self {
      preroll_timeout: gst::ClockTime::from_seconds(10),
    }
  }
}

impl VideoOpener for GStreamerVideoOpener {
  fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, InputError> {
    let source = GStreamerVideoSource::open(path, self.preroll_timeout)?;
    Ok(Box::new(source))
  }
}

/// GStreamer 视频源
///
/// 创建时即完成预解码，因此在读取第一帧前就能给出尺寸与帧率。
pub struct GStreamerVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  info: StreamInfo,
  next_index: u64,
  finished: bool,
}

impl GStreamerVideoSource {
  pub fn open(path: &Path, preroll_timeout: gst::ClockTime) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let pipeline = gst::Pipeline::new();
    let src = gst::ElementFactory::make("filesrc")
      .property("location", path.to_string_lossy().as_ref())
      .build()?;
    let decode = gst::ElementFactory::make("decodebin").build()?;
    let convert = gst::ElementFactory::make("videoconvert").build()?;
    let appsink = gst_app::AppSink::builder()
      .name("sink")
      .caps(
        &gst_video::VideoCapsBuilder::new()
          .format(gst_video::VideoFormat::Rgb)
          .build(),
      )
      .max_buffers(4)
      .drop(false)
      .sync(false)
      .build();

    pipeline.add_many([&src, &decode, &convert, appsink.upcast_ref::<gst::Element>()])?;
    gst::Element::link_many([&src, &decode])?;
    gst::Element::link_many([&convert, appsink.upcast_ref::<gst::Element>()])?;

    // decodebin 的 pad 在识别出流后才出现，只连接第一个视频 pad
    let convert_weak = convert.downgrade();
    decode.connect_pad_added(move |_, pad| {
      let Some(convert) = convert_weak.upgrade() else {
        return;
      };
      let Some(sink_pad) = convert.static_pad("sink") else {
        return;
      };
      if sink_pad.is_linked() {
        return;
      }
      let is_video = pad
        .current_caps()
        .and_then(|caps| {
          caps
            .structure(0)
            .map(|s| s.name().starts_with("video/"))
        })
        .unwrap_or(false);
      if !is_video {
        debug!("Ignoring non-video pad {}", pad.name());
        return;
      }
      if let Err(e) = pad.link(&sink_pad) {
        warn!("Failed to link decodebin pad: {:?}", e);
      }
    });

    info!("Opening video file {}", path.display());
    pipeline.set_state(gst::State::Paused)?;

    let mut source = GStreamerVideoSource {
      pipeline,
      appsink,
      info: StreamInfo::new(0, 0, FrameRate::default()),
      next_index: 0,
      finished: false,
    };
    source.info = source.preroll(preroll_timeout)?;
    source.pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video stream {}x{} @ {} fps, declared frames {:?}",
      source.info.width, source.info.height, source.info.frame_rate, source.info.frame_count
    );
    Ok(source)
  }

  fn preroll(&self, timeout: gst::ClockTime) -> Result<StreamInfo, GStreamerInputError> {
    let (result, _, _) = self.pipeline.state(timeout);
    if let Err(e) = result {
      return Err(self.bus_error().unwrap_or(GStreamerInputError::StateChangeError(e)));
    }

    let caps = self
      .appsink
      .static_pad("sink")
      .and_then(|pad| pad.current_caps())
      .ok_or_else(|| {
        self
          .bus_error()
          .unwrap_or_else(|| GStreamerInputError::PipelineError("No video stream found".to_string()))
      })?;
    let video_info =
      gst_video::VideoInfo::from_caps(&caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let fps = video_info.fps();
    let frame_rate = if fps.numer() > 0 && fps.denom() > 0 {
      FrameRate::new(fps.numer() as u32, fps.denom() as u32)
    } else {
      warn!("Container reports no frame rate, assuming {}", FrameRate::default());
      FrameRate::default()
    };

    let frame_count = self
      .pipeline
      .query_duration::<gst::ClockTime>()
      .map(|duration| {
        let ns = duration.nseconds() as u128;
        (ns * frame_rate.numerator as u128 / (frame_rate.denominator as u128 * 1_000_000_000))
          as u64
      });

    Ok(
      StreamInfo::new(video_info.width(), video_info.height(), frame_rate)
        .with_frame_count(frame_count),
    )
  }

  fn bus_error(&self) -> Option<GStreamerInputError> {
    let bus = self.pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
      gst::MessageView::Error(err) => Some(GStreamerInputError::PipelineError(format!(
        "{} ({:?})",
        err.error(),
        err.debug()
      ))),
      _ => None,
    }
  }

  fn pull_frame(&mut self) -> Option<Result<Frame, GStreamerInputError>> {
    match self.appsink.pull_sample() {
      Ok(sample) => {
        let frame = sample_to_image(&sample).map(|image| {
          Frame::new(image, self.next_index, self.info.frame_rate)
        });
        self.next_index += 1;
        Some(frame)
      }
      Err(_) if self.appsink.is_eos() => {
        debug!("End of stream after {} frames", self.next_index);
        None
      }
      Err(e) => Some(Err(self.bus_error().unwrap_or(
        GStreamerInputError::GStreamerBoolError(e),
      ))),
    }
  }
}

impl Iterator for GStreamerVideoSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    let item = self.pull_frame();
    if !matches!(item, Some(Ok(_))) {
      self.finished = true;
    }
    item.map(|r| r.map_err(InputError::from))
  }
}

impl VideoSource for GStreamerVideoSource {
  fn info(&self) -> StreamInfo {
    self.info
  }
}

impl Drop for GStreamerVideoSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 行之间可能有填充字节
  let mut pixels = Vec::with_capacity(width * height * 3);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + width * 3]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in 0..height {
        let start = row * stride;
        for px in data[start..start + width * 3].chunks_exact(3) {
          pixels.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
    }
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: 0,
    },
  )
}
