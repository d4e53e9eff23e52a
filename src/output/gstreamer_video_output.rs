// 该文件是 Jingjie （警戒） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频文件输出
//!
//! 将标注后的帧通过 `appsrc ! videoconvert ! <encoder> ! <muxer> ! filesink`
//! 写入视频文件。默认候选顺序：
//!
//! - **H.264 / MP4** (`x264enc`, `mp4mux`)
//! - **MPEG-4 Part 2 / MP4** (`avenc_mpeg4`, `mp4mux`)
//! - **MJPEG / AVI** (`jpegenc`, `avimux`)
//!
//! 缺少插件的候选在打开时失败，由调用方尝试下一个。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{EncoderCandidate, OutputError, VideoSink};
use crate::frame::StreamInfo;

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Missing GStreamer element: {0}")]
  MissingElement(String),
  #[error("Invalid stream parameters: {0:?}")]
  InvalidStream(StreamInfo),
  #[error("Failed to push buffer: {0:?}")]
  FlowError(gst::FlowError),
  #[error("Pipeline error: {0}")]
  PipelineError(String),
}

/// 一个基于 GStreamer 的编码器候选
#[derive(Debug, Clone)]
pub struct GStreamerEncoder {
  name: String,
  encoder: String,
  encoder_properties: Vec<(String, String)>,
  parser: Option<String>,
  muxer: String,
  extension: String,
  finish_timeout: gst::ClockTime,
}

impl GStreamerEncoder {
  pub fn new(name: &str, encoder: &str, muxer: &str, extension: &str) -> Self {
    Self {
      name: name.to_string(),
      encoder: encoder.to_string(),
      encoder_properties: Vec::new(),
      parser: None,
      muxer: muxer.to_string(),
      extension: extension.to_string(),
      finish_timeout: gst::ClockTime::from_seconds(30),
    }
  }

  pub fn with_property(mut self, key: &str, value: &str) -> Self {
    self
      .encoder_properties
      .push((key.to_string(), value.to_string()));
    self
  }

  pub fn with_parser(mut self, parser: &str) -> Self {
    self.parser = Some(parser.to_string());
    self
  }

  pub fn defaults() -> Vec<Self> {
    vec![
      Self::new("h264/mp4", "x264enc", "mp4mux", "mp4")
        .with_property("speed-preset", "fast")
        .with_parser("h264parse"),
      Self::new("mpeg4/mp4", "avenc_mpeg4", "mp4mux", "mp4"),
      Self::new("mjpeg/avi", "jpegenc", "avimux", "avi"),
    ]
  }

  fn required_elements(&self) -> Vec<&str> {
    let mut names = vec!["appsrc", "videoconvert", self.encoder.as_str()];
    if let Some(parser) = &self.parser {
      names.push(parser);
    }
    names.push(&self.muxer);
    names.push("filesink");
    names
  }

  fn build(
    &self,
    path: &Path,
    info: &StreamInfo,
  ) -> Result<GStreamerVideoSink, GStreamerVideoOutputError> {
    gst::init()?;

    if !info.is_valid() {
      return Err(GStreamerVideoOutputError::InvalidStream(*info));
    }
    if let Some(missing) = self
      .required_elements()
      .into_iter()
      .find(|name| gst::ElementFactory::find(name).is_none())
    {
      return Err(GStreamerVideoOutputError::MissingElement(missing.to_string()));
    }

    let video_info = gst_video::VideoInfo::builder(
      gst_video::VideoFormat::Rgb,
      info.width,
      info.height,
    )
    .fps(gst::Fraction::new(
      info.frame_rate.numerator as i32,
      info.frame_rate.denominator as i32,
    ))
    .build()?;
    let caps = video_info.to_caps()?;

    let appsrc = gst_app::AppSrc::builder()
      .name("src")
      .caps(&caps)
      .format(gst::Format::Time)
      .block(true)
      .build();
    let convert = gst::ElementFactory::make("videoconvert").build()?;
    let encoder = gst::ElementFactory::make(&self.encoder).build()?;
    for (key, value) in &self.encoder_properties {
      encoder.set_property_from_str(key, value);
    }
    let muxer = gst::ElementFactory::make(&self.muxer).build()?;
    let filesink = gst::ElementFactory::make("filesink")
      .property("location", path.to_string_lossy().as_ref())
      .build()?;

    let mut chain: Vec<gst::Element> = vec![appsrc.clone().upcast(), convert, encoder];
    if let Some(parser) = &self.parser {
      chain.push(gst::ElementFactory::make(parser).build()?);
    }
    chain.push(muxer);
    chain.push(filesink);

    let pipeline = gst::Pipeline::new();
    pipeline.add_many(&chain)?;
    gst::Element::link_many(&chain)?;

    info!(
      "Creating video output pipeline {}: {}x{} @ {} fps -> {}",
      self.name,
      info.width,
      info.height,
      info.frame_rate,
      path.display()
    );

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(e.into());
    }

    Ok(GStreamerVideoSink {
      pipeline,
      appsrc,
      video_info,
      info: *info,
      frames_written: 0,
      finished: false,
      finish_timeout: self.finish_timeout,
    })
  }
}

impl EncoderCandidate for GStreamerEncoder {
  fn name(&self) -> &str {
    &self.name
  }

  fn extension(&self) -> &str {
    &self.extension
  }

  fn open(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn VideoSink>, OutputError> {
    let sink = self.build(path, info)?;
    Ok(Box::new(sink))
  }
}

/// GStreamer 视频写入器
pub struct GStreamerVideoSink {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  video_info: gst_video::VideoInfo,
  info: StreamInfo,
  frames_written: u64,
  finished: bool,
  finish_timeout: gst::ClockTime,
}

impl GStreamerVideoSink {
  fn push_frame(&mut self, frame: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let width = self.info.width as usize;
    let height = self.info.height as usize;
    let stride = self.video_info.stride()[0] as usize;
    let row = width * 3;

    // appsrc 的 RGB 行按 4 字节对齐
    let data = if stride == row {
      frame.as_raw().clone()
    } else {
      let mut data = vec![0u8; self.video_info.size()];
      for (y, src) in frame.as_raw().chunks_exact(row).take(height).enumerate() {
        data[y * stride..y * stride + row].copy_from_slice(src);
      }
      data
    };

    let mut buffer = gst::Buffer::from_mut_slice(data);
    {
      let buffer = buffer.get_mut().ok_or_else(|| {
        GStreamerVideoOutputError::PipelineError("Buffer is not writable".to_string())
      })?;
      let rate = self.info.frame_rate;
      buffer.set_pts(gst::ClockTime::from_nseconds(
        rate.timestamp_ns(self.frames_written),
      ));
      buffer.set_duration(gst::ClockTime::from_nseconds(rate.frame_duration_ns()));
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(GStreamerVideoOutputError::FlowError)?;
    self.frames_written += 1;
    Ok(())
  }

  fn wait_for_eos(&self) -> Result<(), GStreamerVideoOutputError> {
    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Pipeline has no bus".to_string()))?;
    match bus.timed_pop_filtered(
      self.finish_timeout,
      &[gst::MessageType::Eos, gst::MessageType::Error],
    ) {
      Some(msg) => match msg.view() {
        gst::MessageView::Eos(_) => Ok(()),
        gst::MessageView::Error(err) => Err(GStreamerVideoOutputError::PipelineError(format!(
          "{} ({:?})",
          err.error(),
          err.debug()
        ))),
        _ => Ok(()),
      },
      None => Err(GStreamerVideoOutputError::PipelineError(
        "Timed out waiting for end of stream".to_string(),
      )),
    }
  }
}

impl VideoSink for GStreamerVideoSink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    if self.finished {
      return Err(OutputError::SinkClosed);
    }
    if !self.info.matches(frame) {
      return Err(OutputError::FrameSizeMismatch {
        expected_width: self.info.width,
        expected_height: self.info.height,
        width: frame.width(),
        height: frame.height(),
      });
    }
    self.push_frame(frame)?;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let result = self
      .appsrc
      .end_of_stream()
      .map_err(GStreamerVideoOutputError::FlowError)
      .and_then(|_| self.wait_for_eos());
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
    result?;

    info!(
      "Video output closed. Total frames written: {}",
      self.frames_written
    );
    Ok(())
  }

  fn frames_written(&self) -> u64 {
    self.frames_written
  }
}

impl Drop for GStreamerVideoSink {
  fn drop(&mut self) {
    if !self.finished {
      debug!(
        "Aborting video output after {} frames",
        self.frames_written
      );
      if let Err(e) = self.pipeline.set_state(gst::State::Null) {
        warn!("Failed to stop GStreamer video output pipeline: {}", e);
      }
    }
  }
}
