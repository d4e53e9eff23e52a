// 该文件是 Jingjie （警戒） 项目的一部分。
// src/pipeline/video.rs - 视频检测流水线
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

use std::{path::Path, sync::Arc, time::Instant};

use image::RgbImage;
use tracing::{debug, info, warn};

use super::{DetectionSummary, PipelineError};
use crate::{
  config::DetectionConfig,
  input::{InputError, VideoOpener},
  model::{Detection, Detector, sanitize_detections},
  output::{Annotator, EncoderCandidate, OpenedSink, VideoSink, open_first_encoder},
  storage::{ArtifactStore, PendingArtifact, ProcessedArtifact},
};

/// 一次抽样推理的结果
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
  Detected(Vec<Detection>),
  Empty,
  /// 推理失败，仅跳过该帧
  Skipped(String),
}

#[derive(Debug, Clone)]
pub struct VideoReport {
  pub summary: DetectionSummary,
  /// 实际读取的帧数
  pub total_frames: u64,
  /// 写入输出的帧数
  pub processed_frames: u64,
  pub sampled_frames: u64,
  pub skipped_samples: u64,
  /// 流水线本身的耗时（秒），不含上传保存和信息查询
  pub processing_time: f64,
  pub encoder: String,
  pub artifact: ProcessedArtifact,
}

/// 写入器先于临时文件释放
struct OutputGuard {
  sink: Box<dyn VideoSink>,
  pending: PendingArtifact,
}

/// 打开输入 -> 打开输出 -> 逐帧抽样推理、标注、写入 -> 汇总
pub struct VideoPipeline<'a> {
  detector: &'a dyn Detector,
  annotator: &'a Annotator,
  opener: &'a dyn VideoOpener,
  encoders: &'a [Arc<dyn EncoderCandidate>],
  store: &'a ArtifactStore,
  config: &'a DetectionConfig,
}

impl<'a> VideoPipeline<'a> {
  pub fn new(
    detector: &'a dyn Detector,
    annotator: &'a Annotator,
    opener: &'a dyn VideoOpener,
    encoders: &'a [Arc<dyn EncoderCandidate>],
    store: &'a ArtifactStore,
    config: &'a DetectionConfig,
  ) -> Self {
    Self {
      detector,
      annotator,
      opener,
      encoders,
      store,
      config,
    }
  }

  fn sample(&self, image: &RgbImage, index: u64) -> SampleOutcome {
    let threshold = self.config.confidence_threshold;
    match self.detector.detect(image, threshold) {
      Ok(raw) => {
        let dets = sanitize_detections(raw, image.width(), image.height(), threshold);
        if dets.is_empty() {
          SampleOutcome::Empty
        } else {
          SampleOutcome::Detected(dets)
        }
      }
      Err(e) => {
        warn!("第 {} 帧推理失败，跳过: {}", index, e);
        SampleOutcome::Skipped(e.to_string())
      }
    }
  }

  pub fn process(&self, path: &Path) -> Result<VideoReport, PipelineError> {
    let started = Instant::now();
    let stride = self.config.stride;
    if stride == 0 {
      return Err(PipelineError::Validation("抽帧间隔必须大于 0".to_string()));
    }
    if self.encoders.is_empty() {
      return Err(PipelineError::BackendUnavailable(
        "没有配置任何视频编码器".to_string(),
      ));
    }

    let mut source = self.opener.open(path).map_err(PipelineError::from_open)?;
    let info = source.info();
    if !info.is_valid() {
      return Err(PipelineError::Decode(InputError::InvalidStream(info)));
    }
    info!(
      "打开视频 {}: {}x{} @ {} fps，声明帧数 {:?}",
      path.display(),
      info.width,
      info.height,
      info.frame_rate,
      info.frame_count
    );

    let OpenedSink {
      encoder,
      sink,
      target: pending,
      ..
    } = open_first_encoder(self.encoders, &info, |ext| {
      let pending = self.store.reserve(ext)?;
      let path = pending.temp_path().to_path_buf();
      Ok((pending, path))
    })
    .map_err(PipelineError::OutputOpen)?;
    let mut output = OutputGuard { sink, pending };

    let mut summary = DetectionSummary::new();
    let mut frames_read: u64 = 0;
    let mut sampled_frames: u64 = 0;
    let mut skipped_samples: u64 = 0;

    for item in source.by_ref() {
      let index = frames_read;
      let frame = item.map_err(|e| {
        PipelineError::VideoProcessing(format!("读取第 {} 帧失败: {}", index, e))
      })?;
      if !info.matches(&frame.image) {
        return Err(PipelineError::VideoProcessing(format!(
          "第 {} 帧尺寸 {}x{} 与视频流 {}x{} 不一致",
          index,
          frame.width(),
          frame.height(),
          info.width,
          info.height
        )));
      }
      let mut image = frame.image;

      if index % stride == 0 {
        sampled_frames += 1;
        match self.sample(&image, index) {
          SampleOutcome::Detected(dets) => {
            debug!("第 {} 帧检测到 {} 个目标", index, dets.len());
            for det in &dets {
              summary.record(index, det);
            }
            self.annotator.annotate_in_place(&mut image, &dets);
          }
          SampleOutcome::Empty => {}
          SampleOutcome::Skipped(_) => skipped_samples += 1,
        }
      }

      output.sink.write_frame(&image).map_err(|e| {
        PipelineError::VideoProcessing(format!("写入第 {} 帧失败: {}", index, e))
      })?;
      frames_read += 1;
    }

    if frames_read == 0 {
      return Err(PipelineError::Decode(InputError::ReadError(
        "视频不包含任何帧".to_string(),
      )));
    }

    output
      .sink
      .finish()
      .map_err(|e| PipelineError::VideoProcessing(format!("关闭视频输出失败: {}", e)))?;
    let processed_frames = output.sink.frames_written();
    drop(source);

    let OutputGuard { sink, pending } = output;
    drop(sink);
    let artifact = pending.commit()?;

    let processing_time = started.elapsed().as_secs_f64();
    info!(
      "视频处理完成: {} 帧，抽样 {} 帧（跳过 {}），{} 个类别，耗时 {:.2}s",
      frames_read,
      sampled_frames,
      skipped_samples,
      summary.len(),
      processing_time
    );

    Ok(VideoReport {
      summary,
      total_frames: frames_read,
      processed_frames,
      sampled_frames,
      skipped_samples,
      processing_time,
      encoder,
      artifact,
    })
  }
}
