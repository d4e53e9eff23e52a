// 该文件是 Jingjie （警戒） 项目的一部分。
// src/server/video.rs - 视频检测接口
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

use axum::{
  Json,
  extract::{Multipart, Path, Request, State},
  response::Response,
};
use serde::Serialize;
use tracing::info;

use super::{
  ApiError, SharedState, serve_artifact,
  upload::{MediaKind, read_upload},
};
use crate::{
  enrichment::enrich_classes,
  pipeline::{ClassEnrichment, DetectionSummary, PipelineError},
};

#[derive(Debug, Serialize)]
pub struct VideoDetectResponse {
  pub success: bool,
  pub total_frames: u64,
  pub processed_frames: u64,
  /// 从收到请求到响应的耗时（秒）
  pub processing_time: f64,
  pub detections_summary: DetectionSummary,
  pub processed_video_url: String,
}

pub(super) async fn detect(
  State(state): State<SharedState>,
  mut multipart: Multipart,
) -> Result<Json<VideoDetectResponse>, ApiError> {
  let started = Instant::now();
  let upload = read_upload(&mut multipart, MediaKind::Video).await?;
  state.ensure_model_loaded()?;

  let worker = state.clone();
  let report = tokio::task::spawn_blocking(move || {
    worker.sweep_expired();
    // 上传文件在处理结束后随 `saved` 一起删除
    let saved = worker
      .layout()
      .save_upload(&upload.filename, &upload.bytes)
      .map_err(PipelineError::from)?;
    worker.video_pipeline().process(saved.path())
  })
  .await??;

  let mut summary = report.summary;
  let classes = summary
    .classes()
    .map(|(label, class)| (label, class.max_confidence))
    .collect::<Vec<_>>();
  let records = enrich_classes(state.enricher(), classes).await;
  for (label, (info, risk_assessment)) in records {
    summary.set_enrichment(
      &label,
      ClassEnrichment {
        info,
        risk_assessment,
      },
    );
  }

  let processing_time = started.elapsed().as_secs_f64();
  info!(
    "视频检测完成: {} 帧, {} 个类别, 流水线 {:.2} 秒, 总耗时 {:.2} 秒 -> {}",
    report.processed_frames,
    summary.len(),
    report.processing_time,
    processing_time,
    report.artifact.url
  );
  Ok(Json(VideoDetectResponse {
    success: true,
    total_frames: report.total_frames,
    processed_frames: report.processed_frames,
    processing_time,
    detections_summary: summary,
    processed_video_url: report.artifact.url,
  }))
}

pub(super) async fn processed(
  State(state): State<SharedState>,
  Path(name): Path<String>,
  request: Request,
) -> Result<Response, ApiError> {
  serve_artifact(&state.videos, &name, request).await
}
