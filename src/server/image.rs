// 该文件是 Jingjie （警戒） 项目的一部分。
// src/server/image.rs - 图像检测接口
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
use crate::{enrichment::enrich_detections, model::Detection};

#[derive(Debug, Serialize)]
pub struct BoxResponse {
  pub x: i64,
  pub y: i64,
  pub width: i64,
  pub height: i64,
}

impl From<&Detection> for BoxResponse {
  fn from(d: &Detection) -> Self {
    let b = d.bbox;
    Self {
      x: b.x1.round() as i64,
      y: b.y1.round() as i64,
      width: (b.x2 - b.x1).round() as i64,
      height: (b.y2 - b.y1).round() as i64,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct WeaponInfoResponse {
  pub description: String,
  pub specifications: serde_json::Map<String, serde_json::Value>,
  pub risk_assessment: String,
  pub recommended_actions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisEntry {
  pub class: String,
  pub confidence: f32,
  pub bbox: BoxResponse,
  pub weapon_info: WeaponInfoResponse,
}

#[derive(Debug, Serialize)]
pub struct ImageDetectResponse {
  pub success: bool,
  /// 检测数量
  pub detections: usize,
  pub analysis: Vec<AnalysisEntry>,
  pub processed_image_url: String,
}

pub(super) async fn detect(
  State(state): State<SharedState>,
  mut multipart: Multipart,
) -> Result<Json<ImageDetectResponse>, ApiError> {
  let upload = read_upload(&mut multipart, MediaKind::Image).await?;
  state.ensure_model_loaded()?;

  let filename = upload.filename;
  let bytes = upload.bytes;
  let worker = state.clone();
  let report = tokio::task::spawn_blocking(move || {
    worker.sweep_expired();
    worker.image_pipeline().process(&bytes)
  })
  .await??;

  let records = enrich_detections(state.enricher(), &report.detections).await;
  let analysis = report
    .detections
    .iter()
    .map(|d| {
      let weapon_info = match records.get(&d.class_label) {
        Some((info, risk)) => WeaponInfoResponse {
          description: info.description.clone(),
          specifications: info.specifications.clone(),
          risk_assessment: risk.threat_analysis.clone(),
          recommended_actions: risk.recommended_actions.clone(),
        },
        None => WeaponInfoResponse {
          description: String::new(),
          specifications: Default::default(),
          risk_assessment: String::new(),
          recommended_actions: Vec::new(),
        },
      };
      AnalysisEntry {
        class: d.class_label.clone(),
        confidence: d.confidence,
        bbox: BoxResponse::from(d),
        weapon_info,
      }
    })
    .collect::<Vec<_>>();

  info!(
    "图像 {} 检测完成: {} 个目标 -> {}",
    filename,
    analysis.len(),
    report.artifact.url
  );
  Ok(Json(ImageDetectResponse {
    success: true,
    detections: report.detections.len(),
    analysis,
    processed_image_url: report.artifact.url,
  }))
}

pub(super) async fn processed(
  State(state): State<SharedState>,
  Path(name): Path<String>,
  request: Request,
) -> Result<Response, ApiError> {
  serve_artifact(&state.images, &name, request).await
}
