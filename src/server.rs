// 该文件是 Jingjie （警戒） 项目的一部分。
// src/server.rs - HTTP 服务
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

//! 上传检测、结果下载与健康检查接口。
//!
//! 处理流水线是阻塞调用，在 `spawn_blocking` 中运行；
//! 武器信息查询在请求任务中异步完成。

use std::{net::SocketAddr, sync::Arc};

use axum::{
  Json, Router,
  body::Body,
  extract::{DefaultBodyLimit, Request, State},
  http::{HeaderValue, Method, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::{
  cors::{Any, CorsLayer},
  services::ServeFile,
  trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
  config::ServiceConfig,
  enrichment::Enricher,
  input::VideoOpener,
  model::Detector,
  output::{Annotator, EncoderCandidate},
  pipeline::{ImagePipeline, VideoPipeline},
  storage::{ArtifactError, ArtifactStore, StorageLayout, file_extension},
};

mod error;
mod image;
mod upload;
mod video;

pub use self::error::ApiError;
pub use self::upload::{MediaKind, validate_upload_name};

pub const IMAGE_URL_PREFIX: &str = "/api/image/processed";
pub const VIDEO_URL_PREFIX: &str = "/api/video/processed";

/// 服务运行所需的各项能力
pub struct ServiceComponents {
  pub detector: Arc<dyn Detector>,
  pub annotator: Annotator,
  pub enricher: Arc<dyn Enricher>,
  pub video_opener: Arc<dyn VideoOpener>,
  pub encoders: Vec<Arc<dyn EncoderCandidate>>,
}

pub struct AppState {
  config: ServiceConfig,
  layout: StorageLayout,
  images: ArtifactStore,
  videos: ArtifactStore,
  components: ServiceComponents,
}

pub type SharedState = Arc<AppState>;

impl AppState {
  /// 创建存储目录并组装状态
  pub fn new(config: ServiceConfig, components: ServiceComponents) -> Result<Self, ArtifactError> {
    let layout = StorageLayout::new(&config.data_dir);
    layout.prepare()?;
    Ok(Self {
      images: ArtifactStore::new(layout.processed_images(), IMAGE_URL_PREFIX),
      videos: ArtifactStore::new(layout.processed_videos(), VIDEO_URL_PREFIX),
      layout,
      config,
      components,
    })
  }

  pub fn config(&self) -> &ServiceConfig {
    &self.config
  }

  pub fn layout(&self) -> &StorageLayout {
    &self.layout
  }

  pub fn model_loaded(&self) -> bool {
    self.components.detector.is_loaded()
  }

  pub fn enricher(&self) -> &dyn Enricher {
    self.components.enricher.as_ref()
  }

  pub fn image_pipeline(&self) -> ImagePipeline<'_> {
    ImagePipeline::new(
      self.components.detector.as_ref(),
      &self.components.annotator,
      &self.images,
      &self.config.detection,
    )
  }

  pub fn video_pipeline(&self) -> VideoPipeline<'_> {
    VideoPipeline::new(
      self.components.detector.as_ref(),
      &self.components.annotator,
      self.components.video_opener.as_ref(),
      &self.components.encoders,
      &self.videos,
      &self.config.detection,
    )
  }

  fn ensure_model_loaded(&self) -> Result<(), ApiError> {
    if self.model_loaded() {
      Ok(())
    } else {
      Err(ApiError::service_unavailable("Model not loaded"))
    }
  }

  /// 清理过期文件，阻塞调用
  fn sweep_expired(&self) {
    let removed = self.layout.sweep(self.config.retention);
    if removed > 0 {
      debug!("清理了 {} 个过期文件", removed);
    }
  }
}

pub fn router(state: SharedState) -> Router {
  let body_limit = state.config.max_upload_bytes;
  Router::new()
    .route("/api/health", get(health))
    .route("/api/image/detect", post(image::detect))
    .route("/api/image/processed/:name", get(image::processed))
    .route("/api/video/detect", post(video::detect))
    .route("/api/video/processed/:name", get(video::processed))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(cors_layer())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

fn cors_layer() -> CorsLayer {
  CorsLayer::new()
    .allow_origin(Any)
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers([header::CONTENT_TYPE, header::RANGE])
    .expose_headers([
      header::CONTENT_RANGE,
      header::CONTENT_LENGTH,
      header::CONTENT_TYPE,
    ])
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
  Json(json!({
    "status": "healthy",
    "model_loaded": state.model_loaded(),
  }))
}

/// 按扩展名决定下载时的 Content-Type
pub fn content_type_for(name: &str) -> &'static str {
  match file_extension(name).as_deref() {
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("png") => "image/png",
    Some("mp4") => "video/mp4",
    Some("avi") => "video/x-msvideo",
    Some("mov") => "video/quicktime",
    _ => "application/octet-stream",
  }
}

/// 发送已发布的文件，支持 Range 请求
async fn serve_artifact(
  store: &ArtifactStore,
  name: &str,
  request: Request,
) -> Result<Response, ApiError> {
  let path = store.resolve(name)?;
  let response = match ServeFile::new(&path).oneshot(request).await {
    Ok(response) => response,
    Err(never) => match never {},
  };
  let mut response = response.map(Body::new);
  if response.status().is_success() {
    response.headers_mut().insert(
      header::CONTENT_TYPE,
      HeaderValue::from_static(content_type_for(name)),
    );
  }
  Ok(response)
}

/// 绑定地址并运行，直到收到 Ctrl-C
pub async fn serve(state: SharedState, addr: SocketAddr) -> std::io::Result<()> {
  let listener = TcpListener::bind(addr).await?;
  info!("服务监听 http://{}", listener.local_addr()?);
  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!("无法监听中断信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到中断信号，准备退出...");
}
