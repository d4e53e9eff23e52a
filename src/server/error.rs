// 该文件是 Jingjie （警戒） 项目的一部分。
// src/server/error.rs - 接口错误响应
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
  extract::multipart::MultipartError,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::task::JoinError;
use tracing::{error, warn};

use crate::{model::ModelInferenceError, pipeline::PipelineError, storage::ArtifactError};

/// 返回给调用方的错误：状态码和一条可读的消息
///
/// 详细原因只写入日志。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
  status: StatusCode,
  message: String,
}

impl ApiError {
  pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
    Self {
      status,
      message: message.into(),
    }
  }

  pub fn bad_request(message: impl Into<String>) -> Self {
    Self::new(StatusCode::BAD_REQUEST, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(StatusCode::NOT_FOUND, message)
  }

  pub fn service_unavailable(message: impl Into<String>) -> Self {
    Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = Json(json!({
      "success": false,
      "error": self.message,
    }));
    (self.status, body).into_response()
  }
}

impl From<PipelineError> for ApiError {
  fn from(e: PipelineError) -> Self {
    match e {
      PipelineError::Validation(message) => {
        warn!("请求参数错误: {}", message);
        Self::bad_request(message)
      }
      PipelineError::Decode(e) => {
        warn!("上传文件无法解码: {}", e);
        Self::bad_request("Failed to decode uploaded file")
      }
      PipelineError::BackendUnavailable(message) => {
        error!("视频后端不可用: {}", message);
        Self::service_unavailable("Video processing not available")
      }
      PipelineError::ModelInference(ModelInferenceError::NotLoaded) => {
        Self::service_unavailable("Model not loaded")
      }
      PipelineError::ModelInference(e) => {
        error!("推理失败: {}", e);
        Self::internal("Detection failed")
      }
      PipelineError::OutputOpen(e) => {
        error!("无法创建输出视频: {}", e);
        Self::internal("Error creating output video")
      }
      PipelineError::VideoProcessing(message) => {
        error!("视频处理失败: {}", message);
        Self::internal("Error processing video")
      }
      e @ (PipelineError::Encode(_) | PipelineError::Artifact(_) | PipelineError::Io(_)) => {
        error!("保存处理结果失败: {}", e);
        Self::internal("Error saving processed file")
      }
    }
  }
}

impl From<ArtifactError> for ApiError {
  fn from(e: ArtifactError) -> Self {
    match e {
      ArtifactError::InvalidName(name) => {
        warn!("拒绝非法文件名: {}", name);
        Self::bad_request("Invalid file name")
      }
      ArtifactError::NotFound(_) => Self::not_found("Processed file not found"),
      e => {
        error!("读取处理结果失败: {}", e);
        Self::internal("Error reading processed file")
      }
    }
  }
}

impl From<MultipartError> for ApiError {
  fn from(e: MultipartError) -> Self {
    warn!("读取上传内容失败: {}", e);
    Self::new(e.status(), e.body_text())
  }
}

impl From<JoinError> for ApiError {
  fn from(e: JoinError) -> Self {
    error!("处理任务异常退出: {}", e);
    Self::internal("Internal processing error")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::InputError;

  #[test]
  fn pipeline_errors_map_to_status() {
    let cases = [
      (
        PipelineError::Validation("stride".into()),
        StatusCode::BAD_REQUEST,
      ),
      (
        PipelineError::Decode(InputError::ReadError("bad".into())),
        StatusCode::BAD_REQUEST,
      ),
      (
        PipelineError::ModelInference(ModelInferenceError::NotLoaded),
        StatusCode::SERVICE_UNAVAILABLE,
      ),
      (
        PipelineError::from_open(InputError::Unsupported("a.mp4".into())),
        StatusCode::SERVICE_UNAVAILABLE,
      ),
      (
        PipelineError::from_open(InputError::ReadError("bad".into())),
        StatusCode::BAD_REQUEST,
      ),
      (
        PipelineError::ModelInference(ModelInferenceError::Backend("x".into())),
        StatusCode::INTERNAL_SERVER_ERROR,
      ),
      (
        PipelineError::VideoProcessing("x".into()),
        StatusCode::INTERNAL_SERVER_ERROR,
      ),
    ];
    for (error, status) in cases {
      assert_eq!(ApiError::from(error).status(), status);
    }
  }

  #[test]
  fn artifact_lookup_errors() {
    assert_eq!(
      ApiError::from(ArtifactError::NotFound("a.jpg".into())).status(),
      StatusCode::NOT_FOUND
    );
    assert_eq!(
      ApiError::from(ArtifactError::InvalidName("../a".into())).status(),
      StatusCode::BAD_REQUEST
    );
  }
}
