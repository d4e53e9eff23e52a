// 该文件是 Jingjie （警戒） 项目的一部分。
// src/pipeline.rs - 图像与视频处理流水线
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

use thiserror::Error;

use crate::{
  input::InputError, model::ModelInferenceError, output::OutputError, storage::ArtifactError,
};

mod image;
mod summary;
mod video;

pub use self::image::{ImagePipeline, ImageReport};
pub use self::summary::{ClassEnrichment, ClassSummary, DetectionSummary};
pub use self::video::{SampleOutcome, VideoPipeline, VideoReport};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("参数错误: {0}")]
  Validation(String),
  #[error("解码错误: {0}")]
  Decode(#[source] InputError),
  /// 当前构建没有可用的视频解码或编码后端
  #[error("视频后端不可用: {0}")]
  BackendUnavailable(String),
  #[error("模型推理错误: {0}")]
  ModelInference(#[from] ModelInferenceError),
  #[error("无法打开视频输出: {0}")]
  OutputOpen(#[source] OutputError),
  #[error("图像编码错误: {0}")]
  Encode(#[source] OutputError),
  #[error("视频处理错误: {0}")]
  VideoProcessing(String),
  #[error("存储错误: {0}")]
  Artifact(#[from] ArtifactError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

impl PipelineError {
  /// 打开输入失败：后端缺失属于服务端问题，其余视为无法解码
  pub(crate) fn from_open(e: InputError) -> Self {
    match e {
      InputError::Unsupported(what) => Self::BackendUnavailable(format!("无法读取 {}", what)),
      e => Self::Decode(e),
    }
  }
}
