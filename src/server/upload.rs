// 该文件是 Jingjie （警戒） 项目的一部分。
// src/server/upload.rs - 上传文件读取与校验
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

use axum::{body::Bytes, extract::Multipart};
use tracing::debug;

use super::ApiError;
use crate::storage::{file_extension, sanitize_filename};

const FILE_FIELD: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  pub fn allowed_extensions(&self) -> &'static [&'static str] {
    match self {
      MediaKind::Image => &["png", "jpg", "jpeg"],
      MediaKind::Video => &["mp4", "avi", "mov"],
    }
  }
}

/// 校验上传文件名，返回小写扩展名
pub fn validate_upload_name(filename: Option<&str>, kind: MediaKind) -> Result<String, ApiError> {
  let filename = filename.map(str::trim).unwrap_or_default();
  if filename.is_empty() {
    return Err(ApiError::bad_request("No selected file"));
  }
  match file_extension(filename) {
    Some(ext) if kind.allowed_extensions().contains(&ext.as_str()) => Ok(ext),
    _ => Err(ApiError::bad_request("Invalid file type")),
  }
}

#[derive(Debug)]
pub(super) struct Upload {
  /// 清理后的文件名
  pub filename: String,
  pub bytes: Bytes,
}

/// 读取 `file` 字段；扩展名不合法时不读取内容
pub(super) async fn read_upload(multipart: &mut Multipart, kind: MediaKind) -> Result<Upload, ApiError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(FILE_FIELD) {
      continue;
    }
    let original = field.file_name().map(str::to_string);
    validate_upload_name(original.as_deref(), kind)?;
    let filename = sanitize_filename(original.as_deref().unwrap_or_default());

    let bytes = field.bytes().await?;
    if bytes.is_empty() {
      return Err(ApiError::bad_request("Empty file"));
    }
    debug!("收到上传 {} ({} 字节)", filename, bytes.len());
    return Ok(Upload { filename, bytes });
  }
  Err(ApiError::bad_request("No file part"))
}
