// 该文件是 Jingjie （警戒） 项目的一部分。
// src/storage.rs - 上传文件与处理结果存储
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 数据目录布局：
//!
//! ```text
//! <root>/uploads/            上传的视频（处理后删除）
//! <root>/processed_images/   标注后的图像
//! <root>/processed_videos/   标注后的视频
//! ```
//!
//! 处理结果先写入隐藏的 `.<name>.part` 临时文件，完成后再以不覆盖的方式
//! 发布为最终文件名，因此读取方永远看不到写了一半的文件。

use std::{
  fs::{self, OpenOptions},
  io::{ErrorKind, Write},
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
  time::{Duration, SystemTime},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const UPLOADS_DIR: &str = "uploads";
pub const PROCESSED_IMAGES_DIR: &str = "processed_images";
pub const PROCESSED_VIDEOS_DIR: &str = "processed_videos";

const TEMP_SUFFIX: &str = ".part";
const WRITE_PROBE: &str = ".write_probe";

#[derive(Error, Debug)]
pub enum ArtifactError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("目录无法创建: {path}: {source}")]
  DirectoryNotCreatable {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("文件名无效: {0}")]
  InvalidName(String),
  #[error("文件不存在: {0}")]
  NotFound(String),
  #[error("文件已存在: {0}")]
  AlreadyExists(String),
}

/// 清理文件名：去掉路径部分，只保留 `[A-Za-z0-9._-]`
pub fn sanitize_filename(name: &str) -> String {
  let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
  let cleaned: String = base
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
        c
      } else {
        '_'
      }
    })
    .collect();
  let cleaned = cleaned.trim_start_matches('.');
  if cleaned.is_empty() {
    "upload".to_string()
  } else {
    cleaned.to_string()
  }
}

/// 小写扩展名，不含点
pub fn file_extension(name: &str) -> Option<String> {
  let base = name.rsplit(['/', '\\']).next()?;
  let (stem, ext) = base.rsplit_once('.')?;
  if stem.is_empty() || ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}

fn timestamp() -> String {
  chrono::Utc::now().format("%Y%m%d_%H%M%S%3f").to_string()
}

/// 数据根目录及其子目录
#[derive(Debug, Clone)]
pub struct StorageLayout {
  root: PathBuf,
}

impl StorageLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn uploads(&self) -> PathBuf {
    self.root.join(UPLOADS_DIR)
  }

  pub fn processed_images(&self) -> PathBuf {
    self.root.join(PROCESSED_IMAGES_DIR)
  }

  pub fn processed_videos(&self) -> PathBuf {
    self.root.join(PROCESSED_VIDEOS_DIR)
  }

  fn directories(&self) -> [PathBuf; 3] {
    [self.uploads(), self.processed_images(), self.processed_videos()]
  }

  /// 创建所有目录并探测写权限；不可写只记录警告
  pub fn prepare(&self) -> Result<(), ArtifactError> {
    for dir in self.directories() {
      fs::create_dir_all(&dir).map_err(|source| {
        error!("无法创建目录 {}: {}", dir.display(), source);
        ArtifactError::DirectoryNotCreatable {
          path: dir.clone(),
          source,
        }
      })?;

      let probe = dir.join(WRITE_PROBE);
      match fs::write(&probe, b"ok") {
        Ok(()) => {
          let _ = fs::remove_file(&probe);
          debug!("目录可写: {}", dir.display());
        }
        Err(e) => warn!("目录 {} 不可写: {}", dir.display(), e),
      }
    }
    info!("数据目录已就绪: {}", self.root.display());
    Ok(())
  }

  /// 删除所有子目录中超过 `max_age` 的文件，返回删除数量
  pub fn sweep(&self, max_age: Duration) -> usize {
    self
      .directories()
      .iter()
      .map(|dir| sweep_directory(dir, max_age))
      .sum()
  }

  /// 保存上传的视频；返回的句柄被丢弃时删除文件
  pub fn save_upload(&self, original_name: &str, bytes: &[u8]) -> Result<UploadedFile, ArtifactError> {
    let name = format!("{}_{}", timestamp(), sanitize_filename(original_name));
    let path = self.uploads().join(name);
    let mut file = OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(&path)?;
    let upload = UploadedFile { path };
    file.write_all(bytes)?;
    file.sync_all()?;
    debug!("保存上传文件: {}", upload.path.display());
    Ok(upload)
  }
}

fn sweep_directory(dir: &Path, max_age: Duration) -> usize {
  let Ok(entries) = fs::read_dir(dir) else {
    return 0;
  };
  let now = SystemTime::now();
  let mut removed = 0;
  for entry in entries.flatten() {
    let Ok(meta) = entry.metadata() else {
      continue;
    };
    if !meta.is_file() {
      continue;
    }
    let expired = meta
      .modified()
      .ok()
      .and_then(|modified| now.duration_since(modified).ok())
      .is_some_and(|age| age > max_age);
    if expired {
      match fs::remove_file(entry.path()) {
        Ok(()) => {
          debug!("清理过期文件: {}", entry.path().display());
          removed += 1;
        }
        Err(e) => warn!("清理文件 {} 失败: {}", entry.path().display(), e),
      }
    }
  }
  removed
}

/// 临时保存的上传文件
#[derive(Debug)]
pub struct UploadedFile {
  path: PathBuf,
}

impl UploadedFile {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for UploadedFile {
  fn drop(&mut self) {
    match fs::remove_file(&self.path) {
      Ok(()) => debug!("删除上传文件: {}", self.path.display()),
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => warn!("删除上传文件 {} 失败: {}", self.path.display(), e),
    }
  }
}

/// 已发布的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedArtifact {
  pub name: String,
  pub path: PathBuf,
  /// 调用方可访问的 URL 路径
  pub url: String,
}

/// 某一类处理结果的存储目录
#[derive(Debug)]
pub struct ArtifactStore {
  dir: PathBuf,
  url_prefix: String,
  seq: AtomicU64,
}

impl ArtifactStore {
  pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
    Self {
      dir: dir.into(),
      url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
      seq: AtomicU64::new(0),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// 预留一个新的输出名；内容写入隐藏的临时文件
  pub fn reserve(&self, extension: &str) -> Result<PendingArtifact, ArtifactError> {
    let seq = self.seq.fetch_add(1, Ordering::Relaxed);
    let name = format!("processed_{}_{}.{}", timestamp(), seq, extension);
    let temp_path = self.dir.join(format!(".{}{}", name, TEMP_SUFFIX));
    OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(&temp_path)?;
    Ok(PendingArtifact {
      final_path: self.dir.join(&name),
      url: format!("{}/{}", self.url_prefix, name),
      name,
      temp_path,
      committed: false,
    })
  }

  /// 根据外部传入的名字查找已发布的文件
  pub fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError> {
    let valid = !name.is_empty()
      && !name.starts_with('.')
      && !name.contains(['/', '\\'])
      && !name.contains("..")
      && !name.ends_with(TEMP_SUFFIX);
    if !valid {
      return Err(ArtifactError::InvalidName(name.to_string()));
    }
    let path = self.dir.join(name);
    if path.is_file() {
      Ok(path)
    } else {
      Err(ArtifactError::NotFound(name.to_string()))
    }
  }
}

/// 尚未发布的处理结果；未提交就被丢弃时删除临时文件
#[derive(Debug)]
pub struct PendingArtifact {
  name: String,
  temp_path: PathBuf,
  final_path: PathBuf,
  url: String,
  committed: bool,
}

impl PendingArtifact {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// 写入方应写入的临时路径
  pub fn temp_path(&self) -> &Path {
    &self.temp_path
  }

  pub fn write_all(&self, bytes: &[u8]) -> Result<(), ArtifactError> {
    let mut file = OpenOptions::new()
      .write(true)
      .truncate(true)
      .open(&self.temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
  }

  /// 发布为最终文件名，不会覆盖已有文件
  pub fn commit(mut self) -> Result<ProcessedArtifact, ArtifactError> {
    match fs::hard_link(&self.temp_path, &self.final_path) {
      Ok(()) => {
        let _ = fs::remove_file(&self.temp_path);
      }
      Err(e) if e.kind() == ErrorKind::AlreadyExists => {
        return Err(ArtifactError::AlreadyExists(self.name.clone()));
      }
      Err(e) => {
        // 文件系统不支持硬链接
        debug!("硬链接失败，改用重命名: {}", e);
        if self.final_path.exists() {
          return Err(ArtifactError::AlreadyExists(self.name.clone()));
        }
        fs::rename(&self.temp_path, &self.final_path)?;
      }
    }
    self.committed = true;
    info!("处理结果已保存: {}", self.final_path.display());
    Ok(ProcessedArtifact {
      name: std::mem::take(&mut self.name),
      path: self.final_path.clone(),
      url: std::mem::take(&mut self.url),
    })
  }
}

impl Drop for PendingArtifact {
  fn drop(&mut self) {
    if self.committed {
      return;
    }
    match fs::remove_file(&self.temp_path) {
      Ok(()) => debug!("删除未完成的输出: {}", self.temp_path.display()),
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => warn!("删除临时文件 {} 失败: {}", self.temp_path.display(), e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sanitize_strips_paths_and_odd_characters() {
    assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
    assert_eq!(sanitize_filename("C:\\tmp\\my clip (1).mp4"), "my_clip__1_.mp4");
    assert_eq!(sanitize_filename(".hidden.png"), "hidden.png");
    assert_eq!(sanitize_filename("..."), "upload");
  }

  #[test]
  fn extension_is_lowercased() {
    assert_eq!(file_extension("A.JPG").as_deref(), Some("jpg"));
    assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
    assert_eq!(file_extension("noext"), None);
    assert_eq!(file_extension(".png"), None);
  }

  #[test]
  fn pending_artifact_is_hidden_until_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path(), "/api/image/processed/");
    let pending = store.reserve("png").unwrap();
    pending.write_all(b"data").unwrap();
    let name = pending.name().to_string();
    assert!(matches!(store.resolve(&name), Err(ArtifactError::NotFound(_))));

    let artifact = pending.commit().unwrap();
    assert_eq!(artifact.name, name);
    assert_eq!(artifact.url, format!("/api/image/processed/{}", name));
    assert_eq!(fs::read(store.resolve(&name).unwrap()).unwrap(), b"data");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
  }

  #[test]
  fn dropped_pending_artifact_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path(), "/x");
    {
      let pending = store.reserve("mp4").unwrap();
      pending.write_all(b"partial").unwrap();
      assert!(pending.temp_path().exists());
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[test]
  fn reserved_names_are_unique() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path(), "/x");
    let a = store.reserve("jpg").unwrap();
    let b = store.reserve("jpg").unwrap();
    assert_ne!(a.name(), b.name());
  }

  #[test]
  fn resolve_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path(), "/x");
    for name in ["../secret", "a/b.png", "..", ".processed_1.png.part", ""] {
      assert!(matches!(store.resolve(name), Err(ArtifactError::InvalidName(_))), "{name}");
    }
  }

  #[test]
  fn upload_is_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    layout.prepare().unwrap();
    let path = {
      let upload = layout.save_upload("clip.mp4", b"bytes").unwrap();
      assert!(upload.path().exists());
      upload.path().to_path_buf()
    };
    assert!(!path.exists());
  }

  #[test]
  fn sweep_removes_only_stale_files() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    layout.prepare().unwrap();
    fs::write(layout.processed_images().join("fresh.jpg"), b"x").unwrap();
    let stale = layout.processed_videos().join("stale.mp4");
    fs::write(&stale, b"x").unwrap();
    fs::File::options()
      .write(true)
      .open(&stale)
      .unwrap()
      .set_modified(SystemTime::now() - Duration::from_secs(2 * 3600))
      .unwrap();

    assert_eq!(layout.sweep(Duration::from_secs(3600)), 1);
    assert!(!stale.exists());
    assert!(layout.processed_images().join("fresh.jpg").exists());
  }
}
