// 该文件是 Jingjie （警戒） 项目的一部分。
// src/args.rs - 服务参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  net::{IpAddr, SocketAddr},
  path::PathBuf,
  time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use jingjie::{
  config::{
    DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL, DetectionConfig, EnrichmentConfig,
    ServiceConfig,
  },
  model::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD},
};

/// Jingjie 武器检测服务参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, env = "JINGJIE_HOST", default_value = "0.0.0.0")]
  pub host: IpAddr,

  /// 监听端口
  #[arg(long, env = "JINGJIE_PORT", default_value = "5000")]
  pub port: u16,

  /// 数据根目录，其下存放 uploads/、processed_images/、processed_videos/
  #[arg(long, env = "JINGJIE_DATA_DIR", default_value = ".", value_name = "DIR")]
  pub data_dir: PathBuf,

  /// 检测模型，URL 或文件路径
  /// 例如: onnx:///models/best.onnx?size=640 或 models/best.onnx
  /// 未指定时服务仍可启动，但检测接口返回 503
  #[arg(long, env = "JINGJIE_MODEL", value_name = "MODEL")]
  pub model: Option<String>,

  /// 标签文件，每行一个类别名
  #[arg(long, env = "JINGJIE_LABELS", value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标注所用字体文件；未指定时尝试系统字体
  #[arg(long, env = "JINGJIE_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_NMS_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 视频每隔多少帧做一次检测
  #[arg(long, default_value = "30", value_name = "FRAMES")]
  pub stride: u64,

  /// 上传与处理结果保留时长（小时）
  #[arg(long, default_value = "24", value_name = "HOURS")]
  pub retention_hours: u64,

  /// 上传大小上限（MiB）
  #[arg(long, default_value = "16", value_name = "MIB")]
  pub max_upload_mb: usize,

  /// Gemini API 密钥；未设置时使用内置武器资料
  #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
  pub gemini_api_key: Option<String>,

  /// Gemini 模型名
  #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
  pub gemini_model: String,

  /// Gemini 接口根地址
  #[arg(long, env = "GEMINI_ENDPOINT", default_value = DEFAULT_GEMINI_ENDPOINT)]
  pub gemini_endpoint: String,

  /// 限流窗口内最多的请求数
  #[arg(long, default_value = "3", value_name = "CALLS")]
  pub rate_limit: usize,

  /// 限流窗口（秒）
  #[arg(long, default_value = "60", value_name = "SECS")]
  pub rate_window_secs: u64,

  /// 输出调试日志
  #[arg(short, long)]
  pub verbose: bool,
}

impl Args {
  pub fn listen_addr(&self) -> SocketAddr {
    SocketAddr::new(self.host, self.port)
  }

  /// 模型参数转换为 URL；普通路径按扩展名推断方案
  pub fn model_url(&self) -> Result<Option<Url>> {
    let Some(model) = self.model.as_deref() else {
      return Ok(None);
    };
    if let Ok(url) = Url::parse(model) {
      if url.scheme().len() > 1 {
        return Ok(Some(url));
      }
    }

    let path = std::path::Path::new(model);
    let path = path
      .canonicalize()
      .with_context(|| format!("模型文件不存在: {}", model))?;
    let scheme = path
      .extension()
      .and_then(|e| e.to_str())
      .map(str::to_ascii_lowercase)
      .with_context(|| format!("无法从文件名推断模型类型: {}", model))?;
    let url = Url::parse(&format!("{}://{}", scheme, path.display()))
      .with_context(|| format!("模型路径无效: {}", model))?;
    Ok(Some(url))
  }

  pub fn service_config(&self) -> ServiceConfig {
    ServiceConfig {
      data_dir: self.data_dir.clone(),
      detection: DetectionConfig::default()
        .with_confidence_threshold(self.confidence)
        .with_stride(self.stride),
      enrichment: EnrichmentConfig {
        api_key: self.gemini_api_key.clone(),
        model: self.gemini_model.clone(),
        endpoint: self.gemini_endpoint.clone(),
        rate_limit: self.rate_limit,
        rate_window: Duration::from_secs(self.rate_window_secs),
        ..EnrichmentConfig::default()
      },
      max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
      retention: Duration::from_secs(self.retention_hours.saturating_mul(3600)),
    }
  }
}
