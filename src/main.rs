// 该文件是 Jingjie （警戒） 项目的一部分。
// src/main.rs - 服务主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use jingjie::{
  enrichment::build_enricher,
  input::default_video_opener,
  model::{Detector, UnloadedDetector, load_detector, read_labels},
  output::{Annotator, default_encoders},
  server::{AppState, ServiceComponents, serve},
};

fn init_tracing(verbose: bool) {
  let default = if verbose { "info,jingjie=debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_model(args: &args::Args) -> Result<Arc<dyn Detector>> {
  let Some(url) = args.model_url()? else {
    warn!("未指定模型，检测接口将返回 503");
    return Ok(Arc::new(UnloadedDetector));
  };

  let labels = match &args.labels {
    Some(path) => read_labels(path).with_context(|| format!("无法读取标签文件 {:?}", path))?,
    None => Vec::new(),
  };

  info!("正在加载模型 {}", url);
  match load_detector(&url, labels, args.nms_threshold) {
    Ok(detector) => {
      info!("模型加载完成");
      Ok(detector)
    }
    Err(e) => {
      // 模型加载失败时服务照常启动，健康检查报告 model_loaded=false
      error!("模型加载失败: {}", e);
      Ok(Arc::new(UnloadedDetector))
    }
  }
}

fn load_annotator(args: &args::Args) -> Result<Annotator> {
  let annotator = match &args.font {
    Some(path) => {
      Annotator::from_font_file(path).with_context(|| format!("无法加载字体 {:?}", path))?
    }
    None => Annotator::default(),
  };
  if !annotator.has_font() {
    warn!("内嵌字体无法加载，标注中不绘制文字");
  }
  Ok(annotator)
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = args::Args::parse();
  init_tracing(args.verbose);

  info!("Jingjie 武器检测服务");
  let config = args.service_config();
  config.validate().context("参数无效")?;
  info!("数据目录: {}", config.data_dir.display());
  info!(
    "置信度阈值: {}, 抽帧间隔: {}",
    config.detection.confidence_threshold, config.detection.stride
  );

  let components = ServiceComponents {
    detector: load_model(&args)?,
    annotator: load_annotator(&args)?,
    enricher: build_enricher(&config.enrichment).context("无法创建武器信息客户端")?,
    video_opener: default_video_opener(),
    encoders: default_encoders(),
  };

  let state = AppState::new(config, components).context("无法准备数据目录")?;
  serve(Arc::new(state), args.listen_addr()).await?;

  info!("服务已退出");
  Ok(())
}
