// 该文件是 Jingjie （警戒） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::model::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: u32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 无字体时每字符宽度估计
const LABEL_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const TEXT_COLOR: [u8; 3] = [0, 0, 0];

const EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf"); // default font

#[derive(Error, Debug)]
pub enum AnnotatorError {
  #[error("字体文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 标注器：在帧上绘制检测框和标签
///
/// 相同输入总是得到相同输出。默认使用内嵌字体，没有字体时只绘制标签背景。
#[derive(Clone)]
pub struct Annotator {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: u32,
  label_char_width: f32,
  box_color: [u8; 3],
  text_color: [u8; 3],
}

impl Default for Annotator {
  fn default() -> Self {
    Self {
      font: FontArc::try_from_slice(EMBEDDED_FONT).ok(),
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      box_color: BOX_COLOR,
      text_color: TEXT_COLOR,
    }
  }
}

impl Annotator {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn from_font_file(path: &Path) -> Result<Self, AnnotatorError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    info!("加载标签字体: {}", path.display());
    Ok(Self::default().with_font(font))
  }

  /// 只绘制框和标签背景
  pub fn without_font(mut self) -> Self {
    self.font = None;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 返回标注后的新帧，原帧不变
  pub fn annotate(&self, frame: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut out = frame.clone();
    self.annotate_in_place(&mut out, detections);
    out
  }

  pub fn annotate_in_place(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      self.draw_bbox_with_label(image, detection);
    }
  }

  fn label_width(&self, label: &str) -> u32 {
    match &self.font {
      Some(font) => {
        let (w, _) = text_size(PxScale::from(self.font_size), font, label);
        w + 2 * LABEL_TEXT_PADDING as u32
      }
      None => (label.chars().count() as f32 * self.label_char_width).ceil() as u32,
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let bbox = &detection.bbox;
    let x_min = (bbox.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (bbox.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (bbox.x2.ceil() as i32 - 1).clamp(0, w - 1);
    let y_max = (bbox.y2.ceil() as i32 - 1).clamp(0, h - 1);

    if x_min > x_max || y_min > y_max {
      return;
    }

    // 绘制边框（加粗为2像素，向内收缩）
    let color = Rgb(self.box_color);
    for t in 0..BOX_THICKNESS {
      let rw = x_max - x_min + 1 - 2 * t;
      let rh = y_max - y_min + 1 - 2 * t;
      if rw <= 0 || rh <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(rw as u32, rh as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = format!("{} {:.2}", detection.class_label, detection.confidence);
    let text_width = self.label_width(&label) as i32;
    let text_height = self.label_text_height as i32;

    // 上方放不下时放在框内顶部
    let label_x = x_min;
    let label_y = if y_min >= text_height {
      y_min - text_height
    } else {
      y_min
    };
    let label_y = label_y.min(h - text_height).max(0);

    let label_width = text_width.min(w - label_x);
    let label_height = text_height.min(h - label_y);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(self.text_color),
        label_x + LABEL_TEXT_PADDING,
        label_y + LABEL_TEXT_PADDING,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}
