// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use chrono::Utc;
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  labels::WithLabel,
  model::{DetectResult, Detection},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: u32 = 80;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
  #[error("记录序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

/// 字体以 `FontArc` 共享，克隆时不会重新解析
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 每个类别一种颜色，色相均匀分布
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      colors,
    }
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h {
    h if h < 60.0 => (c, x, 0.0),
    h if h < 120.0 => (x, c, 0.0),
    h if h < 180.0 => (0.0, c, x),
    h if h < 240.0 => (0.0, x, c),
    h if h < 300.0 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  /// 加载 TTF/OTF 字体后才会绘制类别标签
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    self.font = Some(FontArc::try_from_vec(data)?);
    debug!("加载标签字体: {}", path.as_ref().display());
    Ok(self)
  }

  pub fn color_of(&self, label: u32) -> Rgb<u8> {
    self.colors[label as usize % self.colors.len()]
  }

  /// 将模型输入坐标系下的框按图像尺寸拉伸后绘制
  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    let sx = image.width() as f32 / result.input_size[0] as f32;
    let sy = image.height() as f32 / result.input_size[1] as f32;
    for detection in result.items.iter() {
      self.draw_bbox_with_label(image, detection, sx, sy);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection, sx: f32, sy: f32) {
    let (img_w, img_h) = (image.width() as i32, image.height() as i32);
    let [bx, by, bw, bh] = detection.bounding;

    let x_min = ((bx * sx).floor() as i32).clamp(0, img_w - 1);
    let y_min = ((by * sy).floor() as i32).clamp(0, img_h - 1);
    let x_max = (((bx + bw) * sx).ceil() as i32).clamp(0, img_w - 1);
    let y_max = (((by + bh) * sy).ceil() as i32).clamp(0, img_h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = self.color_of(detection.label);
    for t in 0..BOX_THICKNESS {
      let w = x_max - x_min - 2 * t;
      let h = y_max - y_min - 2 * t;
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(w as u32 + 1, h as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let label = format!(
      "{} {:.1}%",
      detection.label.to_label_str(),
      detection.probability * 100.0
    );
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);
    let box_h = text_h as i32 + 2 * LABEL_TEXT_PADDING;
    let label_y = if y_min - box_h >= 0 { y_min - box_h } else { y_min };
    let label_w = (text_w as i32 + 2 * LABEL_TEXT_PADDING).min(img_w - x_min);
    if label_w <= 0 {
      return;
    }

    let rect = Rect::at(x_min, label_y).of_size(label_w as u32, box_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb([255, 255, 255]),
      x_min + LABEL_TEXT_PADDING,
      label_y + LABEL_TEXT_PADDING,
      scale,
      font,
      &label,
    );
  }
}

#[derive(Serialize)]
struct RecordItem {
  label: u32,
  name: String,
  probability: f32,
  bounding: [f32; 4],
}

#[derive(Serialize)]
struct RecordFile {
  created_at: String,
  input_size: [u32; 2],
  detections: Vec<RecordItem>,
}

/// 以 JSON 形式记录检测结果
pub struct Record;

impl Record {
  pub fn record(&self, result: &DetectResult, path: &Path) -> Result<(), DrawError> {
    let file = RecordFile {
      created_at: Utc::now().to_rfc3339(),
      input_size: result.input_size,
      detections: result
        .items
        .iter()
        .map(|item| RecordItem {
          label: item.label,
          name: item.label.to_label_str(),
          probability: item.probability,
          bounding: item.bounding,
        })
        .collect(),
    };
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_string_pretty(&file)?,
    )?;
    Ok(())
  }
}
