// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/crop.rs - 检测框裁剪与缩放
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  config::Selection,
  model::{DetectResult, Detection},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CropError {
  #[error("没有可裁剪的检测结果")]
  NoDetection,
  #[error("裁剪区域不在图像内: {0:?}")]
  EmptyRegion([i64; 4]),
  #[error("输出尺寸为空: {0}x{1}")]
  EmptyTarget(u32, u32),
}

/// 原图上的整数像素区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

pub fn select(items: &[Detection], selection: Selection) -> Option<&Detection> {
  match selection {
    Selection::First => items.first(),
    Selection::HighestProbability => items.iter().fold(None, |best, item| match best {
      Some(b) if b.probability >= item.probability => Some(b),
      _ => Some(item),
    }),
  }
}

/// 将模型输入坐标系下的框换算到原图，截断为整数并裁剪到图像范围内
pub fn source_rect(
  bounding: &[f32; 4],
  input_size: [u32; 2],
  image_size: (u32, u32),
) -> Result<CropRect, CropError> {
  let (width, height) = image_size;
  let sx = width as f32 / input_size[0] as f32;
  let sy = height as f32 / input_size[1] as f32;

  let [bx, by, bw, bh] = *bounding;
  let raw = [
    (bx * sx) as i64,
    (by * sy) as i64,
    (bw * sx) as i64,
    (bh * sy) as i64,
  ];

  let x1 = raw[0].clamp(0, width as i64);
  let y1 = raw[1].clamp(0, height as i64);
  let x2 = raw[0].saturating_add(raw[2]).clamp(0, width as i64);
  let y2 = raw[1].saturating_add(raw[3]).clamp(0, height as i64);
  if x2 <= x1 || y2 <= y1 {
    return Err(CropError::EmptyRegion(raw));
  }
  if x1 != raw[0] || y1 != raw[1] || x2 - x1 != raw[2] || y2 - y1 != raw[3] {
    warn!("裁剪区域 {:?} 超出图像 {}x{}, 已截断", raw, width, height);
  }

  Ok(CropRect {
    x: x1 as u32,
    y: y1 as u32,
    width: (x2 - x1) as u32,
    height: (y2 - y1) as u32,
  })
}

/// 每个目标像素覆盖的源像素及其权重，权重之和为 1
///
/// 边缘像素按覆盖比例计权，与 OpenCV `INTER_AREA` 的缩小权重一致；
/// `imageops::thumbnail` 不保证这一点，因此这里不使用它
fn area_weights(src: u32, dst: u32) -> Vec<Vec<(u32, f32)>> {
  let scale = src as f64 / dst as f64;
  (0..dst)
    .map(|d| {
      let start = d as f64 * scale;
      let end = start + scale;
      let mut weights = Vec::new();
      let mut s = start.floor() as u32;
      while (s as f64) < end && s < src {
        let lo = start.max(s as f64);
        let hi = end.min(s as f64 + 1.0);
        if hi > lo {
          weights.push((s, ((hi - lo) / scale) as f32));
        }
        s += 1;
      }
      weights
    })
    .collect()
}

/// 面积插值缩放：缩小时按像素覆盖面积加权平均，放大时退化为双线性
pub fn resize_area(image: &RgbImage, width: u32, height: u32) -> RgbImage {
  let (src_w, src_h) = image.dimensions();
  if (src_w, src_h) == (width, height) {
    return image.clone();
  }
  if width > src_w || height > src_h {
    return imageops::resize(image, width, height, FilterType::Triangle);
  }

  let xs = area_weights(src_w, width);
  let ys = area_weights(src_h, height);

  let mut out = RgbImage::new(width, height);
  for (dy, row_weights) in ys.iter().enumerate() {
    for (dx, col_weights) in xs.iter().enumerate() {
      let mut acc = [0f32; 3];
      for &(sy, wy) in row_weights {
        for &(sx, wx) in col_weights {
          let pixel = image.get_pixel(sx, sy);
          let w = wy * wx;
          for c in 0..3 {
            acc[c] += pixel[c] as f32 * w;
          }
        }
      }
      let value = acc.map(|v| v.round().clamp(0.0, 255.0) as u8);
      out.put_pixel(dx as u32, dy as u32, Rgb(value));
    }
  }
  out
}

/// 裁剪选中的检测框并缩放到固定尺寸
pub fn crop_and_resize(
  image: &RgbImage,
  result: &DetectResult,
  selection: Selection,
  output_size: [u32; 2],
) -> Result<RgbImage, CropError> {
  let [out_w, out_h] = output_size;
  if out_w == 0 || out_h == 0 {
    return Err(CropError::EmptyTarget(out_w, out_h));
  }

  let detection = select(&result.items, selection).ok_or(CropError::NoDetection)?;
  let rect = source_rect(&detection.bounding, result.input_size, image.dimensions())?;
  debug!(
    "裁剪类别 {} ({:.2}) 区域 {:?} -> {}x{}",
    detection.label, detection.probability, rect, out_w, out_h
  );

  let cropped = imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
  Ok(resize_area(&cropped, out_w, out_h))
}
