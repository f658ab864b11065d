// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/input/letterbox.rs - 补边、缩放与归一化
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
  RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

use crate::{
  config::ColorOrder,
  frame::{RGB_CHANNELS, ShapeMismatch, Tensor},
  model::ScaleContext,
};

#[derive(Error, Debug)]
pub enum LetterboxError {
  #[error("图像尺寸为空: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("模型输入尺寸为空: {0}x{1}")]
  EmptyInput(u32, u32),
  #[error("张量构造错误: {0}")]
  Shape(#[from] ShapeMismatch),
}

/// 预处理结果：NCHW 输入张量以及回映射所需的缩放比例
#[derive(Debug, Clone)]
pub struct Letterbox {
  pub tensor: Tensor,
  pub scale: ScaleContext,
  /// 补边后正方形的边长
  pub padded_size: u32,
}

/// 在右侧与下方补黑边成正方形，缩放到模型输入尺寸，归一化到 [0, 1]
pub fn letterbox(
  image: &RgbImage,
  input_width: u32,
  input_height: u32,
  order: ColorOrder,
) -> Result<Letterbox, LetterboxError> {
  let (width, height) = image.dimensions();
  let scale = ScaleContext::from_dimensions(width, height)
    .ok_or(LetterboxError::EmptyImage(width, height))?;
  if input_width == 0 || input_height == 0 {
    return Err(LetterboxError::EmptyInput(input_width, input_height));
  }

  let padded_size = width.max(height);
  let mut padded = RgbImage::new(padded_size, padded_size);
  imageops::replace(&mut padded, image, 0, 0);

  let resized = if padded_size == input_width && padded_size == input_height {
    padded
  } else {
    imageops::resize(&padded, input_width, input_height, FilterType::Triangle)
  };
  debug!(
    "预处理: {}x{} -> 补边 {}x{} -> 输入 {}x{}, 比例 ({:.4}, {:.4})",
    width,
    height,
    padded_size,
    padded_size,
    input_width,
    input_height,
    scale.x_ratio,
    scale.y_ratio
  );

  let plane = (input_width as usize) * (input_height as usize);
  let mut data = vec![0f32; RGB_CHANNELS * plane];
  for (idx, pixel) in resized.pixels().enumerate() {
    let [r, g, b] = pixel.0;
    let (first, last) = match order {
      ColorOrder::Rgb => (r, b),
      ColorOrder::Bgr => (b, r),
    };
    data[idx] = first as f32 / 255.0;
    data[plane + idx] = g as f32 / 255.0;
    data[2 * plane + idx] = last as f32 / 255.0;
  }

  let tensor = Tensor::new(
    &[
      1,
      RGB_CHANNELS,
      input_height as usize,
      input_width as usize,
    ],
    data,
  )?;

  Ok(Letterbox {
    tensor,
    scale,
    padded_size,
  })
}
