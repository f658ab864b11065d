// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/frame.rs - 浮点张量定义
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

use std::collections::HashMap;

use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("数据长度不匹配: 形状 {shape:?} 期望长度 {expected}, 实际长度 {actual}")]
pub struct ShapeMismatch {
  pub shape: Vec<usize>,
  pub expected: usize,
  pub actual: usize,
}

/// 推理运行时之间传递的稠密 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Box<[usize]>,
  data: Box<[f32]>,
}

/// 以名称索引的张量集合，对应推理会话的输入与输出
pub type NamedTensors = HashMap<String, Tensor>;

impl Tensor {
  pub fn new(shape: &[usize], data: Vec<f32>) -> Result<Self, ShapeMismatch> {
    let expected = shape.iter().product::<usize>();
    if data.len() != expected {
      return Err(ShapeMismatch {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape: shape.into(),
      data: data.into_boxed_slice(),
    })
  }

  pub fn zeros(shape: &[usize]) -> Self {
    let size = shape.iter().product::<usize>();
    Self {
      shape: shape.into(),
      data: vec![0.0; size].into_boxed_slice(),
    }
  }

  /// 一维张量，例如 NMS 的配置 `[topk, iou, score]`
  pub fn vector(data: Vec<f32>) -> Self {
    Self {
      shape: Box::new([data.len()]),
      data: data.into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn rank(&self) -> usize {
    self.shape.len()
  }

  pub fn into_data(self) -> Box<[f32]> {
    self.data
  }
}

impl AsRef<[f32]> for Tensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}
