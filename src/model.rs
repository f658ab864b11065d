// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;
use thiserror::Error;

use crate::{frame::NamedTensors, input::LetterboxError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 推理运行时边界：按名称输入张量，按名称返回输出张量
pub trait Session {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, Self::Error>;
}

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoad(String),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
  #[error("{stage} 推理失败: {source}")]
  Inference {
    stage: &'static str,
    #[source]
    source: BoxError,
  },
  #[error("{stage} 缺少输出张量 '{name}'")]
  MissingOutput {
    stage: &'static str,
    name: &'static str,
  },
  #[error("输出形状无效: {0:?}, {1}")]
  InvalidOutput(Vec<usize>, &'static str),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] LetterboxError),
}

impl ModelError {
  pub fn inference<E>(stage: &'static str, err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    ModelError::Inference {
      stage,
      source: Box::new(err),
    }
  }
}

/// 单个检测结果，`bounding` 为 [x, y, w, h]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: u32,
  pub probability: f32,
  pub bounding: [f32; 4],
}

/// 一次检测的全部结果，坐标参照模型输入尺寸
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
  /// 模型输入尺寸 [宽, 高]
  pub input_size: [u32; 2],
}

impl DetectResult {
  pub fn empty(input_size: [u32; 2]) -> Self {
    Self {
      items: Box::new([]),
      input_size,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

mod postprocess;
pub use self::postprocess::{PostProcessor, ScaleContext, argmax, decode_row};

mod yolov8;
pub use self::yolov8::{Yolov8Nms, Yolov8NmsBuilder};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxSession, OnnxSessionError};
