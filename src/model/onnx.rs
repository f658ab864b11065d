// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理会话
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
use std::time::Instant;

use ort::{
  session::builder::GraphOptimizationLevel,
  value::{DynValue, Tensor as OrtTensor},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::{NamedTensors, ShapeMismatch, Tensor},
  model::Session,
};

#[derive(Error, Debug)]
pub enum OnnxSessionError {
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("会话创建失败: {0}")]
  Build(String),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ShapeMismatch),
  #[error("输出 '{0}' 含有无效维度 {1:?}")]
  InvalidDims(String, Vec<i64>),
}

pub struct OnnxSession {
  session: ort::session::Session,
}

impl OnnxSession {
  pub fn from_file(path: &Path) -> Result<Self, OnnxSessionError> {
    info!("创建 ONNX Runtime 会话: {}", path.display());
    let session = ort::session::Session::builder()
      .map_err(|e| OnnxSessionError::Build(e.to_string()))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| OnnxSessionError::Build(e.to_string()))?
      .commit_from_file(path)
      .map_err(|e| OnnxSessionError::Build(e.to_string()))?;

    for input in session.inputs.iter() {
      debug!("模型输入: {}", input.name);
    }
    for output in session.outputs.iter() {
      debug!("模型输出: {}", output.name);
    }

    Ok(Self { session })
  }
}

impl Session for OnnxSession {
  type Error = OnnxSessionError;

  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, Self::Error> {
    let mut values: Vec<(String, DynValue)> = Vec::with_capacity(inputs.len());
    for (name, tensor) in inputs {
      let shape = tensor.shape().to_vec();
      let value = OrtTensor::from_array((shape.as_slice(), tensor.into_data()))?;
      values.push((name, value.into_dyn()));
    }

    let now = Instant::now();
    let outputs = self.session.run(values)?;
    debug!("会话推理耗时: {:.2?}", now.elapsed());

    let mut result = NamedTensors::new();
    for (name, value) in outputs.iter() {
      let (shape, data) = value.try_extract_tensor::<f32>()?;
      let dims = shape
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<Result<Vec<usize>, _>>()
        .map_err(|_| OnnxSessionError::InvalidDims(name.to_string(), shape.to_vec()))?;
      result.insert(name.to_string(), Tensor::new(&dims, data.to_vec())?);
    }

    Ok(result)
  }
}
