// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/config.rs - 检测与裁剪参数
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_TOPK: u32 = 100;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.2;
const DEFAULT_TARGET_CLASS: u32 = 17;
const DEFAULT_CROP_SIZE: [u32; 2] = [500, 400];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 网络期望的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
  #[default]
  Rgb,
  Bgr,
}

/// 裁剪时如何从检测结果中挑选目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Selection {
  /// 第一个检测结果
  First,
  /// 置信度最高的检测结果，并列时取靠前者
  #[default]
  HighestProbability,
}

impl std::str::FromStr for Selection {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "first" => Ok(Selection::First),
      "highest-probability" | "best" => Ok(Selection::HighestProbability),
      other => Err(ConfigError::Invalid(format!("未知的选择策略: {}", other))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmsConfig {
  /// 每个类别最多保留的框数
  pub topk: u32,
  pub iou_threshold: f32,
  pub score_threshold: f32,
}

impl Default for NmsConfig {
  fn default() -> Self {
    Self {
      topk: DEFAULT_TOPK,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
    }
  }
}

impl NmsConfig {
  /// NMS 网络的 `config` 输入
  pub fn as_tensor_data(&self) -> Vec<f32> {
    vec![self.topk as f32, self.iou_threshold, self.score_threshold]
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// 模型输入尺寸 [宽, 高]
  pub input_size: [u32; 2],
  pub nms: NmsConfig,
  /// 仅保留该类别，`None` 表示保留全部类别
  pub target_class: Option<u32>,
  pub color_order: ColorOrder,
  /// 裁剪输出尺寸 [宽, 高]
  pub crop_size: [u32; 2],
  pub selection: Selection,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      input_size: [DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE],
      nms: NmsConfig::default(),
      target_class: Some(DEFAULT_TARGET_CLASS),
      color_order: ColorOrder::default(),
      crop_size: DEFAULT_CROP_SIZE,
      selection: Selection::default(),
    }
  }
}

impl Config {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("读取配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&text)?;
    config.validate()?;
    debug!("配置: {:?}", config);
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_size.contains(&0) {
      return Err(ConfigError::Invalid(format!(
        "模型输入尺寸不能为 0: {:?}",
        self.input_size
      )));
    }
    if self.crop_size.contains(&0) {
      return Err(ConfigError::Invalid(format!(
        "裁剪尺寸不能为 0: {:?}",
        self.crop_size
      )));
    }
    if !(0.0..=1.0).contains(&self.nms.iou_threshold) {
      return Err(ConfigError::Invalid(format!(
        "IoU 阈值超出范围: {}",
        self.nms.iou_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.nms.score_threshold) {
      return Err(ConfigError::Invalid(format!(
        "置信度阈值超出范围: {}",
        self.nms.score_threshold
      )));
    }
    Ok(())
  }

  /// NCHW 输入形状 `[1, 3, H, W]`
  pub fn input_shape(&self) -> [usize; 4] {
    [
      1,
      crate::frame::RGB_CHANNELS,
      self.input_size[1] as usize,
      self.input_size[0] as usize,
    ]
  }
}
