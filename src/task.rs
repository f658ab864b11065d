// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/task.rs - 检测、裁剪与下载任务
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

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  config::{Config, Selection},
  crop::{CropError, crop_and_resize},
  model::{BoxError, DetectResult, Model, ModelError},
  output::{SaveImage, draw::Draw},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("上一次检测尚未结束")]
  Busy,
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("裁剪错误: {0}")]
  Crop(#[from] CropError),
  #[error("没有可下载的图像")]
  NothingToDownload,
  #[error("输出错误: {0}")]
  Output(#[source] BoxError),
}

#[derive(Default)]
struct TaskState {
  detections: Option<DetectResult>,
  rendered: Option<RgbImage>,
}

/// 运行期间置位，离开作用域时复位
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// 持有模型与最近一次的检测结果、渲染图像；同一时刻只允许一次检测
pub struct DetectTask<M> {
  model: Mutex<M>,
  in_flight: AtomicBool,
  state: Mutex<TaskState>,
  draw: Draw,
  selection: Selection,
  crop_size: [u32; 2],
}

impl<M> DetectTask<M>
where
  M: Model<Input = RgbImage, Output = DetectResult, Error = ModelError>,
{
  pub fn new(model: M, config: &Config) -> Self {
    Self {
      model: Mutex::new(model),
      in_flight: AtomicBool::new(false),
      state: Mutex::new(TaskState::default()),
      draw: Draw::default(),
      selection: config.selection,
      crop_size: config.crop_size,
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn state(&self) -> MutexGuard<'_, TaskState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn begin(&self) -> Result<InFlight<'_>, TaskError> {
    self
      .in_flight
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .map_err(|_| {
        warn!("检测仍在进行，忽略本次请求");
        TaskError::Busy
      })?;
    Ok(InFlight(&self.in_flight))
  }

  pub fn is_running(&self) -> bool {
    self.in_flight.load(Ordering::Acquire)
  }

  /// 运行检测；失败时保留上一次的结果
  pub fn detect(&self, image: &RgbImage) -> Result<DetectResult, TaskError> {
    let _guard = self.begin()?;

    info!("开始检测 {}x{} 图像...", image.width(), image.height());
    let now = Instant::now();
    let result = {
      let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
      model.infer(image)?
    };
    info!(
      "推理完成，耗时: {:.2?}，检测到 {} 个对象",
      now.elapsed(),
      result.len()
    );

    self.state().detections = Some(result.clone());
    Ok(result)
  }

  /// 在图像上绘制最近一次的检测结果
  pub fn render(&self, image: &RgbImage) -> RgbImage {
    let mut canvas = image.clone();
    if let Some(result) = &self.state().detections {
      self.draw.draw_detections_on_image(&mut canvas, result);
    }
    canvas
  }

  /// 裁剪选中的检测框并缩放，结果作为待下载图像保存
  pub fn crop(&self, image: &RgbImage) -> Result<RgbImage, TaskError> {
    let mut state = self.state();
    let result = state.detections.as_ref().ok_or(CropError::NoDetection)?;
    let cropped = crop_and_resize(image, result, self.selection, self.crop_size)?;
    info!("裁剪完成: {}x{}", cropped.width(), cropped.height());
    state.rendered = Some(cropped.clone());
    Ok(cropped)
  }

  pub fn download<O>(&self, output: &O) -> Result<PathBuf, TaskError>
  where
    O: SaveImage,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    let state = self.state();
    let image = state.rendered.as_ref().ok_or(TaskError::NothingToDownload)?;
    let path = output
      .save_image(image)
      .map_err(|e| TaskError::Output(Box::new(e)))?;
    info!("已下载: {}", path.display());
    Ok(path)
  }

  pub fn last_detections(&self) -> Option<DetectResult> {
    self.state().detections.clone()
  }

  pub fn rendered(&self) -> Option<RgbImage> {
    self.state().rendered.clone()
  }

  /// 打开新图像时清空旧结果
  pub fn clear(&self) {
    *self.state() = TaskState::default();
  }
}
