// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/bin/simple.rs - 单张图像检测、裁剪与保存
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use kuangxuan::{
  FromUrl,
  config::{Config, Selection},
  crop::CropError,
  input::InputWrapper,
  model::Yolov8NmsBuilder,
  output::{OutputWrapper, Render, draw::Draw},
  task::{DetectTask, TaskError},
};

/// Kuangxuan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，例如 yolov8:///models/yolov8n.onnx?nms=/models/nms-yolov8.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///data/input.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 检测结果输出，image:///out.png[?record] 或 folder:///dir[?record&always]
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 裁剪结果输出，省略时不裁剪
  #[arg(long, value_name = "OUTPUT")]
  pub crop_output: Option<Url>,
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 仅保留该类别
  #[arg(long, value_name = "CLASS_ID", conflicts_with = "all_classes")]
  pub target_class: Option<u32>,
  /// 保留全部类别
  #[arg(long)]
  pub all_classes: bool,
  /// 裁剪目标选择策略: first 或 highest-probability
  #[arg(long, value_name = "POLICY")]
  pub selection: Option<Selection>,
  /// 标签字体文件（TTF/OTF），省略时只绘制边框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
}

impl Args {
  fn load_config(&self) -> Result<Config> {
    let mut config = match &self.config {
      Some(path) => Config::from_json_file(path)?,
      None => Config::default(),
    };
    if let Some(target) = self.target_class {
      config.target_class = Some(target);
    }
    if self.all_classes {
      config.target_class = None;
    }
    if let Some(selection) = self.selection {
      config.selection = selection;
    }
    config.validate()?;
    Ok(config)
  }

  fn draw(&self) -> Result<Draw> {
    Ok(match &self.font {
      Some(path) => Draw::default().with_font_file(path)?,
      None => Draw::default(),
    })
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.load_config()?;

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("目标类别: {:?}", config.target_class);

  let image = InputWrapper::from_url(&args.input)?
    .next()
    .context("没有输入图像")?;
  let model = Yolov8NmsBuilder::from_url(&args.model)?
    .config(config.clone())
    .build()?;
  let draw = args.draw()?;
  let output = OutputWrapper::from_url(&args.output)?.with_draw(draw.clone());
  let task = DetectTask::new(model, &config).with_draw(draw);

  let result = task.detect(&image)?;
  for det in result.items.iter() {
    info!(
      "  - 类别 {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
      det.label,
      det.probability * 100.0,
      det.bounding[0],
      det.bounding[1],
      det.bounding[2],
      det.bounding[3]
    );
  }
  output.render_result(&image, &result)?;

  if let Some(crop_output) = &args.crop_output {
    let crop_output = OutputWrapper::from_url(crop_output)?;
    match task.crop(&image) {
      Ok(_) => {
        task.download(&crop_output)?;
      }
      Err(TaskError::Crop(CropError::NoDetection)) => warn!("没有检测结果，跳过裁剪"),
      Err(e) => return Err(e.into()),
    }
  }

  Ok(())
}
