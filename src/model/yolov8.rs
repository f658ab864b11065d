// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测网络 + NMS 网络
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::Config,
  frame::{NamedTensors, Tensor},
  input::{Letterbox, letterbox},
  model::{DetectResult, Model, ModelError, PostProcessor, Session},
};

const NET_INPUT: &str = "images";
const NET_OUTPUT: &str = "output0";
const NMS_INPUT_DETECTION: &str = "detection";
const NMS_INPUT_CONFIG: &str = "config";
const NMS_OUTPUT: &str = "selected";

const NET_STAGE: &str = "检测网络";
const NMS_STAGE: &str = "NMS 网络";

/// 先运行检测网络，再将其输出交给 NMS 网络筛选，两次推理严格串行
pub struct Yolov8Nms<S> {
  net: S,
  nms: S,
  config: Config,
  post: PostProcessor,
}

impl<S: Session> Yolov8Nms<S> {
  pub fn new(net: S, nms: S, config: Config) -> Self {
    let post = PostProcessor::new(config.target_class);
    Self {
      net,
      nms,
      config,
      post,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  fn run_stage(
    session: &mut S,
    stage: &'static str,
    inputs: NamedTensors,
    output: &'static str,
  ) -> Result<Tensor, ModelError> {
    let mut outputs = session.run(inputs).map_err(|e| {
      error!("{} 推理失败: {}", stage, e);
      ModelError::inference(stage, e)
    })?;
    let tensor = outputs.remove(output).ok_or_else(|| {
      error!("{} 缺少输出 '{}'", stage, output);
      ModelError::MissingOutput {
        stage,
        name: output,
      }
    })?;
    debug!("{} 输出 '{}' 形状: {:?}", stage, output, tensor.shape());
    Ok(tensor)
  }
}

impl<S: Session> Model for Yolov8Nms<S> {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let [width, height] = self.config.input_size;
    let Letterbox { tensor, scale, .. } = letterbox(input, width, height, self.config.color_order)?;

    debug!("执行检测网络推理");
    let detection = Self::run_stage(
      &mut self.net,
      NET_STAGE,
      NamedTensors::from([(NET_INPUT.to_string(), tensor)]),
      NET_OUTPUT,
    )?;

    debug!("执行 NMS 网络推理");
    let nms_config = Tensor::vector(self.config.nms.as_tensor_data());
    let selected = Self::run_stage(
      &mut self.nms,
      NMS_STAGE,
      NamedTensors::from([
        (NMS_INPUT_DETECTION.to_string(), detection),
        (NMS_INPUT_CONFIG.to_string(), nms_config),
      ]),
      NMS_OUTPUT,
    )?;

    let items = self.post.process(&selected, scale)?;
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
      input_size: self.config.input_size,
    })
  }
}

/// 模型地址形如 `yolov8:///models/yolov8n.onnx?nms=/models/nms-yolov8.onnx`
pub struct Yolov8NmsBuilder {
  net_path: PathBuf,
  nms_path: PathBuf,
  config: Config,
}

impl FromUrlWithScheme for Yolov8NmsBuilder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8NmsBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPath(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let nms_path = url
      .query_pairs()
      .find(|(k, _)| k == "nms")
      .map(|(_, v)| PathBuf::from(v.into_owned()))
      .ok_or_else(|| ModelError::ModelPath("缺少 nms 参数".to_string()))?;

    Ok(Self::new(crate::url_path(url), nms_path))
  }
}

impl Yolov8NmsBuilder {
  pub fn new(net_path: impl Into<PathBuf>, nms_path: impl Into<PathBuf>) -> Self {
    Self {
      net_path: net_path.into(),
      nms_path: nms_path.into(),
      config: Config::default(),
    }
  }

  pub fn config(mut self, config: Config) -> Self {
    self.config = config;
    self
  }

  pub fn net_path(&self) -> &Path {
    &self.net_path
  }

  pub fn nms_path(&self) -> &Path {
    &self.nms_path
  }

  /// 使用给定的加载函数创建两个推理会话，任一失败即返回 `ModelLoad`
  pub fn build_with<S, E, F>(self, mut load: F) -> Result<Yolov8Nms<S>, ModelError>
  where
    S: Session,
    E: std::fmt::Display,
    F: FnMut(&Path) -> Result<S, E>,
  {
    let mut open = |path: &Path| {
      if !path.exists() {
        error!("模型文件不存在: {}", path.display());
        return Err(ModelError::ModelLoad(format!(
          "模型文件不存在: {}",
          path.display()
        )));
      }
      info!("加载模型文件: {}", path.display());
      load(path).map_err(|e| {
        error!("加载模型 {} 失败: {}", path.display(), e);
        ModelError::ModelLoad(format!("{}: {}", path.display(), e))
      })
    };

    let net = open(&self.net_path)?;
    let nms = open(&self.nms_path)?;
    info!("模型加载完成");

    Ok(Yolov8Nms::new(net, nms, self.config))
  }

  #[cfg(feature = "onnx")]
  pub fn build(self) -> Result<Yolov8Nms<super::OnnxSession>, ModelError> {
    self.build_with(super::OnnxSession::from_file)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_reads_both_paths_from_url() {
    let url = Url::parse("yolov8:///models/yolov8n.onnx?nms=/models/nms-yolov8.onnx").unwrap();
    let builder = Yolov8NmsBuilder::from_url(&url).unwrap();
    assert_eq!(builder.net_path(), Path::new("/models/yolov8n.onnx"));
    assert_eq!(builder.nms_path(), Path::new("/models/nms-yolov8.onnx"));
  }

  #[test]
  fn builder_requires_nms_parameter() {
    let url = Url::parse("yolov8:///models/yolov8n.onnx").unwrap();
    assert!(matches!(
      Yolov8NmsBuilder::from_url(&url),
      Err(ModelError::ModelPath(_))
    ));

    let url = Url::parse("rknn:///models/yolov8n.rknn?nms=/x").unwrap();
    assert!(Yolov8NmsBuilder::from_url(&url).is_err());
  }
}
