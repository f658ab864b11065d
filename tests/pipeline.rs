// 该文件是 Kuangxuan （框选） 项目的一部分。
// tests/pipeline.rs - 检测流程集成测试
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

use std::sync::{Arc, Mutex, mpsc};

use image::{Rgb, RgbImage};
use kuangxuan::{
  config::{Config, Selection},
  crop::CropError,
  frame::{NamedTensors, Tensor},
  model::{DetectResult, Model, ModelError, Session, Yolov8Nms, Yolov8NmsBuilder},
  output::SaveImageFileOutput,
  task::{DetectTask, TaskError},
};

#[derive(Debug, thiserror::Error)]
#[error("会话失败")]
struct FakeError;

/// 记录收到的输入，返回预设的单个输出
#[derive(Clone)]
struct FakeSession {
  output_name: &'static str,
  output: Option<Tensor>,
  seen: Arc<Mutex<Vec<NamedTensors>>>,
}

impl FakeSession {
  fn returning(output_name: &'static str, output: Tensor) -> Self {
    Self {
      output_name,
      output: Some(output),
      seen: Arc::default(),
    }
  }

  fn failing() -> Self {
    Self {
      output_name: "",
      output: None,
      seen: Arc::default(),
    }
  }
}

impl Session for FakeSession {
  type Error = FakeError;

  fn run(&mut self, inputs: NamedTensors) -> Result<NamedTensors, Self::Error> {
    self.seen.lock().unwrap().push(inputs);
    let output = self.output.clone().ok_or(FakeError)?;
    Ok(NamedTensors::from([(self.output_name.to_string(), output)]))
  }
}

fn row(cx: f32, cy: f32, w: f32, h: f32, label: usize, score: f32) -> Vec<f32> {
  let mut row = vec![cx, cy, w, h];
  let mut scores = vec![0.01; 80];
  scores[label] = score;
  row.extend(scores);
  row
}

fn selected(rows: &[Vec<f32>]) -> Tensor {
  let data: Vec<f32> = rows.iter().flatten().copied().collect();
  Tensor::new(&[1, rows.len(), 84], data).unwrap()
}

fn pipeline(rows: &[Vec<f32>], config: Config) -> (Yolov8Nms<FakeSession>, FakeSession, FakeSession) {
  let net = FakeSession::returning("output0", Tensor::zeros(&[1, 84, 10]));
  let nms = FakeSession::returning("selected", selected(rows));
  let model = Yolov8Nms::new(net.clone(), nms.clone(), config);
  (model, net, nms)
}

#[test]
fn detection_then_nms_then_decode() {
  let rows = [row(100.0, 100.0, 50.0, 50.0, 17, 0.9), row(10.0, 10.0, 4.0, 4.0, 0, 0.8)];
  let (mut model, net, nms) = pipeline(&rows, Config::default());

  // 300x600 补边到 600x600：x 比例 2，y 比例 1
  let image = RgbImage::from_pixel(300, 600, Rgb([90, 90, 90]));
  let result = model.infer(&image).unwrap();

  assert_eq!(result.input_size, [640, 640]);
  assert_eq!(result.items.len(), 1);
  let det = &result.items[0];
  assert_eq!(det.label, 17);
  assert_eq!(det.probability, 0.9);
  assert_eq!(det.bounding, [150.0, 75.0, 100.0, 50.0]);

  let net_inputs = net.seen.lock().unwrap();
  assert_eq!(net_inputs.len(), 1);
  assert_eq!(net_inputs[0]["images"].shape(), &[1, 3, 640, 640]);

  let nms_inputs = nms.seen.lock().unwrap();
  assert_eq!(nms_inputs.len(), 1);
  assert_eq!(nms_inputs[0]["config"].data(), &[100.0, 0.45, 0.2]);
  assert_eq!(nms_inputs[0]["detection"].shape(), &[1, 84, 10]);
}

#[test]
fn all_classes_when_filter_disabled() {
  let rows = [row(100.0, 100.0, 50.0, 50.0, 17, 0.9), row(10.0, 10.0, 4.0, 4.0, 0, 0.8)];
  let config = Config {
    target_class: None,
    ..Config::default()
  };
  let (mut model, _, _) = pipeline(&rows, config);

  let result = model.infer(&RgbImage::new(640, 640)).unwrap();
  let labels: Vec<u32> = result.items.iter().map(|d| d.label).collect();
  assert_eq!(labels, vec![17, 0]);
}

#[test]
fn no_target_class_gives_empty_result() {
  let rows = [row(10.0, 10.0, 4.0, 4.0, 3, 0.8)];
  let (mut model, _, _) = pipeline(&rows, Config::default());
  let result = model.infer(&RgbImage::new(32, 32)).unwrap();
  assert!(result.is_empty());
}

#[test]
fn failed_run_aborts_without_nms() {
  let nms = FakeSession::returning("selected", selected(&[]));
  let mut model = Yolov8Nms::new(FakeSession::failing(), nms.clone(), Config::default());

  let err = model.infer(&RgbImage::new(32, 32)).unwrap_err();
  assert!(matches!(err, ModelError::Inference { .. }));
  assert!(nms.seen.lock().unwrap().is_empty());
}

#[test]
fn missing_output_is_reported() {
  let net = FakeSession::returning("wrong_name", Tensor::zeros(&[1, 84, 10]));
  let nms = FakeSession::returning("selected", selected(&[]));
  let mut model = Yolov8Nms::new(net, nms, Config::default());

  let err = model.infer(&RgbImage::new(32, 32)).unwrap_err();
  assert!(matches!(
    err,
    ModelError::MissingOutput {
      name: "output0",
      ..
    }
  ));
}

#[test]
fn builder_reports_missing_model_files() {
  let dir = tempfile::tempdir().unwrap();
  let builder = Yolov8NmsBuilder::new(dir.path().join("net.onnx"), dir.path().join("nms.onnx"));
  let result = builder.build_with(|_| Ok::<_, FakeError>(FakeSession::failing()));
  assert!(matches!(result, Err(ModelError::ModelLoad(_))));

  std::fs::write(dir.path().join("net.onnx"), b"net").unwrap();
  std::fs::write(dir.path().join("nms.onnx"), b"nms").unwrap();
  let builder = Yolov8NmsBuilder::new(dir.path().join("net.onnx"), dir.path().join("nms.onnx"));
  assert!(
    builder
      .build_with(|_| Err::<FakeSession, _>(FakeError))
      .is_err()
  );
  let builder = Yolov8NmsBuilder::new(dir.path().join("net.onnx"), dir.path().join("nms.onnx"));
  assert!(
    builder
      .build_with(|_| Ok::<_, FakeError>(FakeSession::failing()))
      .is_ok()
  );
}

#[test]
fn task_detect_crop_download() {
  let rows = [
    row(320.0, 320.0, 160.0, 160.0, 17, 0.6),
    row(100.0, 100.0, 40.0, 40.0, 17, 0.95),
  ];
  let (model, _, _) = pipeline(&rows, Config::default());
  let task = DetectTask::new(model, &Config::default());
  let image = RgbImage::from_pixel(640, 640, Rgb([5, 6, 7]));

  // 检测前无法裁剪或下载
  assert!(matches!(
    task.crop(&image),
    Err(TaskError::Crop(CropError::NoDetection))
  ));
  let dir = tempfile::tempdir().unwrap();
  let output = SaveImageFileOutput::new(dir.path().join("image.png"));
  assert!(matches!(
    task.download(&output),
    Err(TaskError::NothingToDownload)
  ));

  let result = task.detect(&image).unwrap();
  assert_eq!(result.len(), 2);
  assert_eq!(task.last_detections(), Some(result));

  let rendered = task.render(&image);
  assert_ne!(rendered, image);

  let cropped = task.crop(&image).unwrap();
  assert_eq!(cropped.dimensions(), (500, 400));
  assert_eq!(cropped.get_pixel(250, 200).0, [5, 6, 7]);

  let path = task.download(&output).unwrap();
  let saved = image::open(path).unwrap().to_rgb8();
  assert_eq!(saved.dimensions(), (500, 400));

  task.clear();
  assert!(task.last_detections().is_none());
  assert!(task.rendered().is_none());
}

#[test]
fn task_first_selection_uses_first_row() {
  let rows = [
    row(320.0, 320.0, 160.0, 160.0, 17, 0.6),
    row(100.0, 100.0, 40.0, 40.0, 17, 0.95),
  ];
  let config = Config {
    selection: Selection::First,
    crop_size: [16, 16],
    ..Config::default()
  };
  let (model, _, _) = pipeline(&rows, config.clone());
  let task = DetectTask::new(model, &config);

  // 左上 320x320 为黑色，其余为白色；第一个框中心位于 (320, 320)
  let image = RgbImage::from_fn(640, 640, |x, y| {
    if x < 320 && y < 320 {
      Rgb([0, 0, 0])
    } else {
      Rgb([255, 255, 255])
    }
  });
  task.detect(&image).unwrap();
  let cropped = task.crop(&image).unwrap();
  assert_eq!(cropped.get_pixel(0, 0).0, [0, 0, 0]);
  assert_eq!(cropped.get_pixel(15, 15).0, [255, 255, 255]);
}

#[test]
fn failed_detect_keeps_previous_result() {
  struct Flaky {
    calls: usize,
  }

  impl Model for Flaky {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&mut self, _: &RgbImage) -> Result<DetectResult, ModelError> {
      self.calls += 1;
      if self.calls > 1 {
        return Err(ModelError::inference("检测网络", FakeError));
      }
      let mut result = DetectResult::empty([640, 640]);
      result.items = vec![kuangxuan::model::Detection {
        label: 17,
        probability: 0.5,
        bounding: [0.0, 0.0, 10.0, 10.0],
      }]
      .into_boxed_slice();
      Ok(result)
    }
  }

  let task = DetectTask::new(Flaky { calls: 0 }, &Config::default());
  let image = RgbImage::new(64, 64);
  let first = task.detect(&image).unwrap();
  assert!(matches!(task.detect(&image), Err(TaskError::Model(_))));
  assert_eq!(task.last_detections(), Some(first));
  assert!(!task.is_running());
}

#[test]
fn overlapping_detect_is_rejected() {
  struct Blocking {
    started: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
  }

  impl Model for Blocking {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = ModelError;

    fn infer(&mut self, _: &RgbImage) -> Result<DetectResult, ModelError> {
      self.started.send(()).unwrap();
      self.release.recv().unwrap();
      Ok(DetectResult::empty([640, 640]))
    }
  }

  let (started_tx, started_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel();
  let task = DetectTask::new(
    Blocking {
      started: started_tx,
      release: release_rx,
    },
    &Config::default(),
  );
  let image = RgbImage::new(8, 8);

  std::thread::scope(|s| {
    let running = s.spawn(|| task.detect(&image));
    started_rx.recv().unwrap();

    assert!(task.is_running());
    assert!(matches!(task.detect(&image), Err(TaskError::Busy)));

    release_tx.send(()).unwrap();
    assert!(running.join().unwrap().is_ok());
  });

  assert!(!task.is_running());
}
