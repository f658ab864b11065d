// 该文件是 Kuangxuan （框选） 项目的一部分。
// src/model/postprocess.rs - 检测结果解码
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
use tracing::debug;

use crate::{
  frame::Tensor,
  model::{Detection, ModelError},
};

/// 每行前 4 个值为中心点形式的框 [cx, cy, w, h]
const BOX_LEN: usize = 4;

/// 补边后正方形坐标映射回原图宽高的比例，每张图计算一次
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleContext {
  pub x_ratio: f32,
  pub y_ratio: f32,
}

impl ScaleContext {
  /// `ratio = max(width, height) / side`，任一边为 0 时返回 `None`
  pub fn from_dimensions(width: u32, height: u32) -> Option<Self> {
    if width == 0 || height == 0 {
      return None;
    }
    let max_size = width.max(height) as f32;
    Some(Self {
      x_ratio: max_size / width as f32,
      y_ratio: max_size / height as f32,
    })
  }

  pub fn identity() -> Self {
    Self {
      x_ratio: 1.0,
      y_ratio: 1.0,
    }
  }
}

/// 最大值及其下标，并列时取最小下标
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
  let (&first, rest) = scores.split_first()?;
  let mut best = (0, first);
  for (idx, &score) in rest.iter().enumerate() {
    if score > best.1 {
      best = (idx + 1, score);
    }
  }
  Some(best)
}

/// 解码一行 `[cx, cy, w, h, score_0 ..]`，中心点形式转为左上角形式并按比例放大
pub fn decode_row(row: &[f32], scale: ScaleContext) -> Option<Detection> {
  if row.len() <= BOX_LEN {
    return None;
  }
  let (bbox, scores) = row.split_at(BOX_LEN);
  let (label, probability) = argmax(scores)?;

  let x = (bbox[0] - 0.5 * bbox[2]) * scale.x_ratio;
  let y = (bbox[1] - 0.5 * bbox[3]) * scale.y_ratio;
  let w = bbox[2] * scale.x_ratio;
  let h = bbox[3] * scale.y_ratio;

  Some(Detection {
    label: label as u32,
    probability,
    bounding: [x, y, w, h],
  })
}

#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
  target_class: Option<u32>,
}

impl PostProcessor {
  pub fn new(target_class: Option<u32>) -> Self {
    Self { target_class }
  }

  /// 处理 NMS 之后的 `[1, N, 4 + C]` 输出，结果保持输入行序
  pub fn process(
    &self,
    selected: &Tensor,
    scale: ScaleContext,
  ) -> Result<Vec<Detection>, ModelError> {
    let shape = selected.shape();
    let &[batch, rows, width] = shape else {
      return Err(ModelError::InvalidOutput(shape.to_vec(), "期望 3 维输出"));
    };
    if batch != 1 {
      return Err(ModelError::InvalidOutput(shape.to_vec(), "批大小必须为 1"));
    }
    if width <= BOX_LEN {
      return Err(ModelError::InvalidOutput(
        shape.to_vec(),
        "每行至少需要 4 个框坐标和 1 个类别分数",
      ));
    }

    let detections: Vec<Detection> = selected
      .data()
      .chunks_exact(width)
      .filter_map(|row| decode_row(row, scale))
      .filter(|det| self.target_class.is_none_or(|target| det.label == target))
      .collect();

    debug!(
      "解码 {} 行, 类别数 {}, 保留 {} 个 (目标类别 {:?})",
      rows,
      width - BOX_LEN,
      detections.len(),
      self.target_class
    );

    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
  }

  fn selected(rows: &[Vec<f32>]) -> Tensor {
    let width = rows.first().map(Vec::len).unwrap_or(5);
    let data: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::new(&[1, rows.len(), width], data).unwrap()
  }

  #[test]
  fn argmax_prefers_lowest_index_on_ties() {
    assert_eq!(argmax(&[0.2, 0.7, 0.7, 0.1]), Some((1, 0.7)));
    assert_eq!(argmax(&[0.5, 0.5]), Some((0, 0.5)));
    assert_eq!(argmax(&[0.3]), Some((0, 0.3)));
    assert_eq!(argmax(&[]), None);
  }

  #[test]
  fn scale_context_for_tall_image() {
    // 300x600 补边到 600x600
    let scale = ScaleContext::from_dimensions(300, 600).unwrap();
    assert_eq!(scale.x_ratio, 2.0);
    assert_eq!(scale.y_ratio, 1.0);
    assert!(ScaleContext::from_dimensions(0, 600).is_none());
  }

  #[test]
  fn decodes_center_form_and_rescales() {
    let mut row = vec![100.0, 100.0, 50.0, 50.0, 0.1, 0.05];
    row.extend(std::iter::repeat_n(0.0, 15));
    row.push(0.9);
    let scale = ScaleContext {
      x_ratio: 2.0,
      y_ratio: 2.0,
    };

    let det = decode_row(&row, scale).unwrap();
    assert_eq!(det.label, 17);
    assert_eq!(det.probability, 0.9);
    assert_eq!(det.bounding, [150.0, 150.0, 100.0, 100.0]);
  }

  #[test]
  fn corner_form_recovers_center() {
    let scale = ScaleContext {
      x_ratio: 1.75,
      y_ratio: 1.0,
    };
    let row = [321.5, 87.25, 40.5, 12.0, 0.3, 0.6];
    let det = decode_row(&row, scale).unwrap();
    let [x, y, w, h] = det.bounding;

    let cx = x / scale.x_ratio + 0.5 * w / scale.x_ratio;
    let cy = y / scale.y_ratio + 0.5 * h / scale.y_ratio;
    assert!(approx(cx, row[0]));
    assert!(approx(cy, row[1]));
    assert!(approx(w / scale.x_ratio, row[2]));
    assert!(approx(h / scale.y_ratio, row[3]));
  }

  #[test]
  fn row_without_scores_is_skipped() {
    assert!(decode_row(&[1.0, 2.0, 3.0, 4.0], ScaleContext::identity()).is_none());
  }

  #[test]
  fn filters_by_target_class_in_order() {
    let rows = vec![
      vec![10.0, 10.0, 2.0, 2.0, 0.1, 0.8, 0.1],
      vec![20.0, 20.0, 2.0, 2.0, 0.9, 0.0, 0.1],
      vec![30.0, 30.0, 2.0, 2.0, 0.0, 0.4, 0.3],
      vec![40.0, 40.0, 2.0, 2.0, 0.2, 0.2, 0.2],
    ];
    let tensor = selected(&rows);
    let detections = PostProcessor::new(Some(1))
      .process(&tensor, ScaleContext::identity())
      .unwrap();

    assert_eq!(detections.len(), 2);
    assert!(detections.iter().all(|d| d.label == 1));
    assert_eq!(detections[0].bounding[0], 9.0);
    assert_eq!(detections[1].bounding[0], 29.0);

    let all = PostProcessor::new(None)
      .process(&tensor, ScaleContext::identity())
      .unwrap();
    assert_eq!(all.len(), rows.len());
    // 全部并列时归为类别 0
    assert_eq!(all[3].label, 0);
  }

  #[test]
  fn no_matching_class_gives_empty_list() {
    let tensor = selected(&[vec![10.0, 10.0, 2.0, 2.0, 0.9, 0.1]]);
    let detections = PostProcessor::new(Some(17))
      .process(&tensor, ScaleContext::identity())
      .unwrap();
    assert!(detections.is_empty());
  }

  #[test]
  fn zero_rows_is_valid() {
    let tensor = Tensor::zeros(&[1, 0, 84]);
    let detections = PostProcessor::new(Some(17))
      .process(&tensor, ScaleContext::identity())
      .unwrap();
    assert!(detections.is_empty());
  }

  #[test]
  fn identical_inputs_give_identical_outputs() {
    let tensor = selected(&[
      vec![5.0, 6.0, 7.0, 8.0, 0.2, 0.7],
      vec![1.0, 2.0, 3.0, 4.0, 0.6, 0.1],
    ]);
    let before = tensor.clone();
    let processor = PostProcessor::new(None);
    let scale = ScaleContext::from_dimensions(320, 240).unwrap();

    let first = processor.process(&tensor, scale).unwrap();
    let second = processor.process(&tensor, scale).unwrap();
    assert_eq!(first, second);
    assert_eq!(tensor, before);
  }

  #[test]
  fn malformed_shapes_are_errors() {
    let processor = PostProcessor::default();
    let scale = ScaleContext::identity();

    let flat = Tensor::vector(vec![0.0; 6]);
    assert!(matches!(
      processor.process(&flat, scale),
      Err(ModelError::InvalidOutput(..))
    ));

    let batched = Tensor::zeros(&[2, 1, 6]);
    assert!(processor.process(&batched, scale).is_err());

    let narrow = Tensor::zeros(&[1, 3, 4]);
    assert!(processor.process(&narrow, scale).is_err());
  }
}
