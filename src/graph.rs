// 该文件是 Wuzhi （物识） 项目的一部分。
// src/graph.rs - 推理图
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::debug;

use crate::{frame::RgbNhwcFrame, lock::LockError};

mod cache;
mod mask;
mod onnx;

pub use self::cache::{GraphCache, load_graph_lock_name};
pub use self::mask::{Mask, reframe_box_masks_to_image_masks};
pub use self::onnx::{OnnxGraph, OnnxGraphBuilder};

pub const NUM_DETECTIONS: &str = "num_detections";
pub const DETECTION_BOXES: &str = "detection_boxes";
pub const DETECTION_SCORES: &str = "detection_scores";
pub const DETECTION_CLASSES: &str = "detection_classes";
pub const DETECTION_MASKS: &str = "detection_masks";
pub const IMAGE_TENSOR: &str = "image_tensor";

const MASK_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum GraphError {
  #[error("无法读取模型文件 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("推理运行时错误: {0}")]
  Runtime(String),
  #[error("模型缺少输入张量: {0}")]
  MissingInput(String),
  #[error("模型缺少输出张量: {0}")]
  MissingOutput(String),
  #[error("输出张量 {name} 无效: {message}")]
  InvalidOutput { name: &'static str, message: String },
  #[error("协调锁错误: {0}")]
  Lock(#[from] LockError),
}

impl GraphError {
  pub fn runtime<E: std::fmt::Display>(err: E) -> Self {
    GraphError::Runtime(err.to_string())
  }

  fn invalid(name: &'static str, message: impl Into<String>) -> Self {
    GraphError::InvalidOutput {
      name,
      message: message.into(),
    }
  }
}

/// 已加载、可重复执行的检测图
pub trait InferenceGraph: Send + Sync {
  fn run(&self, frame: &RgbNhwcFrame) -> Result<RawDetections, GraphError>;
}

/// 运行时返回的一个 f32 输出张量
#[derive(Debug, Clone, Default)]
pub struct OutputTensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl OutputTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self { shape, data }
  }
}

/// 批大小为 1 的检测图原始输出
#[derive(Debug, Clone, Default)]
pub struct GraphOutputs {
  pub num_detections: OutputTensor,
  pub detection_boxes: OutputTensor,
  pub detection_scores: OutputTensor,
  pub detection_classes: OutputTensor,
  pub detection_masks: Option<OutputTensor>,
}

/// 单张图像的检测结果，已去掉批维度
///
/// `boxes` 为 `[y_min, x_min, y_max, x_max]`，归一化到 `[0, 1]`；
/// 按分数降序排列。
#[derive(Debug, Clone, Default)]
pub struct RawDetections {
  pub num_detections: usize,
  pub boxes: Vec<[f32; 4]>,
  pub scores: Vec<f32>,
  pub classes: Vec<u16>,
  pub masks: Option<Vec<Mask>>,
}

impl RawDetections {
  /// 有效检测数量
  pub fn len(&self) -> usize {
    self
      .num_detections
      .min(self.boxes.len())
      .min(self.scores.len())
      .min(self.classes.len())
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 去掉批维度并收窄类型，存在掩码时重映射到图像坐标
  pub fn decode(
    outputs: GraphOutputs,
    image_height: usize,
    image_width: usize,
  ) -> Result<Self, GraphError> {
    let num_detections = outputs
      .num_detections
      .data
      .first()
      .copied()
      .ok_or_else(|| GraphError::invalid(NUM_DETECTIONS, "张量为空"))?;
    let num_detections = num_detections.max(0.0) as usize;

    let boxes_shape = single_batch(DETECTION_BOXES, &outputs.detection_boxes, 3)?;
    if boxes_shape[2] != 4 {
      return Err(GraphError::invalid(
        DETECTION_BOXES,
        format!("最后一维应为 4，实际为 {}", boxes_shape[2]),
      ));
    }
    let boxes: Vec<[f32; 4]> = outputs
      .detection_boxes
      .data
      .chunks_exact(4)
      .map(|b| [b[0], b[1], b[2], b[3]])
      .collect();

    single_batch(DETECTION_SCORES, &outputs.detection_scores, 2)?;
    let scores = outputs.detection_scores.data;

    single_batch(DETECTION_CLASSES, &outputs.detection_classes, 2)?;
    let classes = outputs
      .detection_classes
      .data
      .iter()
      .map(|&c| {
        if (0.0..=f32::from(u16::MAX)).contains(&c) {
          Ok(c as u16)
        } else {
          Err(GraphError::invalid(
            DETECTION_CLASSES,
            format!("类别 id 超出范围 [0, {}]: {}", u16::MAX, c),
          ))
        }
      })
      .collect::<Result<Vec<u16>, _>>()?;

    let num_detections = num_detections.min(boxes.len());

    let masks = match outputs.detection_masks {
      Some(masks) => {
        let shape = single_batch(DETECTION_MASKS, &masks, 4)?;
        let (mask_height, mask_width) = (shape[2], shape[3]);
        debug!(
          "重映射 {} 个 {}x{} 掩码到 {}x{}",
          num_detections, mask_height, mask_width, image_height, image_width
        );
        let count = num_detections.min(shape[1]);
        Some(reframe_box_masks_to_image_masks(
          &masks.data[..count * mask_height * mask_width],
          mask_height,
          mask_width,
          &boxes[..count],
          image_height,
          image_width,
          MASK_THRESHOLD,
        ))
      }
      None => None,
    };

    debug!("检测数量: {}", num_detections);

    Ok(RawDetections {
      num_detections,
      boxes,
      scores,
      classes,
      masks,
    })
  }
}

/// 校验批维度为 1、维数与数据长度一致，返回形状
fn single_batch<'a>(
  name: &'static str,
  tensor: &'a OutputTensor,
  rank: usize,
) -> Result<&'a [usize], GraphError> {
  let shape = tensor.shape.as_slice();
  if shape.len() != rank {
    return Err(GraphError::invalid(
      name,
      format!("期望 {} 维，实际形状 {:?}", rank, shape),
    ));
  }
  if shape[0] != 1 {
    return Err(GraphError::invalid(
      name,
      format!("批大小应为 1，实际为 {}", shape[0]),
    ));
  }
  let expected: usize = shape.iter().product();
  if expected != tensor.data.len() {
    return Err(GraphError::invalid(
      name,
      format!("形状 {:?} 与数据长度 {} 不符", shape, tensor.data.len()),
    ));
  }
  Ok(shape)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn outputs(num: f32, boxes: Vec<[f32; 4]>, scores: Vec<f32>, classes: Vec<f32>) -> GraphOutputs {
    let n = boxes.len();
    GraphOutputs {
      num_detections: OutputTensor::new(vec![1], vec![num]),
      detection_boxes: OutputTensor::new(vec![1, n, 4], boxes.into_iter().flatten().collect()),
      detection_scores: OutputTensor::new(vec![1, n], scores),
      detection_classes: OutputTensor::new(vec![1, n], classes),
      detection_masks: None,
    }
  }

  #[test]
  fn decodes_single_batch() {
    let raw = RawDetections::decode(
      outputs(
        1.0,
        vec![[0.1, 0.2, 0.3, 0.4], [0.0; 4]],
        vec![0.9, 0.0],
        vec![1.0, 0.0],
      ),
      10,
      10,
    )
    .unwrap();

    assert_eq!(raw.num_detections, 1);
    assert_eq!(raw.len(), 1);
    assert_eq!(raw.boxes[0], [0.1, 0.2, 0.3, 0.4]);
    assert_eq!(raw.classes, vec![1, 0]);
    assert!(raw.masks.is_none());
  }

  #[test]
  fn class_ids_above_u8_survive() {
    let raw = RawDetections::decode(outputs(1.0, vec![[0.0; 4]], vec![0.5], vec![545.0]), 1, 1)
      .unwrap();
    assert_eq!(raw.classes[0], 545);
  }

  #[test]
  fn out_of_range_class_ids_are_rejected() {
    for class in [70000.0, -1.0, f32::NAN] {
      let result =
        RawDetections::decode(outputs(1.0, vec![[0.0; 4]], vec![0.5], vec![class]), 1, 1);
      assert!(matches!(
        result,
        Err(GraphError::InvalidOutput { name: DETECTION_CLASSES, .. })
      ));
    }

    let raw = RawDetections::decode(outputs(1.0, vec![[0.0; 4]], vec![0.5], vec![65535.0]), 1, 1)
      .unwrap();
    assert_eq!(raw.classes[0], u16::MAX);
  }

  #[test]
  fn num_detections_is_clamped_to_boxes() {
    let raw = RawDetections::decode(outputs(300.0, vec![[0.0; 4]], vec![0.5], vec![1.0]), 1, 1)
      .unwrap();
    assert_eq!(raw.num_detections, 1);
  }

  #[test]
  fn rejects_batch_larger_than_one() {
    let mut out = outputs(1.0, vec![[0.0; 4]], vec![0.5], vec![1.0]);
    out.detection_scores = OutputTensor::new(vec![2, 1], vec![0.5, 0.5]);
    assert!(matches!(
      RawDetections::decode(out, 1, 1),
      Err(GraphError::InvalidOutput { name: DETECTION_SCORES, .. })
    ));
  }

  #[test]
  fn rejects_shape_data_mismatch() {
    let mut out = outputs(1.0, vec![[0.0; 4]], vec![0.5], vec![1.0]);
    out.detection_boxes = OutputTensor::new(vec![1, 2, 4], vec![0.0; 4]);
    assert!(RawDetections::decode(out, 1, 1).is_err());
  }

  #[test]
  fn rejects_empty_num_detections() {
    let mut out = outputs(1.0, vec![[0.0; 4]], vec![0.5], vec![1.0]);
    out.num_detections = OutputTensor::new(vec![1], vec![]);
    assert!(matches!(
      RawDetections::decode(out, 1, 1),
      Err(GraphError::InvalidOutput { name: NUM_DETECTIONS, .. })
    ));
  }

  #[test]
  fn masks_are_reframed_for_each_detection() {
    let mut out = outputs(
      1.0,
      vec![[0.0, 0.0, 1.0, 1.0], [0.0; 4]],
      vec![0.9, 0.1],
      vec![1.0, 2.0],
    );
    out.detection_masks = Some(OutputTensor::new(vec![1, 2, 2, 2], vec![1.0; 8]));

    let raw = RawDetections::decode(out, 4, 6).unwrap();
    let masks = raw.masks.unwrap();
    assert_eq!(masks.len(), 1);
    assert_eq!((masks[0].height, masks[0].width), (4, 6));
    assert_eq!(masks[0].area(), 24);
  }
}
