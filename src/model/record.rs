// 该文件是 Wuzhi （物识） 项目的一部分。
// src/model/record.rs - 检测结果记录
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{graph::RawDetections, labels::CategoryIndex};

/// 一个检测目标，坐标均已归一化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  pub label: String,
  pub score: f32,
  /// 框中心横坐标
  pub x: f32,
  /// 框中心纵坐标
  pub y: f32,
  pub width: f32,
  pub height: f32,
  /// 置信度与框面积之积
  pub significance: f32,
  /// `[y_min, x_min, y_max, x_max]`
  #[serde(rename = "box")]
  pub bbox: [f32; 4],
}

impl DetectionRecord {
  pub fn new(label: String, score: f32, bbox: [f32; 4]) -> Self {
    let width = bbox[3] - bbox[1];
    let height = bbox[2] - bbox[0];
    Self {
      label,
      score,
      x: (bbox[1] + bbox[3]) / 2.0,
      y: (bbox[0] + bbox[2]) / 2.0,
      width,
      height,
      significance: score * width * height,
      bbox,
    }
  }
}

impl fmt::Display for DetectionRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} (score: {:.5}, significance: {:.5}, x: {:.5}, y: {:.5}, width: {:.5}, height: {:.5})",
      self.label, self.score, self.significance, self.x, self.y, self.width, self.height
    )
  }
}

/// 按模型给出的顺序（分数降序）生成记录，遇到第一个低于 `min_score` 的检测即停止
pub fn format_output(
  output: &RawDetections,
  labels: &CategoryIndex,
  min_score: f32,
) -> Vec<DetectionRecord> {
  let mut records = Vec::new();
  for i in 0..output.len() {
    let score = output.scores[i];
    if score < min_score {
      break;
    }
    let label = labels.label(u32::from(output.classes[i])).into_owned();
    records.push(DetectionRecord::new(label, score, output.boxes[i]));
  }
  debug!("保留 {} / {} 个检测", records.len(), output.len());
  records
}
