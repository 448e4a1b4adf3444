// 该文件是 Wuzhi （物识） 项目的一部分。
// src/model.rs - 目标检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::{BufRead, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  frame::RgbNhwcFrame,
  graph::{GraphCache, GraphError, InferenceGraph, OnnxGraphBuilder, RawDetections},
  input::{ImageFileInput, ImageInputError},
  labels::{CategoryIndex, DEFAULT_MAX_NUM_CLASSES, LabelMapError},
  lock::CoordinationLock,
};

mod artifact;
mod record;

pub use self::artifact::{ArtifactError, ArtifactStatus, download_lock_name, ensure_downloaded};
pub use self::record::{DetectionRecord, format_output};

pub const GRAPH_FILE_NAME: &str =
  "faster_rcnn_inception_resnet_v2_atrous_lowproposals_oid_2018_01_28_frozen_inference_graph.onnx";
pub const LABEL_FILE_NAME: &str = "oid_bbox_trainable_label_map.pbtxt";
pub const DEFAULT_MODEL_DIR: &str = "models";
pub const DEFAULT_MIN_SCORE: f32 = 0.66;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ObjectModelError {
  #[error("模型文件错误: {0}")]
  Artifact(#[from] ArtifactError),
  #[error("推理图错误: {0}")]
  Graph(#[from] GraphError),
  #[error("标签错误: {0}")]
  Labels(#[from] LabelMapError),
  #[error("图像输入错误: {0}")]
  Input(#[from] ImageInputError),
}

/// 模型文件位置及加载参数
#[derive(Debug, Clone)]
pub struct ModelConfig {
  pub graph_file: PathBuf,
  pub label_file: PathBuf,
  pub max_num_classes: usize,
  pub use_display_name: bool,
  pub intra_threads: Option<usize>,
  /// 推理图缺失时的下载地址
  pub download_url: Option<Url>,
}

impl ModelConfig {
  /// 模型文件位于 `<model_dir>/object/` 下
  pub fn from_model_dir<P: AsRef<Path>>(model_dir: P) -> Self {
    let dir = model_dir.as_ref().join(ObjectModel::NAME);
    Self {
      graph_file: dir.join(GRAPH_FILE_NAME),
      label_file: dir.join(LABEL_FILE_NAME),
      max_num_classes: DEFAULT_MAX_NUM_CLASSES,
      use_display_name: true,
      intra_threads: None,
      download_url: None,
    }
  }
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self::from_model_dir(DEFAULT_MODEL_DIR)
  }
}

/// 预训练目标检测模型：推理图 + 类别索引
pub struct ObjectModel {
  graph: Arc<dyn InferenceGraph>,
  labels: CategoryIndex,
  min_score: f32,
}

impl ObjectModel {
  pub const NAME: &'static str = "object";
  pub const VERSION: u32 = 20180124;
  pub const APPROX_RAM_MB: u32 = 2000;

  /// 使用进程级全局缓存加载
  pub fn load(config: &ModelConfig, lock: &CoordinationLock) -> Result<Self, ObjectModelError> {
    Self::load_with_cache(config, lock, GraphCache::global())
  }

  pub fn load_with_cache(
    config: &ModelConfig,
    lock: &CoordinationLock,
    cache: &GraphCache,
  ) -> Result<Self, ObjectModelError> {
    let status = ensure_downloaded(config, lock)?;
    debug!("模型文件状态: {:?}", status);

    let graph = Self::load_graph(config, lock, cache)?;
    let labels = Self::load_labels(config)?;
    info!(
      "模型 {} (版本 {}) 已就绪，类别数 {}",
      Self::NAME,
      Self::VERSION,
      labels.len()
    );
    Ok(Self::from_parts(graph, labels))
  }

  pub fn from_parts(graph: Arc<dyn InferenceGraph>, labels: CategoryIndex) -> Self {
    Self {
      graph,
      labels,
      min_score: DEFAULT_MIN_SCORE,
    }
  }

  pub fn with_min_score(mut self, min_score: f32) -> Self {
    self.min_score = min_score;
    self
  }

  /// 同一进程内只解析一次推理图，之后返回缓存中的同一实例
  pub fn load_graph(
    config: &ModelConfig,
    lock: &CoordinationLock,
    cache: &GraphCache,
  ) -> Result<Arc<dyn InferenceGraph>, GraphError> {
    cache.get_or_load(Self::NAME, lock, || {
      let graph = OnnxGraphBuilder::new(&config.graph_file)
        .intra_threads(config.intra_threads)
        .build()?;
      Ok(Arc::new(graph) as Arc<dyn InferenceGraph>)
    })
  }

  pub fn load_labels(config: &ModelConfig) -> Result<CategoryIndex, LabelMapError> {
    CategoryIndex::load(
      &config.label_file,
      config.max_num_classes,
      config.use_display_name,
    )
  }

  pub fn graph(&self) -> &Arc<dyn InferenceGraph> {
    &self.graph
  }

  pub fn labels(&self) -> &CategoryIndex {
    &self.labels
  }

  pub fn min_score(&self) -> f32 {
    self.min_score
  }

  pub fn run_inference_for_single_image(
    &self,
    frame: &RgbNhwcFrame,
  ) -> Result<RawDetections, GraphError> {
    let started = Instant::now();
    let output = self.graph.run(frame)?;
    debug!("推理完成，耗时: {:.2?}", started.elapsed());
    Ok(output)
  }

  pub fn format_output(&self, output: &RawDetections, min_score: f32) -> Vec<DetectionRecord> {
    format_output(output, &self.labels, min_score)
  }

  pub fn predict<P: AsRef<Path>>(
    &self,
    image_file: P,
    min_score: f32,
  ) -> Result<Vec<DetectionRecord>, ObjectModelError> {
    let input = ImageFileInput::open(image_file)?;
    self.predict_input(input, min_score)
  }

  pub fn predict_reader<R: BufRead + Seek>(
    &self,
    reader: R,
    min_score: f32,
  ) -> Result<Vec<DetectionRecord>, ObjectModelError> {
    let input = ImageFileInput::from_reader(reader)?;
    self.predict_input(input, min_score)
  }

  pub fn predict_image(
    &self,
    image: RgbImage,
    min_score: f32,
  ) -> Result<Vec<DetectionRecord>, ObjectModelError> {
    self.predict_frame(&RgbNhwcFrame::from(image), min_score)
  }

  pub fn predict_frame(
    &self,
    frame: &RgbNhwcFrame,
    min_score: f32,
  ) -> Result<Vec<DetectionRecord>, ObjectModelError> {
    let output = self.run_inference_for_single_image(frame)?;
    Ok(self.format_output(&output, min_score))
  }

  fn predict_input(
    &self,
    input: ImageFileInput,
    min_score: f32,
  ) -> Result<Vec<DetectionRecord>, ObjectModelError> {
    let mut records = Vec::new();
    for frame in input.into_nhwc() {
      records.extend(self.predict_frame(&frame, min_score)?);
    }
    Ok(records)
  }
}

impl Model for ObjectModel {
  type Input = RgbNhwcFrame;
  type Output = Vec<DetectionRecord>;
  type Error = ObjectModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.predict_frame(input, self.min_score)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::labels::Category;

  struct FixedGraph;

  impl InferenceGraph for FixedGraph {
    fn run(&self, _frame: &RgbNhwcFrame) -> Result<RawDetections, GraphError> {
      Ok(RawDetections {
        num_detections: 2,
        boxes: vec![[0.1, 0.2, 0.3, 0.4], [0.0, 0.0, 1.0, 1.0]],
        scores: vec![0.9, 0.6],
        classes: vec![1, 2],
        masks: None,
      })
    }
  }

  fn model() -> ObjectModel {
    let labels = CategoryIndex::from(vec![
      Category {
        id: 1,
        name: "Cat".to_string(),
      },
      Category {
        id: 2,
        name: "Dog".to_string(),
      },
    ]);
    ObjectModel::from_parts(Arc::new(FixedGraph), labels)
  }

  #[test]
  fn config_paths_live_under_object_dir() {
    let config = ModelConfig::from_model_dir("/srv/models");
    assert_eq!(
      config.graph_file,
      Path::new("/srv/models/object").join(GRAPH_FILE_NAME)
    );
    assert_eq!(
      config.label_file,
      Path::new("/srv/models/object/oid_bbox_trainable_label_map.pbtxt")
    );
    assert_eq!(config.max_num_classes, 1000);
    assert!(config.use_display_name);
  }

  #[test]
  fn infer_uses_default_min_score() {
    let model = model();
    assert_eq!(model.min_score(), DEFAULT_MIN_SCORE);
    let records = model.infer(&RgbNhwcFrame::with_shape(2, 2)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].label, "Cat");
  }

  #[test]
  fn infer_honours_configured_min_score() {
    let model = model().with_min_score(0.5);
    let records = model.infer(&RgbNhwcFrame::with_shape(2, 2)).unwrap();
    let labels: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, ["Cat", "Dog"]);
  }

  #[test]
  fn predict_image_runs_the_graph() {
    let records = model().predict_image(RgbImage::new(4, 4), 0.0).unwrap();
    assert_eq!(records.len(), 2);
  }

  #[test]
  fn predict_reports_decode_failures() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"\xff\xd8 not really a jpeg").unwrap();
    assert!(matches!(
      model().predict(&path, 0.5),
      Err(ObjectModelError::Input(_))
    ));
  }
}
