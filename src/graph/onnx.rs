// 该文件是 Wuzhi （物识） 项目的一部分。
// src/graph/onnx.rs - ONNX Runtime 推理图
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tracing::{debug, info, warn};

use super::{
  DETECTION_BOXES, DETECTION_CLASSES, DETECTION_MASKS, DETECTION_SCORES, GraphError,
  GraphOutputs, IMAGE_TENSOR, InferenceGraph, NUM_DETECTIONS, OutputTensor, RawDetections,
};
use crate::frame::{AsNhwcFrame, RgbNhwcFrame};

/// 冻结检测图导出的 ONNX 模型
///
/// 会话在互斥锁内执行，同一个图可在多个线程间共享。
pub struct OnnxGraph {
  session: Mutex<Session>,
  input_name: String,
  output_names: OutputNames,
}

#[derive(Debug, Clone)]
struct OutputNames {
  num_detections: String,
  detection_boxes: String,
  detection_scores: String,
  detection_classes: String,
  detection_masks: Option<String>,
}

pub struct OnnxGraphBuilder {
  model_path: PathBuf,
  intra_threads: Option<usize>,
}

/// 张量名可能带有 TensorFlow 风格的 `:0` 后缀
fn tensor_matches(actual: &str, wanted: &str) -> bool {
  actual.strip_suffix(":0").unwrap_or(actual) == wanted
}

fn find_name<'a, I>(names: I, wanted: &str) -> Option<String>
where
  I: IntoIterator<Item = &'a String>,
{
  names
    .into_iter()
    .find(|name| tensor_matches(name, wanted))
    .cloned()
}

impl OnnxGraphBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      intra_threads: None,
    }
  }

  pub fn intra_threads(mut self, intra_threads: Option<usize>) -> Self {
    self.intra_threads = intra_threads;
    self
  }

  pub fn build(self) -> Result<OnnxGraph, GraphError> {
    info!("加载模型文件: {}", self.model_path.display());
    let metadata = std::fs::metadata(&self.model_path).map_err(|source| GraphError::Io {
      path: self.model_path.display().to_string(),
      source,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let mut builder = Session::builder()
      .map_err(GraphError::runtime)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(GraphError::runtime)?;
    if let Some(threads) = self.intra_threads {
      builder = builder
        .with_intra_threads(threads)
        .map_err(GraphError::runtime)?;
    }
    let session = builder
      .commit_from_file(&self.model_path)
      .map_err(GraphError::runtime)?;
    info!("推理会话创建完成");

    let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
    let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
    debug!("模型输入: {:?}", input_names);
    debug!("模型输出: {:?}", output_names);

    let input_name = match find_name(&input_names, IMAGE_TENSOR) {
      Some(name) => name,
      None => {
        let first = input_names
          .first()
          .cloned()
          .ok_or_else(|| GraphError::MissingInput(IMAGE_TENSOR.to_string()))?;
        warn!("模型没有 {} 输入，改用第一个输入 {}", IMAGE_TENSOR, first);
        first
      }
    };

    let required = |wanted: &str| {
      find_name(&output_names, wanted).ok_or_else(|| GraphError::MissingOutput(wanted.to_string()))
    };
    let output_names = OutputNames {
      num_detections: required(NUM_DETECTIONS)?,
      detection_boxes: required(DETECTION_BOXES)?,
      detection_scores: required(DETECTION_SCORES)?,
      detection_classes: required(DETECTION_CLASSES)?,
      detection_masks: find_name(&output_names, DETECTION_MASKS),
    };
    if output_names.detection_masks.is_some() {
      debug!("模型带有实例掩码输出");
    }

    Ok(OnnxGraph {
      session: Mutex::new(session),
      input_name,
      output_names,
    })
  }
}

impl InferenceGraph for OnnxGraph {
  fn run(&self, frame: &RgbNhwcFrame) -> Result<RawDetections, GraphError> {
    debug!("设置模型输入: {:?}", frame.shape());
    let input = Tensor::from_array((frame.shape(), frame.as_nhwc().to_vec()))
      .map_err(GraphError::runtime)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| GraphError::Runtime("推理会话锁已损坏".to_string()))?;

    debug!("执行模型推理");
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => input])
      .map_err(GraphError::runtime)?;

    let extract = |name: &str| -> Result<OutputTensor, GraphError> {
      let value = outputs
        .get(name)
        .ok_or_else(|| GraphError::MissingOutput(name.to_string()))?;
      let (shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(GraphError::runtime)?;
      Ok(OutputTensor::new(
        shape.iter().map(|&d| d.max(0) as usize).collect(),
        data.to_vec(),
      ))
    };

    let names = &self.output_names;
    let graph_outputs = GraphOutputs {
      num_detections: extract(&names.num_detections)?,
      detection_boxes: extract(&names.detection_boxes)?,
      detection_scores: extract(&names.detection_scores)?,
      detection_classes: extract(&names.detection_classes)?,
      detection_masks: match &names.detection_masks {
        Some(name) => Some(extract(name)?),
        None => None,
      },
    };

    RawDetections::decode(graph_outputs, frame.height(), frame.width())
  }
}
