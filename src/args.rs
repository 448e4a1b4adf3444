// 该文件是 Wuzhi （物识） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use wuzhi::{
  FromUrl,
  labels::{DEFAULT_MAX_NUM_CLASSES, MAX_NUM_CLASSES},
  lock::{CoordinationLock, LockError},
  model::{DEFAULT_MIN_SCORE, DEFAULT_MODEL_DIR, ModelConfig},
};

/// Wuzhi 单张图像目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 待检测的图像文件路径
  #[arg(value_name = "IMAGE")]
  pub image: Option<PathBuf>,

  /// 最低置信度 (0.0 - 1.0)，遇到第一个低于该值的检测即停止
  #[arg(long, default_value_t = DEFAULT_MIN_SCORE, value_parser = parse_score, value_name = "THRESHOLD")]
  pub min_score: f32,

  /// 模型目录，文件位于 <DIR>/object/ 下
  #[arg(long, env = "MODEL_DIR", default_value = DEFAULT_MODEL_DIR, value_name = "DIR")]
  pub model_dir: PathBuf,

  /// 推理图文件路径（覆盖模型目录中的默认文件）
  #[arg(long, value_name = "FILE")]
  pub graph: Option<PathBuf>,

  /// 标签映射文件路径（覆盖模型目录中的默认文件）
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 最大类别数
  #[arg(long, default_value_t = DEFAULT_MAX_NUM_CLASSES, value_parser = parse_max_classes, value_name = "COUNT")]
  pub max_classes: usize,

  /// 使用标签的 name 而不是 display_name
  #[arg(long)]
  pub no_display_name: bool,

  /// 推理线程数
  #[arg(long, value_name = "COUNT")]
  pub threads: Option<usize>,

  /// 协调锁地址
  /// 支持格式:
  /// - 进程内: local:
  /// - Redis: redis://host:port/
  #[arg(long, value_name = "URL")]
  pub lock: Option<Url>,

  /// Redis 主机，未指定 --lock 时用于协调锁
  #[arg(long, env = "REDIS_HOST", value_name = "HOST")]
  pub redis_host: Option<String>,

  /// 推理图缺失时的下载地址（http(s):// 或 file://）
  #[arg(long, env = "WUZHI_DOWNLOAD_URL", value_name = "URL")]
  pub download_url: Option<Url>,

  /// 以 JSON 数组输出结果
  #[arg(long)]
  pub json: bool,
}

fn parse_score(s: &str) -> Result<f32, String> {
  let score: f32 = s.parse().map_err(|e| format!("{}", e))?;
  if (0.0..=1.0).contains(&score) {
    Ok(score)
  } else {
    Err(format!("阈值必须在 0.0 与 1.0 之间: {}", score))
  }
}

fn parse_max_classes(s: &str) -> Result<usize, String> {
  let count: usize = s.parse().map_err(|e| format!("{}", e))?;
  if (1..=MAX_NUM_CLASSES).contains(&count) {
    Ok(count)
  } else {
    Err(format!("类别数必须在 1 与 {} 之间: {}", MAX_NUM_CLASSES, count))
  }
}

impl Args {
  pub fn model_config(&self) -> ModelConfig {
    let mut config = ModelConfig::from_model_dir(&self.model_dir);
    if let Some(graph) = &self.graph {
      config.graph_file = graph.clone();
    }
    if let Some(labels) = &self.labels {
      config.label_file = labels.clone();
    }
    config.max_num_classes = self.max_classes;
    config.use_display_name = !self.no_display_name;
    config.intra_threads = self.threads;
    config.download_url = self.download_url.clone();
    config
  }

  /// `--lock` 优先，其次 Redis 主机，否则使用进程内锁
  pub fn coordination_lock(&self) -> Result<CoordinationLock, LockError> {
    if let Some(url) = &self.lock {
      return CoordinationLock::from_url(url);
    }
    match self.redis_host.as_deref().map(str::trim) {
      Some(host) if !host.is_empty() => CoordinationLock::redis_host(host),
      _ => Ok(CoordinationLock::default()),
    }
  }
}
