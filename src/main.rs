// 该文件是 Wuzhi （物识） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wuzhi::{
  input::ImageFileInput,
  model::ObjectModel,
  output::{JsonRecordOutput, TextLinesOutput},
  task::{OneShotTask, Task},
};

fn main() -> Result<()> {
  // 日志写到 stderr，stdout 只输出检测结果
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = args::Args::parse();

  let Some(image) = args.image.clone() else {
    println!("Argument required: image file path");
    std::process::exit(1);
  };

  let config = args.model_config();
  info!("图像文件: {}", image.display());
  info!("推理图文件: {}", config.graph_file.display());
  info!("标签文件: {}", config.label_file.display());
  info!("置信度阈值: {}", args.min_score);

  let lock = args.coordination_lock().context("无法创建协调锁")?;
  info!("协调锁: {}", lock.backend());

  let model = ObjectModel::load(&config, &lock)
    .context("模型加载失败")?
    .with_min_score(args.min_score);

  let input = ImageFileInput::open(&image)
    .with_context(|| format!("无法读取图像文件: {}", image.display()))?;

  if args.json {
    let output = JsonRecordOutput::new(std::io::stdout().lock());
    OneShotTask.run_task(input.into_nhwc(), &model, &output)?;
  } else {
    let output = TextLinesOutput::new(std::io::stdout().lock());
    OneShotTask.run_task(input.into_nhwc(), &model, &output)?;
  }

  Ok(())
}
