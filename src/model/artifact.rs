// 该文件是 Wuzhi （物识） 项目的一部分。
// src/model/artifact.rs - 模型文件检查与按需下载
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::{ModelConfig, ObjectModel};
use crate::lock::{CoordinationLock, LockError};

#[derive(Error, Debug)]
pub enum ArtifactError {
  #[error("模型文件不存在: {0}")]
  Missing(PathBuf),
  #[error("I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("下载失败 {url}: {message}")]
  Download { url: String, message: String },
  #[error("不支持的下载地址: {0}")]
  UnsupportedUrl(String),
  #[error("协调锁错误: {0}")]
  Lock(#[from] LockError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
  /// 文件已存在
  Present,
  /// 本次调用下载了推理图
  Downloaded,
}

pub fn download_lock_name(model_name: &str) -> String {
  format!("classifier_{}_download", model_name)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
  move |source| ArtifactError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// 确认推理图与标签文件都在本地
///
/// 推理图缺失且配置了 `download_url` 时，在协调锁内下载；标签文件必须已存在。
pub fn ensure_downloaded(
  config: &ModelConfig,
  lock: &CoordinationLock,
) -> Result<ArtifactStatus, ArtifactError> {
  if !config.label_file.is_file() {
    return Err(ArtifactError::Missing(config.label_file.clone()));
  }
  if config.graph_file.is_file() {
    return Ok(ArtifactStatus::Present);
  }

  let url = match &config.download_url {
    Some(url) => url,
    None => return Err(ArtifactError::Missing(config.graph_file.clone())),
  };

  lock.with_lock(&download_lock_name(ObjectModel::NAME), || {
    if config.graph_file.is_file() {
      info!("等待期间推理图已下载: {}", config.graph_file.display());
      return Ok(ArtifactStatus::Present);
    }
    fetch(url, &config.graph_file)?;
    Ok(ArtifactStatus::Downloaded)
  })
}

/// 先写入同目录下的临时文件，完成后重命名到目标路径
fn fetch(url: &Url, target: &Path) -> Result<(), ArtifactError> {
  info!("下载推理图: {} -> {}", url, target.display());
  if let Some(parent) = target.parent() {
    std::fs::create_dir_all(parent).map_err(io_error(parent))?;
  }

  let (partial, file) = create_partial(target)?;
  let result = open_source(url).and_then(|mut reader| {
    let mut file = file;
    let bytes = std::io::copy(&mut reader, &mut file).map_err(io_error(&partial))?;
    file.sync_all().map_err(io_error(&partial))?;
    info!("已下载 {:.2} MB", bytes as f64 / (1024.0 * 1024.0));
    Ok(())
  });

  match result {
    Ok(()) => std::fs::rename(&partial, target).map_err(io_error(target)),
    Err(e) => {
      if partial.exists() {
        if let Err(remove) = std::fs::remove_file(&partial) {
          warn!("无法删除临时文件 {}: {}", partial.display(), remove);
        }
      }
      Err(e)
    }
  }
}

const PARTIAL_ATTEMPTS: u32 = 16;

/// 临时文件名带进程号与序号，并以独占方式创建，多个进程同时下载时互不覆盖
fn create_partial(target: &Path) -> Result<(PathBuf, File), ArtifactError> {
  static SEQUENCE: AtomicU32 = AtomicU32::new(0);

  let mut last_error = None;
  for _ in 0..PARTIAL_ATTEMPTS {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let partial = partial_path(target, seq);
    match OpenOptions::new().write(true).create_new(true).open(&partial) {
      Ok(file) => return Ok((partial, file)),
      Err(e) if e.kind() == ErrorKind::AlreadyExists => {
        warn!("临时文件已存在: {}", partial.display());
        last_error = Some((partial, e));
      }
      Err(e) => return Err(io_error(&partial)(e)),
    }
  }
  match last_error {
    Some((partial, e)) => Err(io_error(&partial)(e)),
    None => Err(ArtifactError::Missing(target.to_path_buf())),
  }
}

fn partial_path(target: &Path, seq: u32) -> PathBuf {
  let mut name = target
    .file_name()
    .map(|n| n.to_os_string())
    .unwrap_or_default();
  name.push(format!(".{}.{}.part", std::process::id(), seq));
  target.with_file_name(name)
}

fn open_source(url: &Url) -> Result<Box<dyn Read>, ArtifactError> {
  match url.scheme() {
    "file" => {
      let path = url
        .to_file_path()
        .map_err(|_| ArtifactError::UnsupportedUrl(url.to_string()))?;
      let file = File::open(&path).map_err(io_error(&path))?;
      Ok(Box::new(file))
    }
    #[cfg(feature = "download")]
    "http" | "https" => {
      let response = ureq::get(url.as_str())
        .call()
        .map_err(|e| ArtifactError::Download {
          url: url.to_string(),
          message: e.to_string(),
        })?;
      Ok(Box::new(response.into_reader()))
    }
    _ => Err(ArtifactError::UnsupportedUrl(url.to_string())),
  }
}
