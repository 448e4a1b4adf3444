// 该文件是 Wuzhi （物识） 项目的一部分。
// src/lock/local.rs - 进程内命名锁
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::trace;

/// 进程内命名锁，同名调用互斥，不同名互不影响
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalLock;

fn registry() -> &'static Mutex<HashMap<String, Arc<Mutex<()>>>> {
  static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();
  REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl LocalLock {
  fn named(name: &str) -> Arc<Mutex<()>> {
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    map
      .entry(name.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  pub fn with_lock<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
  where
    F: FnOnce() -> Result<T, E>,
  {
    let mutex = Self::named(name);
    // 上一个持有者 panic 不影响后续加载
    let _guard = mutex.lock().unwrap_or_else(|e| e.into_inner());
    trace!("获得进程内锁: {}", name);
    f()
  }
}
