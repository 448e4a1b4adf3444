// 该文件是 Wuzhi （物识） 项目的一部分。
// src/graph/cache.rs - 进程级推理图缓存
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

use tracing::{debug, info};

use super::{GraphError, InferenceGraph};
use crate::lock::CoordinationLock;

/// 以模型名为键的推理图缓存，只增不删
#[derive(Default)]
pub struct GraphCache {
  graphs: RwLock<HashMap<String, Arc<dyn InferenceGraph>>>,
}

/// 首次加载时使用的协调锁名
pub fn load_graph_lock_name(model_name: &str) -> String {
  format!("classifier_{}_load_graph", model_name)
}

impl GraphCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// 进程内共享的全局缓存
  pub fn global() -> &'static GraphCache {
    static GLOBAL: OnceLock<GraphCache> = OnceLock::new();
    GLOBAL.get_or_init(GraphCache::new)
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn InferenceGraph>> {
    let graphs = self.graphs.read().unwrap_or_else(|e| e.into_inner());
    graphs.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn len(&self) -> usize {
    self.graphs.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 返回已缓存的图；未缓存时在协调锁内调用 `load` 并登记
  ///
  /// 获得锁后会再次检查缓存，等待锁期间已由他人完成加载时不会重复解析。
  /// `load` 失败时不重试，缓存保持不变。
  pub fn get_or_load<F>(
    &self,
    name: &str,
    lock: &CoordinationLock,
    load: F,
  ) -> Result<Arc<dyn InferenceGraph>, GraphError>
  where
    F: FnOnce() -> Result<Arc<dyn InferenceGraph>, GraphError>,
  {
    if let Some(graph) = self.get(name) {
      debug!("推理图缓存命中: {}", name);
      return Ok(graph);
    }

    lock.with_lock(&load_graph_lock_name(name), || {
      if let Some(graph) = self.get(name) {
        debug!("等待锁期间推理图已加载: {}", name);
        return Ok(graph);
      }

      info!("加载推理图: {} (锁: {})", name, lock.backend());
      let started = Instant::now();
      let graph = load()?;
      info!("推理图加载完成，耗时: {:.2?}", started.elapsed());

      let mut graphs = self.graphs.write().unwrap_or_else(|e| e.into_inner());
      graphs.insert(name.to_string(), graph.clone());
      Ok(graph)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::RgbNhwcFrame;
  use crate::graph::RawDetections;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;

  struct EmptyGraph;

  impl InferenceGraph for EmptyGraph {
    fn run(&self, _frame: &RgbNhwcFrame) -> Result<RawDetections, GraphError> {
      Ok(RawDetections::default())
    }
  }

  fn counting_loader(
    counter: &AtomicUsize,
  ) -> impl FnOnce() -> Result<Arc<dyn InferenceGraph>, GraphError> + '_ {
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(Arc::new(EmptyGraph) as Arc<dyn InferenceGraph>)
    }
  }

  #[test]
  fn second_load_returns_identical_instance() {
    let cache = GraphCache::new();
    let lock = CoordinationLock::default();
    let loads = AtomicUsize::new(0);

    let first = cache
      .get_or_load("object", &lock, counting_loader(&loads))
      .unwrap();
    let second = cache
      .get_or_load("object", &lock, counting_loader(&loads))
      .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn failed_load_leaves_cache_empty() {
    let cache = GraphCache::new();
    let lock = CoordinationLock::default();

    let result = cache.get_or_load("broken", &lock, || {
      Err(GraphError::MissingInput("image_tensor".to_string()))
    });
    assert!(result.is_err());
    assert!(!cache.contains("broken"));
  }

  #[test]
  fn models_are_cached_independently() {
    let cache = GraphCache::new();
    let lock = CoordinationLock::default();
    let loads = AtomicUsize::new(0);

    let a = cache.get_or_load("a", &lock, counting_loader(&loads)).unwrap();
    let b = cache.get_or_load("b", &lock, counting_loader(&loads)).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(loads.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn concurrent_loads_parse_once() {
    let cache = Arc::new(GraphCache::new());
    let loads = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let cache = cache.clone();
        let loads = loads.clone();
        thread::spawn(move || {
          let lock = CoordinationLock::default();
          cache
            .get_or_load("cache-concurrent", &lock, || {
              loads.fetch_add(1, Ordering::SeqCst);
              thread::sleep(std::time::Duration::from_millis(10));
              Ok(Arc::new(EmptyGraph) as Arc<dyn InferenceGraph>)
            })
            .unwrap()
        })
      })
      .collect();

    let graphs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(graphs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
  }

  #[test]
  fn lock_name_is_scoped_to_model() {
    assert_eq!(load_graph_lock_name("object"), "classifier_object_load_graph");
  }
}
