// 该文件是 Wuzhi （物识） 项目的一部分。
// src/lock.rs - 跨进程协调锁
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use url::Url;

use crate::FromUrl;

mod local;
pub use self::local::LocalLock;

#[cfg(feature = "redis_lock")]
mod redis_lock;
#[cfg(feature = "redis_lock")]
pub use self::redis_lock::{RedisLock, RedisLockGuard};

const LOCAL_SCHEME: &str = "local";
const REDIS_SCHEME: &str = "redis";

#[derive(Error, Debug)]
pub enum LockError {
  #[error("不支持的锁方案: {0}")]
  UnsupportedScheme(String),
  #[error("锁地址无效: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[cfg(feature = "redis_lock")]
  #[error("Redis 错误: {0}")]
  Redis(#[from] redis::RedisError),
}

/// 以名称区分的互斥锁
///
/// `Local` 只在本进程内互斥；`Redis` 通过同一 Redis 实例在多个进程间互斥。
pub enum CoordinationLock {
  Local(LocalLock),
  #[cfg(feature = "redis_lock")]
  Redis(RedisLock),
}

impl Default for CoordinationLock {
  fn default() -> Self {
    CoordinationLock::Local(LocalLock)
  }
}

impl FromUrl for CoordinationLock {
  type Error = LockError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LOCAL_SCHEME => Ok(CoordinationLock::Local(LocalLock)),
      #[cfg(feature = "redis_lock")]
      REDIS_SCHEME | "rediss" => Ok(CoordinationLock::Redis(RedisLock::open(url)?)),
      other => Err(LockError::UnsupportedScheme(other.to_string())),
    }
  }
}

impl CoordinationLock {
  /// 由 Redis 主机名构建，主机名可附带端口
  pub fn redis_host(host: &str) -> Result<Self, LockError> {
    let url = Url::parse(&format!("{}://{}/", REDIS_SCHEME, host))?;
    Self::from_url(&url)
  }

  pub fn backend(&self) -> &'static str {
    match self {
      CoordinationLock::Local(_) => LOCAL_SCHEME,
      #[cfg(feature = "redis_lock")]
      CoordinationLock::Redis(_) => REDIS_SCHEME,
    }
  }

  /// 持有名为 `name` 的锁执行 `f`，`f` 返回后释放
  pub fn with_lock<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
  where
    F: FnOnce() -> Result<T, E>,
    E: From<LockError>,
  {
    match self {
      CoordinationLock::Local(lock) => lock.with_lock(name, f),
      #[cfg(feature = "redis_lock")]
      CoordinationLock::Redis(lock) => {
        let _guard = lock.acquire(name).map_err(E::from)?;
        f()
      }
    }
  }
}
