// 该文件是 Wuzhi （物识） 项目的一部分。
// src/lock/redis_lock.rs - 基于 Redis 的分布式命名锁
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use url::Url;

use super::LockError;

const LOCK_KEY_PREFIX: &str = "lock:";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// 只删除自己持有的锁
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
else
  return 0
end
"#;

/// `SET key token NX` 实现的互斥锁，未获得时按固定间隔轮询
pub struct RedisLock {
  client: redis::Client,
  expire: Option<Duration>,
  poll_interval: Duration,
}

pub struct RedisLockGuard {
  connection: redis::Connection,
  key: String,
  token: String,
}

impl RedisLock {
  pub fn open(url: &Url) -> Result<Self, LockError> {
    let client = redis::Client::open(url.as_str())?;
    Ok(Self {
      client,
      expire: None,
      poll_interval: DEFAULT_POLL_INTERVAL,
    })
  }

  /// 锁的过期时间，默认不过期；不足 1 毫秒视为不过期
  pub fn expire(mut self, expire: Option<Duration>) -> Self {
    self.expire = expire.filter(|expire| expire.as_millis() > 0);
    self
  }

  pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn key(name: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, name)
  }

  /// 阻塞直到获得锁
  pub fn acquire(&self, name: &str) -> Result<RedisLockGuard, LockError> {
    let mut connection = self.client.get_connection()?;
    let key = Self::key(name);
    let token = format!("{:032x}", rand::random::<u128>());
    let started = Instant::now();
    let mut waited = false;

    loop {
      let mut cmd = redis::cmd("SET");
      cmd.arg(&key).arg(&token).arg("NX");
      if let Some(expire) = self.expire {
        cmd.arg("PX").arg(expire.as_millis() as u64);
      }
      let reply: Option<String> = cmd.query(&mut connection)?;
      if reply.is_some() {
        if waited {
          info!("等待 {:.2?} 后获得锁: {}", started.elapsed(), key);
        } else {
          debug!("获得锁: {}", key);
        }
        return Ok(RedisLockGuard {
          connection,
          key,
          token,
        });
      }
      if !waited {
        info!("锁 {} 已被占用，等待释放", key);
        waited = true;
      }
      std::thread::sleep(self.poll_interval);
    }
  }
}

impl RedisLockGuard {
  pub fn key(&self) -> &str {
    &self.key
  }
}

impl Drop for RedisLockGuard {
  fn drop(&mut self) {
    let released: redis::RedisResult<i64> = redis::Script::new(RELEASE_SCRIPT)
      .key(&self.key)
      .arg(&self.token)
      .invoke(&mut self.connection);
    match released {
      Ok(1) => debug!("释放锁: {}", self.key),
      Ok(_) => warn!("锁 {} 已不属于当前持有者（可能已过期）", self.key),
      Err(e) => warn!("释放锁 {} 失败: {}", self.key, e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_uses_lock_prefix() {
    assert_eq!(
      RedisLock::key("classifier_object_load_graph"),
      "lock:classifier_object_load_graph"
    );
  }

  #[test]
  fn open_does_not_connect() {
    let url = Url::parse("redis://127.0.0.1:1/").unwrap();
    let lock = RedisLock::open(&url)
      .unwrap()
      .expire(Some(Duration::from_secs(30)))
      .poll_interval(Duration::from_millis(10));
    assert_eq!(lock.expire, Some(Duration::from_secs(30)));
    assert_eq!(lock.poll_interval, Duration::from_millis(10));
  }

  #[test]
  fn zero_expiry_means_no_expiry() {
    let url = Url::parse("redis://127.0.0.1:1/").unwrap();
    for expire in [Duration::ZERO, Duration::from_micros(10)] {
      let lock = RedisLock::open(&url).unwrap().expire(Some(expire));
      assert_eq!(lock.expire, None);
    }
  }

  // 以下测试需要 Redis 服务，未设置 REDIS_HOST 时直接返回

  fn server_url() -> Option<Url> {
    let host = std::env::var("REDIS_HOST").ok()?;
    let host = host.trim();
    if host.is_empty() {
      return None;
    }
    Url::parse(&format!("redis://{}/", host)).ok()
  }

  fn unique_name(prefix: &str) -> String {
    format!("wuzhi_test_{}_{:016x}", prefix, rand::random::<u64>())
  }

  fn get_key(url: &Url, key: &str) -> Option<String> {
    let mut connection = redis::Client::open(url.as_str())
      .unwrap()
      .get_connection()
      .unwrap();
    redis::cmd("GET").arg(key).query(&mut connection).unwrap()
  }

  #[test]
  fn holders_are_mutually_exclusive() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let Some(url) = server_url() else { return };
    let name = unique_name("exclusive");
    let inside = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let url = url.clone();
        let name = name.clone();
        let inside = inside.clone();
        let entered = entered.clone();
        std::thread::spawn(move || {
          let lock = RedisLock::open(&url)
            .unwrap()
            .poll_interval(Duration::from_millis(5));
          for _ in 0..3 {
            let _guard = lock.acquire(&name).unwrap();
            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
            std::thread::sleep(Duration::from_millis(10));
            inside.fetch_sub(1, Ordering::SeqCst);
            entered.fetch_add(1, Ordering::SeqCst);
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(entered.load(Ordering::SeqCst), 12);
    assert_eq!(get_key(&url, &RedisLock::key(&name)), None);
  }

  #[test]
  fn dropping_guard_frees_the_key() {
    let Some(url) = server_url() else { return };
    let name = unique_name("release");
    let key = RedisLock::key(&name);
    let lock = RedisLock::open(&url).unwrap();

    let guard = lock.acquire(&name).unwrap();
    assert_eq!(guard.key(), key);
    assert_eq!(get_key(&url, &key).as_deref(), Some(guard.token.as_str()));
    drop(guard);
    assert_eq!(get_key(&url, &key), None);

    // 释放后可立即再次获得
    drop(lock.acquire(&name).unwrap());
  }

  #[test]
  fn guard_does_not_delete_a_key_it_no_longer_owns() {
    let Some(url) = server_url() else { return };
    let name = unique_name("stolen");
    let key = RedisLock::key(&name);
    let lock = RedisLock::open(&url).unwrap();

    let guard = lock.acquire(&name).unwrap();
    let mut connection = redis::Client::open(url.as_str())
      .unwrap()
      .get_connection()
      .unwrap();
    let _: () = redis::cmd("SET")
      .arg(&key)
      .arg("another-holder")
      .query(&mut connection)
      .unwrap();
    drop(guard);

    assert_eq!(get_key(&url, &key).as_deref(), Some("another-holder"));
    let _: () = redis::cmd("DEL").arg(&key).query(&mut connection).unwrap();
  }
}
