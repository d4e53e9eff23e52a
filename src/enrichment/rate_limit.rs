// 该文件是 Jingjie （警戒） 项目的一部分。
// src/enrichment/rate_limit.rs - 滑动窗口限流
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  collections::VecDeque,
  sync::{Mutex, PoisonError},
  time::{Duration, Instant},
};

use tracing::info;

use super::clock::{Clock, SystemClock};

/// 任意 `window` 时长内最多放行 `max_calls` 次
///
/// 超出的调用方异步等待，直到窗口中最早的一次调用过期。
#[derive(Debug)]
pub struct RateLimiter<C = SystemClock> {
  clock: C,
  max_calls: usize,
  window: Duration,
  calls: Mutex<VecDeque<Instant>>,
}

impl<C: Clock> RateLimiter<C> {
  pub fn new(max_calls: usize, window: Duration, clock: C) -> Self {
    Self {
      clock,
      max_calls: max_calls.max(1),
      window,
      calls: Mutex::new(VecDeque::with_capacity(max_calls)),
    }
  }

  pub fn max_calls(&self) -> usize {
    self.max_calls
  }

  pub fn window(&self) -> Duration {
    self.window
  }

  /// 立即尝试占用一个名额；失败时返回还需等待的时长
  pub fn try_acquire(&self) -> Result<(), Duration> {
    let now = self.clock.now();
    let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);

    while let Some(&oldest) = calls.front() {
      if now.saturating_duration_since(oldest) >= self.window {
        calls.pop_front();
      } else {
        break;
      }
    }

    if calls.len() < self.max_calls {
      calls.push_back(now);
      return Ok(());
    }

    let oldest = calls.front().copied().unwrap_or(now);
    Err((oldest + self.window).saturating_duration_since(now))
  }

  /// 等待直到获得名额，返回累计等待时长
  pub async fn acquire(&self) -> Duration {
    let mut waited = Duration::ZERO;
    loop {
      match self.try_acquire() {
        Ok(()) => return waited,
        Err(wait) => {
          info!("达到限流上限，等待 {:.1} 秒", wait.as_secs_f64());
          self.clock.sleep(wait).await;
          waited += wait;
        }
      }
    }
  }
}
