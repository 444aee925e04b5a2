// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/input/stream_source.rs - 断线重连的视频流采集
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

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use super::{StreamConnector, StreamError, StreamHandle};
use crate::config::StreamSettings;
use crate::frame::{CameraId, Frame};

/// 单槽最新帧缓冲：一个写者，多个读者
///
/// 锁只保护槽位中 `Arc` 的替换与克隆，像素拷贝发生在锁外。
#[derive(Debug, Default)]
pub struct FrameSlot {
  latest: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
  pub fn publish(&self, frame: Frame) {
    let frame = Arc::new(frame);
    match self.latest.lock() {
      Ok(mut guard) => *guard = Some(frame),
      Err(poisoned) => *poisoned.into_inner() = Some(frame),
    }
  }

  /// 返回最新帧的独立副本
  pub fn snapshot(&self) -> Option<Frame> {
    let latest = match self.latest.lock() {
      Ok(guard) => guard.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    };
    latest.map(|frame| frame.as_ref().clone())
  }

  pub fn is_empty(&self) -> bool {
    match self.latest.lock() {
      Ok(guard) => guard.is_none(),
      Err(poisoned) => poisoned.into_inner().is_none(),
    }
  }
}

/// 连续失败计数，任何一次成功读取即清零
#[derive(Debug, Clone)]
pub struct FailureCounter {
  consecutive: u32,
  escalation_threshold: u32,
}

impl FailureCounter {
  pub fn new(escalation_threshold: u32) -> Self {
    Self {
      consecutive: 0,
      escalation_threshold,
    }
  }

  pub fn record_failure(&mut self) -> u32 {
    self.consecutive = self.consecutive.saturating_add(1);
    self.consecutive
  }

  pub fn record_success(&mut self) {
    self.consecutive = 0;
  }

  pub fn consecutive(&self) -> u32 {
    self.consecutive
  }

  pub fn is_escalated(&self) -> bool {
    self.consecutive >= self.escalation_threshold
  }
}

/// 采集线程对外公布的统计信息
#[derive(Debug, Default)]
pub struct StreamStats {
  consecutive_failures: AtomicU32,
  frames: AtomicU64,
  reconnects: AtomicU64,
  connected: AtomicBool,
}

impl StreamStats {
  pub fn consecutive_failures(&self) -> u32 {
    self.consecutive_failures.load(Ordering::Acquire)
  }

  pub fn frames(&self) -> u64 {
    self.frames.load(Ordering::Acquire)
  }

  /// 已完成的 释放+重新打开 循环次数
  pub fn reconnects(&self) -> u64 {
    self.reconnects.load(Ordering::Acquire)
  }

  pub fn is_connected(&self) -> bool {
    self.connected.load(Ordering::Acquire)
  }
}

/// 单个摄像头的采集循环
pub struct StreamSource {
  camera_id: CameraId,
  name: String,
  address: String,
  connector: Arc<dyn StreamConnector>,
  slot: Arc<FrameSlot>,
  stats: Arc<StreamStats>,
  backoff: Duration,
  escalation_threshold: u32,
}

impl StreamSource {
  pub fn new(
    camera_id: CameraId,
    name: impl Into<String>,
    address: impl Into<String>,
    connector: Arc<dyn StreamConnector>,
    settings: &StreamSettings,
  ) -> Self {
    Self {
      camera_id,
      name: name.into(),
      address: address.into(),
      connector,
      slot: Arc::new(FrameSlot::default()),
      stats: Arc::new(StreamStats::default()),
      backoff: settings.reconnect_backoff(),
      escalation_threshold: settings.escalation_threshold,
    }
  }

  pub fn slot(&self) -> Arc<FrameSlot> {
    self.slot.clone()
  }

  pub fn stats(&self) -> Arc<StreamStats> {
    self.stats.clone()
  }

  fn open(&self) -> Option<Box<dyn StreamHandle>> {
    match self.connector.open(&self.address) {
      Ok(handle) => {
        info!("[{}] 视频流已打开", self.name);
        Some(handle)
      }
      Err(e) => {
        error!("[{}] 打开视频流失败: {}", self.name, e);
        None
      }
    }
  }

  /// 持续采集直到 `running` 被清除或 `wake` 的发送端被释放
  ///
  /// 每次读取失败都会释放连接、等待固定退避时间并重新打开；不会放弃，也不会延长退避。
  /// 连接句柄在本函数返回前释放。
  pub fn run(self, running: Arc<AtomicBool>, wake: Receiver<()>) {
    let mut handle = self.open();
    let mut failures = FailureCounter::new(self.escalation_threshold);

    while running.load(Ordering::Acquire) {
      let result = match handle.as_mut() {
        Some(handle) => handle.read_frame(),
        None => Err(StreamError::Unavailable("连接未建立".to_string())),
      };

      match result {
        Ok(image) => {
          if failures.consecutive() > 0 {
            info!(
              "[{}] 视频流恢复，此前连续失败 {} 次",
              self.name,
              failures.consecutive()
            );
          }
          failures.record_success();
          self.stats.consecutive_failures.store(0, Ordering::Release);
          self.stats.connected.store(true, Ordering::Release);
          self.stats.frames.fetch_add(1, Ordering::AcqRel);
          self.slot.publish(Frame::new(self.camera_id, image));
        }
        Err(e) => {
          let count = failures.record_failure();
          self.stats.consecutive_failures.store(count, Ordering::Release);
          self.stats.connected.store(false, Ordering::Release);
          warn!(
            "[{}] 采集失败 ({}/{}): {}",
            self.name, count, self.escalation_threshold, e
          );

          drop(handle.take());
          if wait_or_stop(&wake, self.backoff) {
            break;
          }
          if failures.is_escalated() {
            warn!("[{}] 连续失败 {} 次，尝试重新连接...", self.name, count);
          }
          handle = self.open();
          self.stats.reconnects.fetch_add(1, Ordering::AcqRel);
        }
      }
    }

    drop(handle);
    self.stats.connected.store(false, Ordering::Release);
    debug!("[{}] 采集线程退出", self.name);
  }
}

/// 等待退避时间；若期间收到停止信号返回 true
fn wait_or_stop(wake: &Receiver<()>, timeout: Duration) -> bool {
  !matches!(wake.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}
