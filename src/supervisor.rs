// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/supervisor.rs - 摄像头监管
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{error, info};

use crate::config::{CameraConfig, StreamSettings};
use crate::draw::Draw;
use crate::frame::{CameraId, Frame};
use crate::input::{FrameSlot, StreamConnector, StreamSource, StreamStats};

/// 摄像头当前状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraHealth {
  /// 尚未收到任何帧
  Waiting,
  Streaming,
  Reconnecting { failures: u32 },
}

/// 为单个摄像头运行采集线程，并按需提供最新帧
pub struct CameraSupervisor {
  camera: CameraConfig,
  slot: Arc<FrameSlot>,
  stats: Arc<StreamStats>,
  draw: Arc<Draw>,
  running: Arc<AtomicBool>,
  wake: Option<Sender<()>>,
  thread: Option<JoinHandle<()>>,
}

impl CameraSupervisor {
  pub fn start(
    camera: CameraConfig,
    connector: Arc<dyn StreamConnector>,
    settings: &StreamSettings,
    draw: Arc<Draw>,
  ) -> std::io::Result<Self> {
    let source = StreamSource::new(
      camera.id,
      camera.name.clone(),
      camera.address.clone(),
      connector,
      settings,
    );
    let slot = source.slot();
    let stats = source.stats();

    let running = Arc::new(AtomicBool::new(true));
    // 零容量通道只用于唤醒退避等待：释放发送端即可通知
    let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(0);

    let thread = {
      let running = running.clone();
      thread::Builder::new()
        .name(format!("camera-{}", camera.id))
        .spawn(move || source.run(running, wake_rx))?
    };
    info!("[{}] 采集线程已启动: {}", camera.name, camera.address);

    Ok(Self {
      camera,
      slot,
      stats,
      draw,
      running,
      wake: Some(wake_tx),
      thread: Some(thread),
    })
  }

  pub fn camera_id(&self) -> CameraId {
    self.camera.id
  }

  pub fn camera(&self) -> &CameraConfig {
    &self.camera
  }

  /// 最新帧的副本；尚无可用帧时返回带 "无连接" 标记的占位帧。不会阻塞在网络读取上
  pub fn read(&self) -> Frame {
    match self.slot.snapshot() {
      Some(frame) => frame,
      None => self.draw.placeholder(
        self.camera.id,
        &self.camera.name,
        self.camera.width(),
        self.camera.height(),
      ),
    }
  }

  /// 最新的真实帧副本，尚无帧时为 None
  pub fn latest(&self) -> Option<Frame> {
    self.slot.snapshot()
  }

  /// 是否已有真实帧（而非占位帧）
  pub fn has_frame(&self) -> bool {
    !self.slot.is_empty()
  }

  pub fn health(&self) -> CameraHealth {
    let failures = self.stats.consecutive_failures();
    if failures > 0 {
      CameraHealth::Reconnecting { failures }
    } else if self.stats.frames() == 0 {
      CameraHealth::Waiting
    } else {
      CameraHealth::Streaming
    }
  }

  pub fn frames_received(&self) -> u64 {
    self.stats.frames()
  }

  pub fn reconnects(&self) -> u64 {
    self.stats.reconnects()
  }

  /// 停止采集并等待线程退出，可重复调用
  pub fn stop(&mut self) {
    self.running.store(false, Ordering::Release);
    drop(self.wake.take());
    if let Some(thread) = self.thread.take() {
      if thread.join().is_err() {
        error!("[{}] 采集线程异常退出", self.camera.name);
      } else {
        info!("[{}] 采集线程已停止", self.camera.name);
      }
    }
  }
}

impl Drop for CameraSupervisor {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::{StreamError, StreamHandle};
  use crate::region::Polygon;
  use image::RgbImage;
  use std::time::{Duration, Instant};

  struct SolidHandle;

  impl StreamHandle for SolidHandle {
    fn read_frame(&mut self) -> Result<RgbImage, StreamError> {
      thread::sleep(Duration::from_millis(2));
      Ok(RgbImage::from_pixel(16, 8, image::Rgb([0, 200, 0])))
    }
  }

  struct SolidConnector;

  impl StreamConnector for SolidConnector {
    fn open(&self, _address: &str) -> Result<Box<dyn StreamHandle>, StreamError> {
      Ok(Box::new(SolidHandle))
    }
  }

  struct DeadConnector;

  impl StreamConnector for DeadConnector {
    fn open(&self, _address: &str) -> Result<Box<dyn StreamHandle>, StreamError> {
      Err(StreamError::Unavailable("no route to host".to_string()))
    }
  }

  fn camera(id: CameraId) -> CameraConfig {
    CameraConfig {
      id,
      name: format!("Cam {}", id),
      address: "mock://".to_string(),
      resolution: [96, 54],
      region: Polygon::try_from(vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]).unwrap(),
    }
  }

  fn settings() -> StreamSettings {
    StreamSettings {
      reconnect_backoff_ms: 5,
      escalation_threshold: 5,
    }
  }

  #[test]
  fn test_placeholder_when_unreachable() {
    let mut supervisor = CameraSupervisor::start(
      camera(4),
      Arc::new(DeadConnector),
      &settings(),
      Arc::new(Draw::default()),
    )
    .unwrap();

    let frame = supervisor.read();
    assert_eq!(frame.camera_id, 4);
    assert_eq!((frame.width(), frame.height()), (96, 54));
    assert!(!supervisor.has_frame());
    assert_ne!(supervisor.health(), CameraHealth::Streaming);

    supervisor.stop();
    supervisor.stop();
  }

  #[test]
  fn test_streams_latest_frame() {
    let mut supervisor = CameraSupervisor::start(
      camera(1),
      Arc::new(SolidConnector),
      &settings(),
      Arc::new(Draw::default()),
    )
    .unwrap();

    let start = Instant::now();
    while !supervisor.has_frame() && start.elapsed() < Duration::from_secs(5) {
      thread::sleep(Duration::from_millis(5));
    }

    let frame = supervisor.read();
    assert_eq!((frame.width(), frame.height()), (16, 8));
    assert_eq!(frame.image.get_pixel(3, 3).0, [0, 200, 0]);
    assert_eq!(supervisor.health(), CameraHealth::Streaming);
    assert!(supervisor.frames_received() >= 1);
    supervisor.stop();
  }
}
