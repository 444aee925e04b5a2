// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/task.rs - 流水线驱动循环
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

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use std::thread;

use image::RgbImage;
use tracing::{info, warn};

use crate::frame::CameraId;
use crate::model::{DetectResult, Model};
use crate::pipeline::Pipeline;
use crate::supervisor::CameraHealth;
use crate::worker::WorkerSummary;

pub trait Task<M>: Sized {
  type Error;
  fn run_task(self, pipeline: Pipeline, model: M) -> Result<WorkerSummary, Self::Error>;
}

/// 按固定周期驱动流水线，直到收到 Ctrl-C 或达到指定 tick 数
#[derive(Debug)]
pub struct ContinuousTask {
  tick_interval: Duration,
  max_ticks: Option<usize>,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      tick_interval: Duration::from_millis(30),
      max_ticks: None,
    }
  }
}

impl ContinuousTask {
  pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
    self.tick_interval = tick_interval;
    self
  }

  pub fn with_max_ticks(mut self, max_ticks: Option<usize>) -> Self {
    self.max_ticks = max_ticks;
    self
  }
}

fn install_interrupt_handler() -> Option<Receiver<()>> {
  let (tx, rx) = mpsc::channel();
  let installed = ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  });
  match installed {
    Ok(()) => Some(rx),
    Err(e) => {
      warn!("无法设置 Ctrl-C 处理函数: {}", e);
      None
    }
  }
}

fn log_health_changes(pipeline: &Pipeline, last: &mut HashMap<CameraId, CameraHealth>) {
  for (camera_id, health) in pipeline.health() {
    if last.insert(camera_id, health) != Some(health) {
      match health {
        CameraHealth::Streaming => info!("摄像头 {} 正在传输", camera_id),
        CameraHealth::Waiting => info!("摄像头 {} 等待首帧", camera_id),
        CameraHealth::Reconnecting { failures } => {
          warn!("摄像头 {} 重连中，连续失败 {} 次", camera_id, failures)
        }
      }
    }
  }
}

impl<M> Task<M> for ContinuousTask
where
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, mut pipeline: Pipeline, model: M) -> Result<WorkerSummary, Self::Error> {
    info!("开始任务...");
    let interrupt = install_interrupt_handler();

    let mut tick_index = 0usize;
    let mut fired = 0usize;
    let mut health = HashMap::new();
    loop {
      let started = Instant::now();
      let report = pipeline.tick(&model, started);
      fired += report.fired;
      tick_index += 1;
      log_health_changes(&pipeline, &mut health);

      if self.max_ticks.is_some_and(|n| tick_index >= n) {
        info!("达到指定 tick 数 {}, 退出任务循环", tick_index);
        break;
      }
      if interrupt.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      let elapsed = started.elapsed();
      if elapsed < self.tick_interval {
        thread::sleep(self.tick_interval - elapsed);
      }
    }

    info!("共提交 {} 个提取任务，等待提取线程结束...", fired);
    let summary = pipeline.shutdown()?;
    info!("任务完成，退出");
    Ok(summary)
  }
}
