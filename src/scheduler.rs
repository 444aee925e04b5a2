// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/scheduler.rs - 检测调度
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

//! 每个摄像头一个调度器：限制推理频率，按类别、置信度和区域过滤检测结果，
//! 每个合格的 tick 至多产生一个提取任务。

use std::time::Instant;

use chrono::Local;
use crossbeam_channel::Sender;
use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{CameraConfig, DetectionSettings};
use crate::frame::Frame;
use crate::model::{DetectItem, DetectResult, Model};
use crate::region::BoundingBox;
use crate::worker::{ExtractionJob, WorkerMessage};

#[derive(Error, Debug)]
pub enum SchedulerError {
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("任务队列已关闭")]
  QueueClosed,
}

/// 一次 tick 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
  /// 距上次触发不足间隔，未推理
  Skipped,
  /// 已推理，但没有合格的检测
  NoQualifying,
  /// 已入队一个提取任务
  Fired { bbox: BoundingBox },
}

pub struct DetectionScheduler {
  camera: CameraConfig,
  settings: DetectionSettings,
  last_fire: Option<Instant>,
}

impl DetectionScheduler {
  pub fn new(camera: CameraConfig, settings: DetectionSettings) -> Self {
    Self {
      camera,
      settings,
      last_fire: None,
    }
  }

  pub fn camera(&self) -> &CameraConfig {
    &self.camera
  }

  pub fn last_fire(&self) -> Option<Instant> {
    self.last_fire
  }

  fn is_due(&self, now: Instant) -> bool {
    match self.last_fire {
      Some(last) => now.saturating_duration_since(last) >= self.settings.interval(),
      None => true,
    }
  }

  pub fn tick<M>(
    &mut self,
    frame: &Frame,
    now: Instant,
    model: &M,
    queue: &Sender<WorkerMessage>,
  ) -> Result<TickOutcome, SchedulerError>
  where
    M: Model<Input = RgbImage, Output = DetectResult>,
    M::Error: std::fmt::Display,
  {
    if !self.is_due(now) {
      return Ok(TickOutcome::Skipped);
    }

    let [work_w, work_h] = self.settings.working_resolution;
    let resized = image::imageops::resize(&frame.image, work_w, work_h, FilterType::Triangle);
    let result = model
      .infer(&resized)
      .map_err(|e| SchedulerError::Inference(e.to_string()))?;

    let scale_x = frame.width() as f64 / work_w as f64;
    let scale_y = frame.height() as f64 / work_h as f64;

    let Some(bbox) = result
      .items
      .iter()
      .filter(|item| self.is_target(item))
      .map(|item| rescale(item, scale_x, scale_y))
      .find(|bbox| bbox.is_center_inside(&self.camera.region))
    else {
      debug!("[{}] 本次检测无合格目标", self.camera.name);
      return Ok(TickOutcome::NoQualifying);
    };

    let job = ExtractionJob {
      camera_id: self.camera.id,
      camera_label: self.camera.name.clone(),
      frame: frame.clone(),
      bbox,
      created_at: Local::now(),
    };
    queue
      .send(WorkerMessage::Job(job))
      .map_err(|_| SchedulerError::QueueClosed)?;
    self.last_fire = Some(now);

    info!(
      "[{}] 区域内检测到车辆 ({}, {}, {}, {})，已提交提取任务",
      self.camera.name, bbox.x1, bbox.y1, bbox.x2, bbox.y2
    );
    Ok(TickOutcome::Fired { bbox })
  }

  fn is_target(&self, item: &DetectItem) -> bool {
    item.class_id == self.settings.target_class && item.score > self.settings.confidence_threshold
  }
}

/// 把工作分辨率下的框换算回原始帧像素（截断取整）
fn rescale(item: &DetectItem, scale_x: f64, scale_y: f64) -> BoundingBox {
  let [x1, y1, x2, y2] = item.bbox;
  BoundingBox::new(
    (x1 as f64 * scale_x) as i32,
    (y1 as f64 * scale_y) as i32,
    (x2 as f64 * scale_x) as i32,
    (y2 as f64 * scale_y) as i32,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::Polygon;
  use std::cell::Cell;
  use std::time::Duration;

  struct FixedModel {
    items: Vec<DetectItem>,
    calls: Cell<usize>,
    last_input: Cell<(u32, u32)>,
  }

  impl FixedModel {
    fn new(items: Vec<DetectItem>) -> Self {
      Self {
        items,
        calls: Cell::new(0),
        last_input: Cell::new((0, 0)),
      }
    }
  }

  impl Model for FixedModel {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, input: &RgbImage) -> Result<DetectResult, String> {
      self.calls.set(self.calls.get() + 1);
      self.last_input.set((input.width(), input.height()));
      Ok(DetectResult::from(self.items.clone()))
    }
  }

  struct FailingModel;

  impl Model for FailingModel {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
      Err("npu busy".to_string())
    }
  }

  fn car(score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id: 2,
      score,
      bbox,
    }
  }

  fn scheduler() -> DetectionScheduler {
    // 帧 1280x960，工作分辨率 640x480，缩放系数 2
    let camera = CameraConfig {
      id: 1,
      name: "Cam 1".to_string(),
      address: "mock://".to_string(),
      resolution: [1280, 960],
      region: Polygon::try_from(vec![[200.0, 200.0], [1000.0, 200.0], [1000.0, 800.0], [200.0, 800.0]])
        .unwrap(),
    };
    DetectionScheduler::new(camera, DetectionSettings::default())
  }

  fn frame() -> Frame {
    Frame::blank(1, 1280, 960)
  }

  #[test]
  fn test_fires_then_skips_within_interval() {
    let mut scheduler = scheduler();
    let model = FixedModel::new(vec![car(0.9, [200.0, 200.0, 300.0, 300.0])]);
    let (tx, rx) = crossbeam_channel::unbounded();
    let t0 = Instant::now();

    let outcome = scheduler.tick(&frame(), t0, &model, &tx).unwrap();
    assert_eq!(
      outcome,
      TickOutcome::Fired {
        bbox: BoundingBox::new(400, 400, 600, 600)
      }
    );
    assert_eq!(model.last_input.get(), (640, 480));

    let outcome = scheduler
      .tick(&frame(), t0 + Duration::from_secs(3), &model, &tx)
      .unwrap();
    assert_eq!(outcome, TickOutcome::Skipped);
    assert_eq!(model.calls.get(), 1);

    let outcome = scheduler
      .tick(&frame(), t0 + Duration::from_secs(6), &model, &tx)
      .unwrap();
    assert!(matches!(outcome, TickOutcome::Fired { .. }));
    assert_eq!(model.calls.get(), 2);
    assert_eq!(rx.len(), 2);
  }

  #[test]
  fn test_non_qualifying_tick_does_not_advance_last_fire() {
    let mut scheduler = scheduler();
    let (tx, rx) = crossbeam_channel::unbounded();
    let t0 = Instant::now();

    // 置信度不足、类别不符、中心在区域外
    let model = FixedModel::new(vec![
      car(0.4, [200.0, 200.0, 300.0, 300.0]),
      DetectItem {
        class_id: 7,
        score: 0.95,
        bbox: [200.0, 200.0, 300.0, 300.0],
      },
      car(0.9, [0.0, 0.0, 50.0, 50.0]),
    ]);
    assert_eq!(
      scheduler.tick(&frame(), t0, &model, &tx).unwrap(),
      TickOutcome::NoQualifying
    );
    assert!(scheduler.last_fire().is_none());

    // 下一个 tick 立即重新评估
    let t1 = t0 + Duration::from_millis(30);
    let model = FixedModel::new(vec![car(0.41, [200.0, 200.0, 300.0, 300.0])]);
    assert!(matches!(
      scheduler.tick(&frame(), t1, &model, &tx).unwrap(),
      TickOutcome::Fired { .. }
    ));
    assert_eq!(scheduler.last_fire(), Some(t1));
    assert_eq!(rx.len(), 1);
  }

  #[test]
  fn test_only_first_qualifying_detection_is_enqueued() {
    let mut scheduler = scheduler();
    let (tx, rx) = crossbeam_channel::unbounded();
    let model = FixedModel::new(vec![
      car(0.8, [0.0, 0.0, 40.0, 40.0]),
      car(0.8, [150.0, 150.0, 250.0, 250.0]),
      car(0.9, [300.0, 200.0, 400.0, 300.0]),
    ]);

    scheduler.tick(&frame(), Instant::now(), &model, &tx).unwrap();
    assert_eq!(rx.len(), 1);
    match rx.try_recv().unwrap() {
      WorkerMessage::Job(job) => {
        assert_eq!(job.bbox, BoundingBox::new(300, 300, 500, 500));
        assert_eq!(job.camera_id, 1);
        assert_eq!(job.camera_label, "Cam 1");
        assert_eq!(job.frame.width(), 1280);
      }
      WorkerMessage::Shutdown => panic!("unexpected sentinel"),
    }
  }

  #[test]
  fn test_inference_error_leaves_state_unchanged() {
    let mut scheduler = scheduler();
    let (tx, rx) = crossbeam_channel::unbounded();
    let result = scheduler.tick(&frame(), Instant::now(), &FailingModel, &tx);
    assert!(matches!(result, Err(SchedulerError::Inference(_))));
    assert!(scheduler.last_fire().is_none());
    assert!(rx.is_empty());
  }

  #[test]
  fn test_closed_queue_is_reported() {
    let mut scheduler = scheduler();
    let (tx, rx) = crossbeam_channel::unbounded();
    drop(rx);
    let model = FixedModel::new(vec![car(0.9, [200.0, 200.0, 300.0, 300.0])]);
    assert!(matches!(
      scheduler.tick(&frame(), Instant::now(), &model, &tx),
      Err(SchedulerError::QueueClosed)
    ));
    assert!(scheduler.last_fire().is_none());
  }

  #[test]
  fn test_rescale_truncates() {
    let item = car(0.9, [10.7, 20.2, 30.9, 40.5]);
    assert_eq!(rescale(&item, 2.0, 1.5), BoundingBox::new(21, 30, 61, 60));
  }
}
