// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/pipeline.rs - 采集、检测、提取流水线
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

//! 流水线把各部分连起来：
//!
//! ```text
//! CameraSupervisor --帧--> DetectionScheduler --任务--> 队列 --> ExtractionWorker --> Ledger
//! ```
//!
//! 每个摄像头一个采集线程，一个提取线程；调度器在调用方线程上通过 [`Pipeline::tick`] 同步运行。
//! 停止顺序：先停止并回收所有摄像头，再投递停止信号并等待提取线程处理完队列。

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::Sender;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactError, ArtifactStore};
use crate::config::{ConfigError, PipelineConfig};
use crate::draw::Draw;
use crate::extraction::Extractor;
use crate::frame::{CameraId, Frame};
use crate::input::StreamConnector;
use crate::ledger::{CarRecord, Ledger, LedgerError, PlateRecord};
use crate::model::{DetectResult, Model};
use crate::scheduler::{DetectionScheduler, SchedulerError, TickOutcome};
use crate::supervisor::{CameraHealth, CameraSupervisor};
use crate::worker::{AttemptCounter, ExtractionWorker, WorkerMessage, WorkerSummary};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("产物目录错误: {0}")]
  ArtifactError(#[from] ArtifactError),
  #[error("记录文件错误: {0}")]
  LedgerError(#[from] LedgerError),
  #[error("线程创建失败: {0}")]
  SpawnError(#[from] std::io::Error),
  #[error("提取线程异常退出")]
  WorkerPanicked,
}

/// 一次 tick 中各摄像头的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
  pub fired: usize,
  pub skipped: usize,
  pub no_qualifying: usize,
  /// 尚无真实帧，未参与检测
  pub offline: usize,
  pub errors: usize,
}

struct CameraLane {
  supervisor: CameraSupervisor,
  scheduler: DetectionScheduler,
}

pub struct Pipeline {
  lanes: Vec<CameraLane>,
  queue: Option<Sender<WorkerMessage>>,
  worker: Option<JoinHandle<WorkerSummary>>,
}

impl Pipeline {
  pub fn start<E: Extractor + 'static>(
    config: &PipelineConfig,
    connector: Arc<dyn StreamConnector>,
    extractor: E,
    draw: Arc<Draw>,
  ) -> Result<Self, PipelineError> {
    config.validate()?;

    let store = ArtifactStore::open(
      &config.extraction.artifact_dir,
      config.extraction.artifact_extension.clone(),
    )?;
    let plates = Ledger::<PlateRecord>::open(&config.ledger.plates)?;
    let cars = config
      .ledger
      .cars
      .as_ref()
      .map(|path| Ledger::<CarRecord>::open(path))
      .transpose()?;
    info!("产物目录: {}", store.directory().display());
    info!("车牌记录: {}", plates.path().display());

    let (tx, rx) = crossbeam_channel::unbounded();
    let worker = ExtractionWorker::new(
      extractor,
      store,
      plates,
      cars,
      AttemptCounter::new(
        config.extraction.max_attempts,
        config.extraction.attempt_retention(),
      ),
    )
    .spawn(rx)?;

    let mut lanes = Vec::with_capacity(config.cameras.len());
    for camera in &config.cameras {
      let supervisor =
        CameraSupervisor::start(camera.clone(), connector.clone(), &config.stream, draw.clone())?;
      let scheduler = DetectionScheduler::new(camera.clone(), config.detection.clone());
      lanes.push(CameraLane {
        supervisor,
        scheduler,
      });
    }
    info!("流水线已启动，共 {} 路摄像头", lanes.len());

    Ok(Self {
      lanes,
      queue: Some(tx),
      worker: Some(worker),
    })
  }

  pub fn supervisors(&self) -> impl Iterator<Item = &CameraSupervisor> {
    self.lanes.iter().map(|lane| &lane.supervisor)
  }

  /// 当前画面（无连接时为占位帧）
  pub fn read(&self, camera_id: CameraId) -> Option<Frame> {
    self
      .lanes
      .iter()
      .find(|lane| lane.supervisor.camera_id() == camera_id)
      .map(|lane| lane.supervisor.read())
  }

  pub fn health(&self) -> Vec<(CameraId, CameraHealth)> {
    self
      .supervisors()
      .map(|s| (s.camera_id(), s.health()))
      .collect()
  }

  /// 对每个摄像头读取最新帧并运行一次调度
  pub fn tick<M>(&mut self, model: &M, now: Instant) -> TickReport
  where
    M: Model<Input = RgbImage, Output = DetectResult>,
    M::Error: std::fmt::Display,
  {
    let mut report = TickReport::default();
    let Some(queue) = self.queue.as_ref() else {
      return report;
    };

    for lane in self.lanes.iter_mut() {
      let Some(frame) = lane.supervisor.latest() else {
        report.offline += 1;
        continue;
      };
      match lane.scheduler.tick(&frame, now, model, queue) {
        Ok(TickOutcome::Fired { .. }) => report.fired += 1,
        Ok(TickOutcome::Skipped) => report.skipped += 1,
        Ok(TickOutcome::NoQualifying) => report.no_qualifying += 1,
        Err(e @ SchedulerError::Inference(_)) => {
          warn!("[{}] {}", lane.scheduler.camera().name, e);
          report.errors += 1;
        }
        Err(e @ SchedulerError::QueueClosed) => {
          error!("[{}] {}", lane.scheduler.camera().name, e);
          report.errors += 1;
        }
      }
    }
    report
  }

  /// 停止所有摄像头，等待提取线程处理完已入队的任务
  pub fn shutdown(mut self) -> Result<WorkerSummary, PipelineError> {
    self.stop()
  }

  fn stop(&mut self) -> Result<WorkerSummary, PipelineError> {
    for lane in self.lanes.iter_mut() {
      lane.supervisor.stop();
    }

    if let Some(queue) = self.queue.take() {
      if queue.send(WorkerMessage::Shutdown).is_err() {
        warn!("提取线程已提前退出");
      }
    }

    match self.worker.take() {
      Some(worker) => worker.join().map_err(|_| PipelineError::WorkerPanicked),
      None => Ok(WorkerSummary::default()),
    }
  }
}

impl Drop for Pipeline {
  fn drop(&mut self) {
    if let Err(e) = self.stop() {
      error!("流水线停止失败: {}", e);
    }
  }
}
