// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/worker.rs - 车牌提取工作线程
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

//! 单一消费者，严格按入队顺序逐个处理：
//! 裁剪 → 增强 → 保存产物 → 车辆记录 → 尝试次数检查 → 识别 → 车牌记录。

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::artifact::{Artifact, ArtifactId, ArtifactStore};
use crate::enhance::Enhancer;
use crate::extraction::Extractor;
use crate::frame::{CameraId, Frame};
use crate::ledger::{CarRecord, Ledger, PlateRecord};
use crate::region::BoundingBox;

/// 调度器交给工作线程的任务，帧为未标注的完整副本
#[derive(Debug, Clone)]
pub struct ExtractionJob {
  pub camera_id: CameraId,
  pub camera_label: String,
  pub frame: Frame,
  pub bbox: BoundingBox,
  pub created_at: DateTime<Local>,
}

#[derive(Debug)]
pub enum WorkerMessage {
  Job(ExtractionJob),
  /// 处理完此前所有任务后退出
  Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
  /// 第 n 次尝试
  Proceed(u32),
  /// 超过最大尝试次数
  Exhausted,
  /// 已经识别出车牌
  Settled,
  /// 早于保留窗口，无从判断是否尝试过
  Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
  Tried(u32),
  Exhausted,
  Settled,
}

#[derive(Debug)]
struct AttemptEntry {
  state: AttemptState,
  /// 产物时间戳（秒）
  stamp: i64,
}

/// 每个产物的识别尝试次数
///
/// 放弃或识别成功的产物在保留窗口内不会再尝试。窗口以见过的最新任务时间为准，
/// 早于窗口的记录被清除，早于窗口的任务也一律放弃，因此清除不会让同一产物重新获得尝试次数。
#[derive(Debug)]
pub struct AttemptCounter {
  max_attempts: u32,
  retention_s: i64,
  newest: Option<i64>,
  entries: HashMap<ArtifactId, AttemptEntry>,
}

impl AttemptCounter {
  pub fn new(max_attempts: u32, retention: Duration) -> Self {
    Self {
      max_attempts,
      retention_s: i64::try_from(retention.as_secs()).unwrap_or(i64::MAX),
      newest: None,
      entries: HashMap::new(),
    }
  }

  fn oldest_kept(&self) -> Option<i64> {
    self.newest.map(|newest| newest.saturating_sub(self.retention_s))
  }

  /// 不计数地检查产物是否已经结束；用于在保存产物之前跳过重复任务
  pub fn check(&self, id: &ArtifactId, created_at: &DateTime<Local>) -> Option<AttemptDecision> {
    if self
      .oldest_kept()
      .is_some_and(|oldest| created_at.timestamp() < oldest)
    {
      return Some(AttemptDecision::Expired);
    }
    match self.entries.get(id).map(|entry| entry.state) {
      Some(AttemptState::Exhausted) => Some(AttemptDecision::Exhausted),
      Some(AttemptState::Settled) => Some(AttemptDecision::Settled),
      _ => None,
    }
  }

  pub fn begin_attempt(&mut self, id: &ArtifactId, created_at: &DateTime<Local>) -> AttemptDecision {
    if let Some(decision) = self.check(id, created_at) {
      return decision;
    }
    let stamp = created_at.timestamp();
    self.advance(stamp);

    let max_attempts = self.max_attempts;
    let entry = self.entries.entry(id.clone()).or_insert(AttemptEntry {
      state: AttemptState::Tried(0),
      stamp,
    });
    let count = match entry.state {
      AttemptState::Tried(n) => n + 1,
      AttemptState::Exhausted => return AttemptDecision::Exhausted,
      AttemptState::Settled => return AttemptDecision::Settled,
    };
    if count > max_attempts {
      entry.state = AttemptState::Exhausted;
      AttemptDecision::Exhausted
    } else {
      entry.state = AttemptState::Tried(count);
      AttemptDecision::Proceed(count)
    }
  }

  pub fn succeed(&mut self, id: &ArtifactId) {
    if let Some(entry) = self.entries.get_mut(id) {
      entry.state = AttemptState::Settled;
    }
  }

  fn advance(&mut self, stamp: i64) {
    if self.newest.is_some_and(|newest| newest >= stamp) {
      return;
    }
    self.newest = Some(stamp);
    if let Some(oldest) = self.oldest_kept() {
      self.entries.retain(|_, entry| entry.stamp >= oldest);
    }
  }

  /// 进行中的尝试次数，已结束或未记录的产物为 0
  pub fn attempts(&self, id: &ArtifactId) -> u32 {
    match self.entries.get(id).map(|entry| entry.state) {
      Some(AttemptState::Tried(n)) => n,
      _ => 0,
    }
  }

  pub fn is_exhausted(&self, id: &ArtifactId) -> bool {
    self
      .entries
      .get(id)
      .is_some_and(|entry| entry.state == AttemptState::Exhausted)
  }

  pub fn is_settled(&self, id: &ArtifactId) -> bool {
    self
      .entries
      .get(id)
      .is_some_and(|entry| entry.state == AttemptState::Settled)
  }

  /// 当前保留的记录数
  pub fn tracked(&self) -> usize {
    self.entries.len()
  }
}

/// 工作线程退出时的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
  pub jobs: u64,
  pub plates: u64,
  pub empty_results: u64,
  pub extraction_errors: u64,
  pub abandoned: u64,
  /// 已识别过车牌的重复任务
  pub duplicates: u64,
  pub empty_crops: u64,
  pub persistence_failures: u64,
}

pub struct ExtractionWorker<E> {
  extractor: E,
  enhancer: Enhancer,
  store: ArtifactStore,
  plates: Ledger<PlateRecord>,
  cars: Option<Ledger<CarRecord>>,
  attempts: AttemptCounter,
  summary: WorkerSummary,
}

impl<E: Extractor> ExtractionWorker<E> {
  pub fn new(
    extractor: E,
    store: ArtifactStore,
    plates: Ledger<PlateRecord>,
    cars: Option<Ledger<CarRecord>>,
    attempts: AttemptCounter,
  ) -> Self {
    Self {
      extractor,
      enhancer: Enhancer::default(),
      store,
      plates,
      cars,
      attempts,
      summary: WorkerSummary::default(),
    }
  }

  /// 消费队列直到收到 `Shutdown` 或所有发送端关闭
  pub fn run(mut self, queue: Receiver<WorkerMessage>) -> WorkerSummary {
    info!("提取线程已启动");
    loop {
      match queue.recv() {
        Ok(WorkerMessage::Job(job)) => self.process(job),
        Ok(WorkerMessage::Shutdown) => {
          info!("收到停止信号，提取线程退出");
          break;
        }
        Err(_) => {
          warn!("任务队列已断开，提取线程退出");
          break;
        }
      }
    }
    self.extractor.shutdown();
    info!("提取统计: {:?}", self.summary);
    self.summary
  }

  pub fn process(&mut self, job: ExtractionJob) {
    self.summary.jobs += 1;

    let id = ArtifactId::new(job.camera_id, &job.created_at);
    if let Some(decision) = self.attempts.check(&id, &job.created_at) {
      self.skip(&job.camera_label, &id, decision);
      return;
    }

    let Some(artifact) = self.persist(&job, id) else {
      return;
    };

    if let Some(cars) = &self.cars {
      let record = CarRecord::new(&job.camera_label, artifact.file_name(), &job.created_at);
      if let Err(e) = cars.append(&record) {
        error!("写入车辆记录失败: {}", e);
        self.summary.persistence_failures += 1;
      }
    }

    let attempt = match self.attempts.begin_attempt(&artifact.id, &job.created_at) {
      AttemptDecision::Proceed(n) => n,
      decision => {
        self.skip(&job.camera_label, &artifact.id, decision);
        return;
      }
    };

    debug!("[{}] 第 {} 次识别 {}", job.camera_label, attempt, artifact.id);
    match self.extractor.extract(&artifact) {
      Ok(Some(plate)) if !plate.trim().is_empty() => {
        let plate = plate.trim();
        info!("[{}] 识别到车牌: {} ({})", job.camera_label, plate, artifact.id);
        self.attempts.succeed(&artifact.id);
        self.summary.plates += 1;
        if let Err(e) = self.plates.append(&PlateRecord::new(plate, &Local::now())) {
          error!("写入车牌记录失败: {}", e);
          self.summary.persistence_failures += 1;
        }
      }
      Ok(_) => {
        info!("[{}] 未识别到车牌: {}", job.camera_label, artifact.id);
        self.summary.empty_results += 1;
      }
      Err(e) => {
        error!("[{}] 识别失败，丢弃 {}: {}", job.camera_label, artifact.id, e);
        self.summary.extraction_errors += 1;
      }
    }
  }

  fn skip(&mut self, camera_label: &str, id: &ArtifactId, decision: AttemptDecision) {
    match decision {
      AttemptDecision::Exhausted => {
        warn!("[{}] 已达到最大尝试次数，放弃产物 {}", camera_label, id);
        self.summary.abandoned += 1;
      }
      AttemptDecision::Expired => {
        warn!("[{}] 任务早于尝试记录保留窗口，放弃产物 {}", camera_label, id);
        self.summary.abandoned += 1;
      }
      AttemptDecision::Settled => {
        info!("[{}] 产物 {} 已识别过车牌，跳过", camera_label, id);
        self.summary.duplicates += 1;
      }
      AttemptDecision::Proceed(_) => {}
    }
  }

  fn persist(&mut self, job: &ExtractionJob, id: ArtifactId) -> Option<Artifact> {
    let Some((x, y, w, h)) = job.bbox.clamp_to(job.frame.width(), job.frame.height()) else {
      warn!(
        "[{}] 检测框 {:?} 与画面无交集，丢弃任务",
        job.camera_label, job.bbox
      );
      self.summary.empty_crops += 1;
      return None;
    };

    let crop = image::imageops::crop_imm(&job.frame.image, x, y, w, h).to_image();
    let enhanced = self.enhancer.enhance(&crop);

    match self.store.save(id, &enhanced) {
      Ok(artifact) => Some(artifact),
      Err(e) => {
        error!("[{}] 保存产物失败: {}", job.camera_label, e);
        self.summary.persistence_failures += 1;
        None
      }
    }
  }
}

impl<E: Extractor + 'static> ExtractionWorker<E> {
  pub fn spawn(self, queue: Receiver<WorkerMessage>) -> std::io::Result<JoinHandle<WorkerSummary>> {
    thread::Builder::new()
      .name("extraction".to_string())
      .spawn(move || self.run(queue))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::extraction::ExtractionError;
  use chrono::TimeZone;
  use std::collections::VecDeque;
  use std::path::PathBuf;
  use std::sync::{Arc, Mutex};

  type Script = Arc<Mutex<VecDeque<Result<Option<String>, ExtractionError>>>>;

  /// 按脚本返回识别结果并记录调用过的产物
  struct ScriptedExtractor {
    script: Script,
    calls: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
  }

  impl Extractor for ScriptedExtractor {
    fn extract(&mut self, artifact: &Artifact) -> Result<Option<String>, ExtractionError> {
      self.calls.lock().unwrap().push(artifact.id.to_string());
      self.script.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    fn shutdown(&mut self) {
      *self.closed.lock().unwrap() = true;
    }
  }

  struct Fixture {
    dir: PathBuf,
    calls: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
    worker: ExtractionWorker<ScriptedExtractor>,
  }

  fn fixture(name: &str, script: Vec<Result<Option<String>, ExtractionError>>) -> Fixture {
    let dir = std::env::temp_dir().join(format!("chepai-worker-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(false));
    let extractor = ScriptedExtractor {
      script: Arc::new(Mutex::new(script.into())),
      calls: calls.clone(),
      closed: closed.clone(),
    };
    let worker = ExtractionWorker::new(
      extractor,
      ArtifactStore::open(dir.join("artifacts"), "png").unwrap(),
      Ledger::open(dir.join("plates.csv")).unwrap(),
      Some(Ledger::open(dir.join("cars.csv")).unwrap()),
      AttemptCounter::new(2, Duration::from_secs(600)),
    );
    Fixture {
      dir,
      calls,
      closed,
      worker,
    }
  }

  fn job(camera_id: CameraId, second: u32) -> ExtractionJob {
    ExtractionJob {
      camera_id,
      camera_label: format!("Cam {}", camera_id),
      frame: Frame::blank(camera_id, 64, 48),
      bbox: BoundingBox::new(8, 8, 40, 32),
      created_at: Local.with_ymd_and_hms(2026, 2, 1, 8, 0, second).unwrap(),
    }
  }

  fn at(minute: u32, second: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 2, 1, 8, minute, second).unwrap()
  }

  fn id(camera_id: CameraId, second: u32) -> ArtifactId {
    ArtifactId::new(camera_id, &at(0, second))
  }

  #[test]
  fn test_attempt_counter_bounded() {
    let mut counter = AttemptCounter::new(2, Duration::from_secs(600));
    let a = id(1, 0);
    let t = at(0, 0);
    assert_eq!(counter.begin_attempt(&a, &t), AttemptDecision::Proceed(1));
    assert_eq!(counter.attempts(&a), 1);
    assert_eq!(counter.begin_attempt(&a, &t), AttemptDecision::Proceed(2));
    assert_eq!(counter.begin_attempt(&a, &t), AttemptDecision::Exhausted);
    assert!(counter.is_exhausted(&a));
    assert_eq!(counter.attempts(&a), 0);
    // 放弃后不再尝试
    assert_eq!(counter.begin_attempt(&a, &t), AttemptDecision::Exhausted);
  }

  #[test]
  fn test_attempt_counter_success_is_terminal() {
    let mut counter = AttemptCounter::new(2, Duration::from_secs(600));
    let a = id(1, 0);
    let t = at(0, 0);
    assert_eq!(counter.begin_attempt(&a, &t), AttemptDecision::Proceed(1));
    counter.succeed(&a);
    assert_eq!(counter.attempts(&a), 0);
    assert!(counter.is_settled(&a));
    assert!(!counter.is_exhausted(&a));
    assert_eq!(counter.check(&a, &t), Some(AttemptDecision::Settled));
    assert_eq!(counter.begin_attempt(&a, &t), AttemptDecision::Settled);
  }

  #[test]
  fn test_attempt_counter_evicts_old_entries() {
    let mut counter = AttemptCounter::new(2, Duration::from_secs(60));
    let empty = id(1, 0);
    let done = id(1, 5);
    assert_eq!(counter.begin_attempt(&empty, &at(0, 0)), AttemptDecision::Proceed(1));
    counter.begin_attempt(&done, &at(0, 5));
    counter.begin_attempt(&done, &at(0, 5));
    assert_eq!(counter.begin_attempt(&done, &at(0, 5)), AttemptDecision::Exhausted);

    // 窗口内记录保留
    let recent = ArtifactId::new(1, &at(0, 50));
    counter.begin_attempt(&recent, &at(0, 50));
    assert_eq!(counter.tracked(), 3);

    // 最新任务推进到 08:02:00，两分钟前的记录被清除
    let newest = ArtifactId::new(1, &at(2, 0));
    assert_eq!(counter.begin_attempt(&newest, &at(2, 0)), AttemptDecision::Proceed(1));
    assert_eq!(counter.tracked(), 1);

    // 清除后重复提交也不会重新获得尝试次数
    assert_eq!(counter.begin_attempt(&empty, &at(0, 0)), AttemptDecision::Expired);
    assert_eq!(counter.begin_attempt(&done, &at(0, 5)), AttemptDecision::Expired);
    assert_eq!(counter.attempts(&empty), 0);

    // 仍在窗口内的产物照常计数
    assert_eq!(counter.begin_attempt(&newest, &at(2, 0)), AttemptDecision::Proceed(2));
    assert_eq!(counter.begin_attempt(&newest, &at(2, 0)), AttemptDecision::Exhausted);
  }

  #[test]
  fn test_drains_jobs_before_shutdown() {
    let f = fixture("drain", vec![Ok(Some("ABC1D23".to_string())), Ok(None)]);
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(WorkerMessage::Job(job(1, 1))).unwrap();
    tx.send(WorkerMessage::Job(job(2, 2))).unwrap();
    tx.send(WorkerMessage::Shutdown).unwrap();
    tx.send(WorkerMessage::Job(job(3, 3))).unwrap();

    let summary = f.worker.run(rx);
    assert_eq!(summary.jobs, 2);
    assert_eq!(summary.plates, 1);
    assert_eq!(summary.empty_results, 1);
    assert_eq!(
      *f.calls.lock().unwrap(),
      vec![id(1, 1).to_string(), id(2, 2).to_string()]
    );
    assert!(*f.closed.lock().unwrap());

    let plates = std::fs::read_to_string(f.dir.join("plates.csv")).unwrap();
    let lines: Vec<&str> = plates.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "Date,Time,Plate");
    assert!(lines[1].ends_with(",ABC1D23"));

    let cars = std::fs::read_to_string(f.dir.join("cars.csv")).unwrap();
    assert_eq!(
      cars,
      "Date,Time,Camera,Image\n\
       2026-02-01,08:00:01,Cam 1,cam1_20260201-080001.png\n\
       2026-02-01,08:00:02,Cam 2,cam2_20260201-080002.png\n"
    );
    assert!(f.dir.join("artifacts/cam1_20260201-080001.png").exists());
    let _ = std::fs::remove_dir_all(&f.dir);
  }

  #[test]
  fn test_identical_job_never_attempted_a_third_time() {
    let mut f = fixture("budget", vec![Ok(None), Ok(None), Ok(Some("NEVER00".to_string()))]);
    f.worker.process(job(1, 5));
    f.worker.process(job(1, 5));
    f.worker.process(job(1, 5));
    f.worker.process(job(1, 5));

    assert_eq!(f.calls.lock().unwrap().len(), 2);
    assert_eq!(f.worker.summary.empty_results, 2);
    assert_eq!(f.worker.summary.abandoned, 2);
    assert_eq!(f.worker.summary.plates, 0);
    // 第四次在保存之前即被放弃
    let cars = std::fs::read_to_string(f.dir.join("cars.csv")).unwrap();
    assert_eq!(cars.lines().count(), 4);
    let _ = std::fs::remove_dir_all(&f.dir);
  }

  #[test]
  fn test_recognized_artifact_is_not_extracted_again() {
    let mut f = fixture(
      "settled",
      vec![
        Ok(None),
        Ok(Some("ABC1234".to_string())),
        Ok(Some("ABC1234".to_string())),
      ],
    );
    f.worker.process(job(1, 7));
    f.worker.process(job(1, 7));
    f.worker.process(job(1, 7));

    assert_eq!(f.calls.lock().unwrap().len(), 2);
    assert_eq!(f.worker.summary.plates, 1);
    assert_eq!(f.worker.summary.empty_results, 1);
    assert_eq!(f.worker.summary.duplicates, 1);

    let plates = std::fs::read_to_string(f.dir.join("plates.csv")).unwrap();
    assert_eq!(plates.lines().count(), 2);
    // 重复任务在保存产物之前被跳过，不再追加车辆记录
    let cars = std::fs::read_to_string(f.dir.join("cars.csv")).unwrap();
    assert_eq!(cars.lines().count(), 3);
    let _ = std::fs::remove_dir_all(&f.dir);
  }

  #[test]
  fn test_extraction_error_does_not_stop_worker() {
    let f = fixture(
      "errors",
      vec![
        Err(ExtractionError::Transport("connection reset".to_string())),
        Ok(Some("XYZ9876".to_string())),
      ],
    );
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(WorkerMessage::Job(job(1, 10))).unwrap();
    tx.send(WorkerMessage::Job(job(1, 11))).unwrap();
    drop(tx);

    let summary = f.worker.run(rx);
    assert_eq!(summary.extraction_errors, 1);
    assert_eq!(summary.plates, 1);
    assert!(*f.closed.lock().unwrap());
    let _ = std::fs::remove_dir_all(&f.dir);
  }

  #[test]
  fn test_box_outside_frame_is_dropped() {
    let mut f = fixture("outside", vec![]);
    let mut outside = job(1, 20);
    outside.bbox = BoundingBox::new(100, 100, 200, 200);
    f.worker.process(outside);

    assert_eq!(f.worker.summary.empty_crops, 1);
    assert!(f.calls.lock().unwrap().is_empty());
    let _ = std::fs::remove_dir_all(&f.dir);
  }
}
