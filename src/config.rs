// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/config.rs - 流水线配置
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

//! 配置在进程启动时从 JSON 文件加载一次，之后不再变化。
//!
//! ```json
//! {
//!   "cameras": [
//!     {
//!       "id": 1,
//!       "name": "Cam 1",
//!       "address": "rtsp://192.168.10.45:554/cam/realmonitor?channel=1&subtype=0",
//!       "resolution": [1280, 720],
//!       "region": [[1162, 340], [1896, 655], [1676, 994], [735, 418]]
//!     }
//!   ],
//!   "detection": { "interval_ms": 5000, "confidence_threshold": 0.4 }
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::CameraId;
use crate::region::Polygon;

/// COCO 数据集中 "car" 的类别编号
pub const COCO_CAR_CLASS: u32 = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("没有配置任何摄像头")]
  NoCameras,
  #[error("摄像头编号重复: {0}")]
  DuplicateCamera(CameraId),
  #[error("摄像头 {0} 的分辨率无效")]
  InvalidResolution(CameraId),
  #[error("配置项无效: {0}")]
  InvalidValue(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
  pub id: CameraId,
  pub name: String,
  pub address: String,
  #[serde(default = "default_camera_resolution")]
  pub resolution: [u32; 2],
  pub region: Polygon,
}

impl CameraConfig {
  pub fn width(&self) -> u32 {
    self.resolution[0]
  }

  pub fn height(&self) -> u32 {
    self.resolution[1]
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
  pub reconnect_backoff_ms: u64,
  pub escalation_threshold: u32,
}

impl Default for StreamSettings {
  fn default() -> Self {
    Self {
      reconnect_backoff_ms: 2000,
      escalation_threshold: 5,
    }
  }
}

impl StreamSettings {
  pub fn reconnect_backoff(&self) -> Duration {
    Duration::from_millis(self.reconnect_backoff_ms)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
  pub interval_ms: u64,
  pub confidence_threshold: f32,
  pub target_class: u32,
  pub working_resolution: [u32; 2],
}

impl Default for DetectionSettings {
  fn default() -> Self {
    Self {
      interval_ms: 5000,
      confidence_threshold: 0.4,
      target_class: COCO_CAR_CLASS,
      working_resolution: [640, 480],
    }
  }
}

impl DetectionSettings {
  pub fn interval(&self) -> Duration {
    Duration::from_millis(self.interval_ms)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
  pub max_attempts: u32,
  /// 尝试记录的保留窗口（秒），早于窗口的任务直接放弃
  pub attempt_retention_s: u64,
  pub artifact_dir: PathBuf,
  pub artifact_extension: String,
  pub timeout_ms: u64,
}

impl Default for ExtractionSettings {
  fn default() -> Self {
    Self {
      max_attempts: 2,
      attempt_retention_s: 600,
      artifact_dir: PathBuf::from("placas_detectadas"),
      artifact_extension: "png".to_string(),
      timeout_ms: 30_000,
    }
  }
}

impl ExtractionSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }

  pub fn attempt_retention(&self) -> Duration {
    Duration::from_secs(self.attempt_retention_s)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
  pub plates: PathBuf,
  pub cars: Option<PathBuf>,
}

impl Default for LedgerSettings {
  fn default() -> Self {
    Self {
      plates: PathBuf::from("registros_placas.csv"),
      cars: Some(PathBuf::from("registros_carros.csv")),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
  pub cameras: Vec<CameraConfig>,
  #[serde(default)]
  pub stream: StreamSettings,
  #[serde(default)]
  pub detection: DetectionSettings,
  #[serde(default)]
  pub extraction: ExtractionSettings,
  #[serde(default)]
  pub ledger: LedgerSettings,
  #[serde(default = "default_tick_interval_ms")]
  pub tick_interval_ms: u64,
}

fn default_camera_resolution() -> [u32; 2] {
  [1280, 720]
}

fn default_tick_interval_ms() -> u64 {
  30
}

impl PipelineConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_json(&content)
  }

  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn tick_interval(&self) -> Duration {
    Duration::from_millis(self.tick_interval_ms)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.cameras.is_empty() {
      return Err(ConfigError::NoCameras);
    }

    let mut seen = HashSet::new();
    for camera in &self.cameras {
      if !seen.insert(camera.id) {
        return Err(ConfigError::DuplicateCamera(camera.id));
      }
      if camera.width() == 0 || camera.height() == 0 {
        return Err(ConfigError::InvalidResolution(camera.id));
      }
    }

    let [work_w, work_h] = self.detection.working_resolution;
    if work_w == 0 || work_h == 0 {
      return Err(ConfigError::InvalidValue(
        "detection.working_resolution 不能为 0".to_string(),
      ));
    }
    if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
      return Err(ConfigError::InvalidValue(format!(
        "detection.confidence_threshold 超出范围: {}",
        self.detection.confidence_threshold
      )));
    }
    if self.extraction.attempt_retention_s == 0 {
      return Err(ConfigError::InvalidValue(
        "extraction.attempt_retention_s 不能为 0".to_string(),
      ));
    }
    if self.extraction.artifact_extension.is_empty() {
      return Err(ConfigError::InvalidValue(
        "extraction.artifact_extension 不能为空".to_string(),
      ));
    }

    Ok(())
  }
}
