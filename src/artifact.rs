// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/artifact.rs - 增强后裁剪图的存储
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

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::frame::CameraId;

#[derive(Error, Debug)]
pub enum ArtifactError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 产物标识 `cam{id}_{YYYYmmdd-HHMMSS}`，同一摄像头同一秒的标识相同
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId(String);

impl ArtifactId {
  pub fn new(camera_id: CameraId, timestamp: &DateTime<Local>) -> Self {
    Self(format!(
      "cam{}_{}",
      camera_id,
      timestamp.format("%Y%m%d-%H%M%S")
    ))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ArtifactId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone)]
pub struct Artifact {
  pub id: ArtifactId,
  pub path: PathBuf,
}

impl Artifact {
  /// 产物文件名（不含目录），写入车辆记录
  pub fn file_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.id.to_string())
  }
}

/// 产物目录，文件名为 `{id}.{ext}`；同名文件直接覆盖
#[derive(Debug, Clone)]
pub struct ArtifactStore {
  directory: PathBuf,
  extension: String,
}

impl ArtifactStore {
  pub fn open(directory: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self, ArtifactError> {
    let directory = directory.into();
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
    Ok(Self {
      directory,
      extension: extension.into(),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn path_for(&self, id: &ArtifactId) -> PathBuf {
    self
      .directory
      .join(format!("{}.{}", id.as_str(), self.extension))
  }

  pub fn save(&self, id: ArtifactId, image: &RgbImage) -> Result<Artifact, ArtifactError> {
    let path = self.path_for(&id);
    image.save(&path)?;
    debug!("产物已保存: {}", path.display());
    Ok(Artifact { id, path })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("chepai-artifact-{}-{}", name, std::process::id()))
  }

  #[test]
  fn test_artifact_id_format() {
    let ts = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap();
    assert_eq!(ArtifactId::new(2, &ts).as_str(), "cam2_20260307-090501");
  }

  #[test]
  fn test_save_creates_directory_and_file() {
    let dir = temp_dir("save");
    let _ = std::fs::remove_dir_all(&dir);
    let store = ArtifactStore::open(dir.join("nested"), "png").unwrap();
    let ts = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

    let artifact = store
      .save(ArtifactId::new(1, &ts), &RgbImage::new(4, 3))
      .unwrap();
    assert!(artifact.path.exists());
    assert_eq!(artifact.file_name(), "cam1_20260102-030405.png");

    // 同一秒再次保存会覆盖
    let again = store
      .save(ArtifactId::new(1, &ts), &RgbImage::new(8, 8))
      .unwrap();
    assert_eq!(again.path, artifact.path);
    let reloaded = image::open(&again.path).unwrap();
    assert_eq!((reloaded.width(), reloaded.height()), (8, 8));

    let _ = std::fs::remove_dir_all(&dir);
  }
}
