// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/ledger.rs - 追加写入的记录文件
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

//! 逗号分隔的追加式记录：车牌记录与车辆记录。
//! 文件不存在或为空时先写表头；已写入的行不会被修改。

use std::fs::OpenOptions;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
  #[error("记录文件 {path} 写入失败: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

pub trait LedgerRecord {
  const HEADER: &'static [&'static str];
  fn fields(&self) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateRecord {
  pub date: String,
  pub time: String,
  pub plate: String,
}

impl PlateRecord {
  pub fn new(plate: impl Into<String>, at: &DateTime<Local>) -> Self {
    Self {
      date: at.format("%Y-%m-%d").to_string(),
      time: at.format("%H:%M:%S").to_string(),
      plate: plate.into(),
    }
  }
}

impl LedgerRecord for PlateRecord {
  const HEADER: &'static [&'static str] = &["Date", "Time", "Plate"];

  fn fields(&self) -> Vec<String> {
    vec![self.date.clone(), self.time.clone(), self.plate.clone()]
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarRecord {
  pub date: String,
  pub time: String,
  pub camera: String,
  pub image: String,
}

impl CarRecord {
  pub fn new(camera: impl Into<String>, image: impl Into<String>, at: &DateTime<Local>) -> Self {
    Self {
      date: at.format("%Y-%m-%d").to_string(),
      time: at.format("%H:%M:%S").to_string(),
      camera: camera.into(),
      image: image.into(),
    }
  }
}

impl LedgerRecord for CarRecord {
  const HEADER: &'static [&'static str] = &["Date", "Time", "Camera", "Image"];

  fn fields(&self) -> Vec<String> {
    vec![
      self.date.clone(),
      self.time.clone(),
      self.camera.clone(),
      self.image.clone(),
    ]
  }
}

pub struct Ledger<R> {
  path: PathBuf,
  _record: PhantomData<fn(&R)>,
}

impl<R: LedgerRecord> Ledger<R> {
  /// 打开记录文件，必要时写入表头
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
    let ledger = Self {
      path: path.into(),
      _record: PhantomData,
    };
    ledger.ensure_header()?;
    Ok(ledger)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn io_error(&self, source: std::io::Error) -> LedgerError {
    LedgerError::IoError {
      path: self.path.clone(),
      source,
    }
  }

  fn ensure_header(&self) -> Result<(), LedgerError> {
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
    }
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .map_err(|e| self.io_error(e))?;
    let len = file.metadata().map_err(|e| self.io_error(e))?.len();
    if len == 0 {
      let header = R::HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>();
      file
        .write_all(format_row(&header).as_bytes())
        .map_err(|e| self.io_error(e))?;
    }
    Ok(())
  }

  pub fn append(&self, record: &R) -> Result<(), LedgerError> {
    // 文件可能在运行期间被删除或清空
    self.ensure_header()?;
    let mut file = OpenOptions::new()
      .append(true)
      .open(&self.path)
      .map_err(|e| self.io_error(e))?;
    file
      .write_all(format_row(&record.fields()).as_bytes())
      .map_err(|e| self.io_error(e))?;
    file.flush().map_err(|e| self.io_error(e))
  }
}

fn format_row(fields: &[String]) -> String {
  let mut row = fields
    .iter()
    .map(|f| quote_field(f))
    .collect::<Vec<_>>()
    .join(",");
  row.push('\n');
  row
}

fn quote_field(field: &str) -> String {
  if field.contains([',', '"', '\n', '\r']) {
    format!("\"{}\"", field.replace('"', "\"\""))
  } else {
    field.to_string()
  }
}
