// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/extraction.rs - 车牌文本提取接口
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

use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::artifact::Artifact;

mod http_ocr;
pub use self::http_ocr::HttpOcrExtractor;

#[derive(Error, Debug)]
pub enum ExtractionError {
  #[error("识别服务通信失败: {0}")]
  Transport(String),
  #[error("识别服务响应无效: {0}")]
  InvalidResponse(String),
  #[error("读取产物失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("正则表达式错误: {0}")]
  Pattern(#[from] regex::Error),
  #[error("不支持的识别服务 scheme: {0}")]
  SchemeMismatch(String),
}

/// 从一张增强后的裁剪图中提取车牌文本；同一时刻最多一个调用
pub trait Extractor: Send {
  /// 返回 `Ok(None)` 表示没有识别出车牌
  fn extract(&mut self, artifact: &Artifact) -> Result<Option<String>, ExtractionError>;

  /// 释放会话资源，工作线程退出时调用
  fn shutdown(&mut self) {}
}

impl<E: Extractor + ?Sized> Extractor for Box<E> {
  fn extract(&mut self, artifact: &Artifact) -> Result<Option<String>, ExtractionError> {
    (**self).extract(artifact)
  }

  fn shutdown(&mut self) {
    (**self).shutdown()
  }
}

/// 按 URL 创建识别后端
///
/// - `http://host:port/ocr`、`https://...`：HTTP OCR 服务
pub fn extractor_from_url(url: &Url, timeout: Duration) -> Result<Box<dyn Extractor>, ExtractionError> {
  match url.scheme() {
    "http" | "https" => Ok(Box::new(HttpOcrExtractor::new(url.clone(), timeout)?)),
    other => Err(ExtractionError::SchemeMismatch(other.to_string())),
  }
}

fn looks_like_plate(token: &str) -> bool {
  (6..=8).contains(&token.chars().count()) && token.chars().any(|c| c.is_ascii_digit())
}

/// 从任意识别文本中挑出车牌候选
///
/// 画面上叠加的时间戳（`dd/mm/yyyy hh mm ss`）说明识别到的是水印，直接放弃。
/// 先找单个 6-8 位且含数字的词，找不到再尝试相邻两个词拼接；
/// 8 位候选去掉首字符后仍含数字则去掉首字符；最终只接受 6-7 位。
#[derive(Debug, Clone)]
pub struct PlateFilter {
  timestamp: Regex,
  token: Regex,
}

impl PlateFilter {
  pub fn new() -> Result<Self, regex::Error> {
    Ok(Self {
      timestamp: Regex::new(r"\b\d{2}/\d{2}/\d{4} \d{2} \d{2} \d{2}\b")?,
      token: Regex::new(r"\w+")?,
    })
  }

  pub fn candidate(&self, text: &str) -> Option<String> {
    if self.timestamp.is_match(text) {
      return None;
    }

    let tokens: Vec<&str> = self.token.find_iter(text).map(|m| m.as_str()).collect();
    let candidate = tokens
      .iter()
      .find(|token| looks_like_plate(token))
      .map(|token| token.to_string())
      .or_else(|| {
        tokens
          .windows(2)
          .map(|pair| format!("{}{}", pair[0], pair[1]))
          .find(|combined| looks_like_plate(combined))
      })?;

    let candidate = if candidate.chars().count() == 8 {
      let mut chars = candidate.chars();
      chars.next();
      let tail = chars.as_str();
      if tail.chars().any(|c| c.is_ascii_digit()) {
        tail.to_string()
      } else {
        candidate
      }
    } else {
      candidate
    };

    (6..=7)
      .contains(&candidate.chars().count())
      .then_some(candidate)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn plate_candidate(text: &str) -> Option<String> {
    PlateFilter::new().unwrap().candidate(text)
  }

  #[test]
  fn test_single_token() {
    assert_eq!(plate_candidate("placa ABC1D23 ok"), Some("ABC1D23".to_string()));
  }

  #[test]
  fn test_adjacent_tokens_are_joined() {
    assert_eq!(plate_candidate("BRASIL ABC 1234"), Some("ABC1234".to_string()));
  }

  #[test]
  fn test_eight_chars_drop_first() {
    assert_eq!(plate_candidate("XABC1234"), Some("ABC1234".to_string()));
  }

  #[test]
  fn test_timestamp_overlay_rejected() {
    assert_eq!(plate_candidate("ABC1234 12/03/2026 10 22 33"), None);
  }

  #[test]
  fn test_nothing_plausible() {
    assert_eq!(plate_candidate(""), None);
    assert_eq!(plate_candidate("BRASIL MERCOSUL"), None);
    assert_eq!(plate_candidate("12 34"), None);
  }

  #[test]
  fn test_unknown_backend_scheme() {
    let url = Url::parse("selenium://localhost").unwrap();
    assert!(matches!(
      extractor_from_url(&url, Duration::from_secs(1)),
      Err(ExtractionError::SchemeMismatch(s)) if s == "selenium"
    ));
  }
}
