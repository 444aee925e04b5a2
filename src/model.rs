// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/model.rs - 检测模型接口
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::FromUrl;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，输入图像像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("不支持的模型 scheme: {0}")]
  SchemeMismatch(String),
  #[error("模型 {0} 未编译进当前程序，请启用对应特性")]
  FeatureDisabled(&'static str),
  #[cfg(feature = "model_yolo26")]
  #[error("YOLO26 错误: {0}")]
  Yolo26(#[from] Yolo26Error),
}

/// 按 URL 选择的检测模型
///
/// - `yolo26:///path/to/model.rknn`：Rockchip NPU 上的 YOLO26（需要 `model_yolo26` 特性）
pub enum Detector {
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26),
}

impl FromUrl for Detector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "model_yolo26")]
      "yolo26" => Ok(Detector::Yolo26(Yolo26Builder::from_url(url)?.build()?)),
      #[cfg(not(feature = "model_yolo26"))]
      "yolo26" => Err(DetectorError::FeatureDisabled("model_yolo26")),
      other => Err(DetectorError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Model for Detector {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = DetectorError;

  #[allow(unused_variables)]
  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match *self {
      #[cfg(feature = "model_yolo26")]
      Detector::Yolo26(ref model) => Ok(model.infer(input)?),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unknown_model_scheme() {
    let url = Url::parse("onnx:///models/yolo.onnx").unwrap();
    assert!(matches!(
      Detector::from_url(&url),
      Err(DetectorError::SchemeMismatch(s)) if s == "onnx"
    ));
  }

  #[cfg(not(feature = "model_yolo26"))]
  #[test]
  fn test_yolo26_requires_feature() {
    let url = Url::parse("yolo26:///models/yolo26n.rknn").unwrap();
    assert!(matches!(
      Detector::from_url(&url),
      Err(DetectorError::FeatureDisabled("model_yolo26"))
    ));
  }

  #[test]
  fn test_detect_result_from_items() {
    let result = DetectResult::from(vec![DetectItem {
      class_id: 2,
      score: 0.9,
      bbox: [1.0, 2.0, 3.0, 4.0],
    }]);
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].class_id, 2);
    assert!(DetectResult::default().is_empty());
  }
}
