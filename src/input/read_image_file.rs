// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

//! 把一张静态图片当作视频流反复输出，用于离线调试区域配置与整条流水线。
//!
//! 地址形如 `image:///path/to/frame.png?fps=10`。

use std::thread;
use std::time::{Duration, Instant};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::error;
use url::Url;

use super::{StreamError, StreamHandle};
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_FPS: f64 = 10.0;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

impl From<ImageFileInputError> for StreamError {
  fn from(err: ImageFileInputError) -> Self {
    match err {
      ImageFileInputError::SchemaMismatch => StreamError::SchemeMismatch("image".to_string()),
      ImageFileInputError::IoError(e) => StreamError::Unavailable(e.to_string()),
      ImageFileInputError::ImageLoadError(e) => StreamError::Decode(e.to_string()),
    }
  }
}

pub struct ImageFileInput {
  image: RgbImage,
  frame_interval: Duration,
  last_frame: Option<Instant>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok())
      .filter(|fps| *fps > 0.0)
      .unwrap_or(DEFAULT_FPS);

    let path = urlencoding::decode(url.path())
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let image = ImageReader::open(&*path)?.decode()?;

    Ok(ImageFileInput {
      image: image.into_rgb8(),
      frame_interval: Duration::from_secs_f64(1.0 / fps),
      last_frame: None,
    })
  }
}

impl ImageFileInput {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl StreamHandle for ImageFileInput {
  fn read_frame(&mut self) -> Result<RgbImage, StreamError> {
    // 按帧率节流，模拟真实视频流的阻塞读取
    if let Some(last) = self.last_frame {
      let elapsed = last.elapsed();
      if elapsed < self.frame_interval {
        thread::sleep(self.frame_interval - elapsed);
      }
    }
    self.last_frame = Some(Instant::now());
    Ok(self.image.clone())
  }
}
