// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/input.rs - 视频流输入
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

mod stream_source;
pub use self::stream_source::{FailureCounter, FrameSlot, StreamSource, StreamStats};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum StreamError {
  /// 无法建立或已失去连接
  #[error("视频流不可用: {0}")]
  Unavailable(String),
  /// 连接存在但读取/解码失败
  #[error("帧解码失败: {0}")]
  Decode(String),
  #[error("URI scheme 不支持: {0}")]
  SchemeMismatch(String),
  #[error("地址解析错误: {0}")]
  InvalidAddress(#[from] url::ParseError),
}

/// 一条已打开的视频流连接，释放即关闭
pub trait StreamHandle: Send {
  fn read_frame(&mut self) -> Result<RgbImage, StreamError>;
}

/// 按地址打开视频流
pub trait StreamConnector: Send + Sync {
  fn open(&self, address: &str) -> Result<Box<dyn StreamHandle>, StreamError>;
}

/// 根据地址的 scheme 选择具体输入实现
///
/// - `rtsp://` / `rtsps://`：GStreamer `rtspsrc`（需要 `gstreamer_input` 特性）
/// - `gst://camera/...`、`gst://file/...`：GStreamer 管道（需要 `gstreamer_input` 特性）
/// - `image:///path/to/file.png`：循环输出同一张图片（需要 `read_image_file` 特性）
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlConnector;

impl StreamConnector for UrlConnector {
  fn open(&self, address: &str) -> Result<Box<dyn StreamHandle>, StreamError> {
    let url = url::Url::parse(address)?;

    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrl;

      match url.scheme() {
        "rtsp" | "rtsps" => {
          let input = GStreamerInputPipelineBuilder::rtsp(address).build()?;
          return Ok(Box::new(input));
        }
        "gst" => {
          let input = GStreamerInputPipelineBuilder::from_url(&url)?.build()?;
          return Ok(Box::new(input));
        }
        _ => {}
      }
    }

    #[cfg(feature = "read_image_file")]
    {
      use crate::{FromUrl, FromUrlWithScheme};

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(&url)?;
        return Ok(Box::new(input));
      }
    }

    Err(StreamError::SchemeMismatch(url.scheme().to_string()))
  }
}
