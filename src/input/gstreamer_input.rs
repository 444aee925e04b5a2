// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 网络摄像头输入
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

//! # GStreamer 视频输入模块
//!
//! 为采集线程提供基于 GStreamer 的 [`StreamHandle`]：
//! - RTSP 网络摄像头（`rtsp://...`，TCP 传输，低延迟）
//! - 视频文件（`gst://file/path/to/video.mp4`）
//! - V4L2 摄像头（`gst://camera/dev/video0?width=1280&height=720&fps=15`）
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```
//!
//! appsink 只保留最新的一帧（`max-buffers=1 drop=true`），读取端永远拿到最新画面。
//! 拉取超时或管道报错都会作为读取失败返回，由采集循环负责重连。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::{StreamError, StreamHandle};
use crate::FromUrl;

/// 单帧拉取超时
const PULL_TIMEOUT_MS: u64 = 5_000;
/// RTSP 抖动缓冲（毫秒）
const RTSP_LATENCY_MS: u32 = 200;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 拉取超时
  #[error("No sample within {0} ms")]
  Timeout(u64),
  /// 流结束
  #[error("End of stream")]
  EndOfStream,
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

impl From<GStreamerInputError> for StreamError {
  fn from(err: GStreamerInputError) -> Self {
    match err {
      GStreamerInputError::SchemeMismatch => StreamError::SchemeMismatch("gst".to_string()),
      GStreamerInputError::VideoInfoError
      | GStreamerInputError::UnsupportedFormat
      | GStreamerInputError::BufferSizeMismatch { .. } => StreamError::Decode(err.to_string()),
      _ => StreamError::Unavailable(err.to_string()),
    }
  }
}

const GSTREAMER_INPUT_SCHEME: &str = "gst";

pub enum GStreamerInputBuilderItem {
  RtspSource {
    location: String,
    latency: u32,
  },
  FileSource(String),
  CameraSource {
    camera: String,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::RtspSource { location, latency } => {
        format!(
          "rtspsrc location=\"{}\" protocols=tcp latency={} ! decodebin",
          location, latency
        )
      }
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        format,
        width,
        height,
        fps,
      } => {
        format!(
          "v4l2src device={} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// GStreamer 输入管道构建器
///
/// ```no_run
/// use chepai::input::GStreamerInputPipelineBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let input = GStreamerInputPipelineBuilder::rtsp("rtsp://192.168.10.45:554/cam/realmonitor")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn rtsp(location: &str) -> Self {
    Self {
      items: vec![
        GStreamerInputBuilderItem::RtspSource {
          location: location.to_string(),
          latency: RTSP_LATENCY_MS,
        },
        GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        },
      ],
    }
  }

  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut items = vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| "YUY2".to_string()),
      width: parse("width", 1280),
      height: parse("height", 720),
      fps: parse("fps", 15),
    }];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));
    Self { items }
  }

  fn build_file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));
    Self { items }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let full_pipeline = format!(
      "{} ! appsink max-buffers=1 drop=true sync=false name=sink",
      basic_pipeline
    );

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != GSTREAMER_INPUT_SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(url.path(), &query),
      Some("file") => Self::build_file_pipeline(url.path(), &query),
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入，释放时停止管道
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  /// 取出总线上积压的错误或 EOS 消息
  fn check_bus(&self) -> Result<(), GStreamerInputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
      match msg.view() {
        gst::MessageView::Error(err) => {
          return Err(GStreamerInputError::PipelineError(format!(
            "{} ({:?})",
            err.error(),
            err.debug()
          )));
        }
        gst::MessageView::Eos(..) => return Err(GStreamerInputError::EndOfStream),
        _ => {}
      }
    }
    Ok(())
  }

  fn pull_image(&self) -> Result<RgbImage, GStreamerInputError> {
    self.check_bus()?;
    let sample = self
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
      .ok_or_else(|| {
        if self.appsink.is_eos() {
          GStreamerInputError::EndOfStream
        } else {
          GStreamerInputError::Timeout(PULL_TIMEOUT_MS)
        }
      })?;
    convert_sample_to_rgb(sample)
  }
}

impl StreamHandle for GStreamerInput {
  fn read_frame(&mut self) -> Result<RgbImage, StreamError> {
    Ok(self.pull_image()?)
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = vec![0u8; width * height * 3];
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      // 逐行拷贝，去掉行尾对齐填充
      for (h, row) in pixels.chunks_exact_mut(width * 3).enumerate() {
        let src = &data[h * stride..h * stride + width * 3];
        row.copy_from_slice(src);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for (h, row) in pixels.chunks_exact_mut(width * 3).enumerate() {
        let src = &data[h * stride..h * stride + width * 3];
        for (dst, src) in row.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
          dst[0] = src[2];
          dst[1] = src[1];
          dst[2] = src[0];
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: data.len(),
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn describe(builder: &GStreamerInputPipelineBuilder) -> String {
    builder
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<_>>()
      .join(" ! ")
  }

  #[test]
  fn test_rtsp_pipeline_description() {
    let builder = GStreamerInputPipelineBuilder::rtsp("rtsp://10.0.0.2:554/live");
    assert_eq!(
      describe(&builder),
      "rtspsrc location=\"rtsp://10.0.0.2:554/live\" protocols=tcp latency=200 ! decodebin ! \
       videoconvert ! video/x-raw,format=RGB"
    );
  }

  #[test]
  fn test_camera_pipeline_from_url() {
    let url = Url::parse("gst://camera/dev/video0?width=640&height=480&rotate=180").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert_eq!(
      describe(&builder),
      "v4l2src device=/dev/video0 ! video/x-raw,format=YUY2,width=640,height=480,framerate=15/1 \
       ! videoflip method=2 ! videoconvert ! video/x-raw,format=RGB"
    );
  }

  #[test]
  fn test_unknown_host_rejected() {
    let url = Url::parse("gst://elsewhere/x").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }
}
