// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/draw.rs - 占位画面绘制
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use crate::frame::{CameraId, Frame};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 28.0;
const LABEL_TEXT_HEIGHT: i32 = 34;
const LABEL_CHAR_WIDTH: f32 = 15.0; // 每字符平均宽度（粗略估计）
const LABEL_ORIGIN: (i32, i32) = (50, 50);
const MARKER_THICKNESS: i32 = 4;
const MARKER_COLOR: [u8; 3] = [255, 0, 0]; // 红色

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 绘制 "无连接" 占位画面。未加载字体时只绘制边框和叉号
#[derive(Default)]
pub struct Draw {
  font: Option<FontVec>,
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontVec::try_from_vec(data)?;
    info!("已加载标注字体: {}", path.as_ref().display());
    Ok(Self { font: Some(font) })
  }

  /// 生成指定分辨率的占位帧
  pub fn placeholder(&self, camera_id: CameraId, name: &str, width: u32, height: u32) -> Frame {
    let mut frame = Frame::blank(camera_id, width, height);
    self.draw_no_connection(&mut frame.image, name);
    frame
  }

  pub fn draw_no_connection(&self, image: &mut RgbImage, name: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let color = Rgb(MARKER_COLOR);

    // 边框
    for t in 0..MARKER_THICKNESS.min(w / 2).min(h / 2) {
      let (x_max, y_max) = ((w - 1 - t) as f32, (h - 1 - t) as f32);
      let (x_min, y_min) = (t as f32, t as f32);
      draw_line_segment_mut(image, (x_min, y_min), (x_max, y_min), color);
      draw_line_segment_mut(image, (x_min, y_max), (x_max, y_max), color);
      draw_line_segment_mut(image, (x_min, y_min), (x_min, y_max), color);
      draw_line_segment_mut(image, (x_max, y_min), (x_max, y_max), color);
    }

    // 叉号
    for t in 0..MARKER_THICKNESS {
      let offset = t as f32;
      draw_line_segment_mut(
        image,
        (offset, 0.0),
        ((w - 1) as f32, (h - 1) as f32 - offset),
        color,
      );
      draw_line_segment_mut(
        image,
        ((w - 1) as f32 - offset, 0.0),
        (0.0, (h - 1) as f32 - offset),
        color,
      );
    }

    if let Some(font) = &self.font {
      let label = format!("No connection: {}", name);
      let text_width = (label.len() as f32 * LABEL_CHAR_WIDTH) as i32;
      let (label_x, label_y) = LABEL_ORIGIN;

      // 仅在标签有空间时绘制
      let label_width = text_width.min(w - label_x);
      let label_height = LABEL_TEXT_HEIGHT.min(h - label_y);
      if label_width > 0 && label_height > 0 {
        let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
        draw_filled_rect_mut(image, rect, Rgb([0, 0, 0]));
        draw_text_mut(
          image,
          color,
          label_x,
          label_y,
          PxScale::from(LABEL_FONT_SIZE),
          font,
          &label,
        );
      }
    }
  }
}
