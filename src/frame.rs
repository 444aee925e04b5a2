// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/frame.rs - 摄像头帧定义
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

const RGB_CHANNELS: usize = 3;

pub type CameraId = u32;

/// 一帧解码后的 RGB 图像（HWC 排列），附带所属摄像头
#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbImage,
  pub camera_id: CameraId,
}

impl Frame {
  pub fn new(camera_id: CameraId, image: RgbImage) -> Self {
    Self { image, camera_id }
  }

  /// 全黑帧，用作占位画面的底图
  pub fn blank(camera_id: CameraId, width: u32, height: u32) -> Self {
    Self::new(camera_id, RgbImage::new(width, height))
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_blank_frame_shape() {
    let frame = Frame::blank(7, 32, 16);
    assert_eq!(frame.camera_id, 7);
    assert_eq!(frame.width(), 32);
    assert_eq!(frame.height(), 16);
    assert_eq!(frame.image.as_raw().len(), 32 * 16 * frame.channels());
    assert!(frame.image.as_raw().iter().all(|&v| v == 0));
  }

  #[test]
  fn test_clone_is_independent() {
    let frame = Frame::blank(1, 4, 4);
    let mut copy = frame.clone();
    copy.image.put_pixel(0, 0, image::Rgb([255, 0, 0]));
    assert_eq!(frame.image.get_pixel(0, 0).0, [0, 0, 0]);
  }
}
