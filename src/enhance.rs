// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/enhance.rs - 车辆裁剪图增强
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

//! 送去识别前的图像增强：去噪 → gamma 校正 → 反锐化掩模。
//! 纯函数，同一输入总是得到同一输出。

use image::RgbImage;
use imageproc::filter::{gaussian_blur_f32, median_filter};

const DEFAULT_GAMMA: f32 = 1.2;
const DEFAULT_BLUR_SIGMA: f32 = 3.0;
const SHARPEN_WEIGHT: f32 = 1.5;
const BLUR_WEIGHT: f32 = -0.5;

#[derive(Debug, Clone)]
pub struct Enhancer {
  gamma_table: [u8; 256],
  blur_sigma: f32,
}

impl Default for Enhancer {
  fn default() -> Self {
    Self::new(DEFAULT_GAMMA, DEFAULT_BLUR_SIGMA)
  }
}

impl Enhancer {
  pub fn new(gamma: f32, blur_sigma: f32) -> Self {
    let mut gamma_table = [0u8; 256];
    for (i, v) in gamma_table.iter_mut().enumerate() {
      // 截断取整
      *v = ((i as f32 / 255.0).powf(gamma) * 255.0).clamp(0.0, 255.0) as u8;
    }
    Self {
      gamma_table,
      blur_sigma,
    }
  }

  pub fn gamma_table(&self) -> &[u8; 256] {
    &self.gamma_table
  }

  pub fn enhance(&self, image: &RgbImage) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
      return image.clone();
    }

    let mut adjusted = median_filter(image, 1, 1);
    for p in adjusted.pixels_mut() {
      for c in p.0.iter_mut() {
        *c = self.gamma_table[*c as usize];
      }
    }

    let blurred = gaussian_blur_f32(&adjusted, self.blur_sigma);
    for (p, b) in adjusted.pixels_mut().zip(blurred.pixels()) {
      for (c, bc) in p.0.iter_mut().zip(b.0.iter()) {
        let v = SHARPEN_WEIGHT * *c as f32 + BLUR_WEIGHT * *bc as f32;
        *c = v.round().clamp(0.0, 255.0) as u8;
      }
    }
    adjusted
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn test_gamma_table_values() {
    let table = Enhancer::default().gamma_table().to_owned();
    assert_eq!(table[0], 0);
    assert_eq!(table[64], 48);
    assert_eq!(table[128], 111);
    assert_eq!(table[200], 190);
    assert_eq!(table[255], 255);
  }

  #[test]
  fn test_enhance_is_deterministic() {
    let image = RgbImage::from_fn(40, 24, |x, y| {
      Rgb([(x * 6) as u8, (y * 10) as u8, ((x + y) * 3) as u8])
    });
    let enhancer = Enhancer::default();
    let a = enhancer.enhance(&image);
    let b = enhancer.enhance(&image);
    assert_eq!(a, b);
    assert_eq!(a.dimensions(), image.dimensions());
  }

  #[test]
  fn test_uniform_image_only_gamma() {
    let image = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
    let out = Enhancer::default().enhance(&image);
    for p in out.pixels() {
      for &c in p.0.iter() {
        assert!((110..=112).contains(&c), "unexpected value {}", c);
      }
    }
  }

  #[test]
  fn test_sharpening_increases_edge_contrast() {
    let image = RgbImage::from_fn(32, 8, |x, _| {
      if x < 16 { Rgb([60, 60, 60]) } else { Rgb([200, 200, 200]) }
    });
    let out = Enhancer::default().enhance(&image);
    let dark = Enhancer::default().gamma_table()[60];
    // 边缘暗侧被压低
    assert!(out.get_pixel(15, 4).0[0] < dark);
  }
}
