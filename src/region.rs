// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/region.rs - 感兴趣区域与检测框几何
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

const EDGE_EPSILON: f64 = 1e-9;

#[derive(Error, Debug, PartialEq)]
pub enum RegionError {
  #[error("区域多边形至少需要 3 个顶点, 实际为 {0}")]
  TooFewVertices(usize),
  #[error("区域顶点坐标无效: ({0}, {1})")]
  InvalidVertex(f64, f64),
}

/// 帧像素坐标系下的多边形，顶点按顺序首尾相连
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct Polygon {
  vertices: Vec<[f64; 2]>,
}

impl TryFrom<Vec<[f64; 2]>> for Polygon {
  type Error = RegionError;

  fn try_from(vertices: Vec<[f64; 2]>) -> Result<Self, Self::Error> {
    if vertices.len() < 3 {
      return Err(RegionError::TooFewVertices(vertices.len()));
    }
    if let Some([x, y]) = vertices
      .iter()
      .find(|[x, y]| !x.is_finite() || !y.is_finite())
    {
      return Err(RegionError::InvalidVertex(*x, *y));
    }
    Ok(Self { vertices })
  }
}

impl From<Polygon> for Vec<[f64; 2]> {
  fn from(polygon: Polygon) -> Self {
    polygon.vertices
  }
}

impl Polygon {
  pub fn vertices(&self) -> &[[f64; 2]] {
    &self.vertices
  }

  /// 点是否位于多边形内，边界上的点视为在内
  pub fn contains(&self, x: f64, y: f64) -> bool {
    let n = self.vertices.len();
    let mut inside = false;

    for i in 0..n {
      let [xi, yi] = self.vertices[i];
      let [xj, yj] = self.vertices[(i + n - 1) % n];

      if on_segment([xj, yj], [xi, yi], [x, y]) {
        return true;
      }

      // 射线法：向 +x 方向的水平射线与边相交次数
      if (yi > y) != (yj > y) {
        let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
        if x < x_cross {
          inside = !inside;
        }
      }
    }

    inside
  }
}

fn on_segment(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> bool {
  let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
  if cross.abs() > EDGE_EPSILON {
    return false;
  }
  p[0] >= a[0].min(b[0]) - EDGE_EPSILON
    && p[0] <= a[0].max(b[0]) + EDGE_EPSILON
    && p[1] >= a[1].min(b[1]) - EDGE_EPSILON
    && p[1] <= a[1].max(b[1]) + EDGE_EPSILON
}

/// 帧像素坐标下的检测框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl BoundingBox {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn center(&self) -> (f64, f64) {
    (
      (self.x1 as f64 + self.x2 as f64) / 2.0,
      (self.y1 as f64 + self.y2 as f64) / 2.0,
    )
  }

  pub fn is_center_inside(&self, region: &Polygon) -> bool {
    let (cx, cy) = self.center();
    region.contains(cx, cy)
  }

  /// 裁剪到 width x height 的图像范围内，返回 (x, y, w, h)；无交集时返回 None
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x1 = self.x1.min(self.x2).clamp(0, width as i32);
    let x2 = self.x1.max(self.x2).clamp(0, width as i32);
    let y1 = self.y1.min(self.y2).clamp(0, height as i32);
    let y2 = self.y1.max(self.y2).clamp(0, height as i32);

    if x2 <= x1 || y2 <= y1 {
      return None;
    }
    Some((
      x1 as u32,
      y1 as u32,
      (x2 - x1) as u32,
      (y2 - y1) as u32,
    ))
  }
}
