// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/model/yolo26.rs - RKNPU 上的 YOLO26 检测模型
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

use image::{RgbImage, imageops::FilterType};
use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  model::{DetectItem, DetectResult, Model},
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_CLASS_NUM: usize = 80;
const YOLO26_INPUT_W: u32 = 640;
const YOLO26_INPUT_H: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
/// 模型侧的粗筛阈值，最终阈值由调度器决定
const YOLO26_OBJECT_THRESH: f32 = 0.25;

pub struct Yolo26 {
  context: Context,
}

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26Builder {
  model_path: String,
  flags: InitFlags,
}

const YOLO26_SCHEME: &str = "yolo26";

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLO26_SCHEME {
      return Err(Yolo26Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLO26_SCHEME
      )));
    }

    Ok(Yolo26Builder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
    })
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<Yolo26, Yolo26Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context = Context::new(&model_data, self.flags)?;

    if let Err(e) = context.sdk_version() {
      error!("查询 SDK 版本失败: {}", e);
      return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成");
    Ok(Yolo26 { context })
  }
}

/// 根据张量大小匹配回归和分类输出
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

/// 解码一个检测头，输出 640x640 模型输入坐标下的框
fn decode_head(
  reg: &[f32],
  cls: &[f32],
  (map_h, map_w): (usize, usize),
  stride: f32,
  items: &mut Vec<DetectItem>,
) {
  let spatial = map_h * map_w;
  let (input_w, input_h) = (YOLO26_INPUT_W as f32, YOLO26_INPUT_H as f32);

  for h in 0..map_h {
    for w in 0..map_w {
      let idx = h * map_w + w;

      let (max_logit, class_id) = (0..YOLO26_CLASS_NUM)
        .map(|c| (cls[c * spatial + idx], c as u32))
        .fold((f32::MIN, 0), |best, cur| if cur.0 > best.0 { cur } else { best });
      let score = sigmoid(max_logit);
      if score <= YOLO26_OBJECT_THRESH {
        continue;
      }

      let grid_x = (w as f32) + 0.5;
      let grid_y = (h as f32) + 0.5;

      items.push(DetectItem {
        class_id,
        score,
        bbox: [
          ((grid_x - reg[idx]) * stride).clamp(0.0, input_w),
          ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_h),
          ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_w),
          ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_h),
        ],
      });
    }
  }
}

impl Yolo26 {
  fn postprocess(output: rknpu::Output) -> Vec<DetectItem> {
    let mut items = Vec::new();

    for (head_idx, (&head, stride)) in YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate() {
      let spatial = head.0 * head.1;
      // RKNN 输出顺序不固定，按张量大小区分回归与分类
      let (idx1, idx2) = (head_idx * 2, head_idx * 2 + 1);
      let tensors = output
        .get_f32(idx1)
        .and_then(|t1| output.get_f32(idx2).map(|t2| (t1, t2)));
      let (tensor1, tensor2) = match tensors {
        Ok(tensors) => tensors,
        Err(e) => {
          error!("获取检测头 {} 输出失败: {}", head_idx, e);
          continue;
        }
      };

      match match_reg_cls_tensors(tensor1, tensor2, 4 * spatial, YOLO26_CLASS_NUM * spatial) {
        Some((reg, cls)) => decode_head(reg, cls, head, stride, &mut items),
        None => error!(
          "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}",
          head_idx,
          tensor1.len(),
          tensor2.len()
        ),
      }
    }

    sort_by_score(&mut items);
    items
  }
}

/// 置信度从高到低，调度器取第一个符合条件的检测
fn sort_by_score(items: &mut [DetectItem]) {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));
}

impl Model for Yolo26 {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = Yolo26Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let resized = image::imageops::resize(input, YOLO26_INPUT_W, YOLO26_INPUT_H, FilterType::Triangle);

    debug!("设置模型输入");
    self.context.set_input(
      0,
      resized.as_raw(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let mut items = Self::postprocess(output);

    // 换算回输入图像像素坐标
    let sx = input.width() as f32 / YOLO26_INPUT_W as f32;
    let sy = input.height() as f32 / YOLO26_INPUT_H as f32;
    for item in items.iter_mut() {
      item.bbox = [
        item.bbox[0] * sx,
        item.bbox[1] * sy,
        item.bbox[2] * sx,
        item.bbox[3] * sy,
      ];
    }

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
