// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/bin/simple_extract.rs - 单张图片的车牌识别
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

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use chepai::{
  artifact::{ArtifactId, ArtifactStore},
  enhance::Enhancer,
  extraction::{Extractor, extractor_from_url},
};

/// 增强一张车辆图片、保存为产物并调用一次识别服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 车辆裁剪图
  #[arg(long, value_name = "IMAGE")]
  pub image: PathBuf,
  /// 识别服务
  #[arg(long, value_name = "EXTRACTOR", default_value = "http://localhost:8082/ocr")]
  pub extractor: Url,
  /// 产物目录
  #[arg(long, value_name = "DIR", default_value = "placas_detectadas")]
  pub artifact_dir: PathBuf,

  #[arg(long, value_name = "CAMERA", default_value = "0")]
  pub camera: u32,

  #[arg(long, value_name = "TIMEOUT_MS", default_value = "30000")]
  pub timeout_ms: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入图片: {}", args.image.display());
  info!("识别服务: {}", args.extractor);

  let image = image::open(&args.image)?.into_rgb8();
  let enhanced = Enhancer::default().enhance(&image);

  let store = ArtifactStore::open(&args.artifact_dir, "png")?;
  let artifact = store.save(ArtifactId::new(args.camera, &Local::now()), &enhanced)?;
  info!("产物已保存: {}", artifact.path.display());

  let mut extractor = extractor_from_url(&args.extractor, Duration::from_millis(args.timeout_ms))?;
  let result = extractor.extract(&artifact);
  extractor.shutdown();

  match result? {
    Some(plate) => info!("识别到车牌: {}", plate),
    None => warn!("未识别到车牌"),
  }

  Ok(())
}
