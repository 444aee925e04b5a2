// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/main.rs - 项目主程序
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
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use chepai::{
  FromUrl,
  config::PipelineConfig,
  draw::Draw,
  extraction::extractor_from_url,
  input::UrlConnector,
  model::Detector,
  pipeline::Pipeline,
  task::{ContinuousTask, Task},
};

/// Chepai 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件（JSON），包含摄像头列表与各项参数
  #[arg(long, value_name = "CONFIG")]
  pub config: PathBuf,
  /// 检测模型，例如 yolo26:///opt/models/yolo26n.rknn
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// 车牌识别服务
  #[arg(long, value_name = "EXTRACTOR", default_value = "http://localhost:8082/ocr")]
  pub extractor: Url,
  /// 占位画面使用的字体文件
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  #[arg(long, value_name = "MAX_TICKS")]
  pub max_ticks: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("检测模型: {}", args.detector);
  info!("识别服务: {}", args.extractor);

  let config = PipelineConfig::from_file(&args.config)?;
  let model = Detector::from_url(&args.detector)?;
  let extractor = extractor_from_url(&args.extractor, config.extraction.timeout())?;
  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };

  let pipeline = Pipeline::start(&config, Arc::new(UrlConnector), extractor, Arc::new(draw))?;
  let summary = ContinuousTask::default()
    .with_tick_interval(config.tick_interval())
    .with_max_ticks(args.max_ticks)
    .run_task(pipeline, model)?;

  info!(
    "处理任务 {} 个，识别车牌 {} 个，未识别 {} 个，识别失败 {} 个，放弃 {} 个，重复 {} 个",
    summary.jobs,
    summary.plates,
    summary.empty_results,
    summary.extraction_errors,
    summary.abandoned,
    summary.duplicates
  );

  Ok(())
}
