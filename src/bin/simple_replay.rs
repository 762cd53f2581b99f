// 该文件是 Chawei （察微） 项目的一部分。
// src/bin/simple_replay.rs - 回放推理演示程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use image::ImageReader;
use tracing::info;
use url::Url;

use chawei::{
  FromUrl,
  detector::AnomalyDetector,
  engine::ReplayEngine,
  listener::{CompositeDetectorListener, PerformanceMonitoringListener, ResultStorageListener},
  model::DetectionModel,
  visualize::Annotator,
};

/// Chawei 回放演示参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型配置，例如 padim://?threshold=0.5&size=224x224
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入图像，例如 image:///data/frame.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 回放采集文件，例如 replay:///data/outputs.json
  #[arg(long, value_name = "REPLAY")]
  pub replay: Url,

  /// 叠加结果输出路径，例如 image:///data/overlay.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 模型文件目录（回放引擎不解析内容，占位文件即可）
  #[arg(long, default_value = "models", value_name = "DIR")]
  pub artifacts: PathBuf,

  /// 标签字体文件，给出时在叠加图上绘制标签与分数
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 帧旋转校正角度
  #[arg(long, default_value = "0", value_name = "DEGREES")]
  pub rotation: i32,
}

const IMAGE_SCHEME: &str = "image";

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型配置: {}", args.model);
  info!("输入图像: {}", args.input);
  info!("回放文件: {}", args.replay);
  info!("输出路径: {}", args.output);

  if args.input.scheme() != IMAGE_SCHEME || args.output.scheme() != IMAGE_SCHEME {
    bail!("输入与输出需使用 {} 方案", IMAGE_SCHEME);
  }

  let model = DetectionModel::from_url(&args.model)?;
  let engine = ReplayEngine::from_url(&args.replay)?;

  let composite = Arc::new(CompositeDetectorListener::new());
  let perf = Arc::new(PerformanceMonitoringListener::new());
  let storage = Arc::new(ResultStorageListener::new());
  composite.add_listener(perf.clone());
  composite.add_listener(storage.clone());

  let mut detector = AnomalyDetector::builder(engine)
    .listener(composite)
    .artifact_dir(&args.artifacts)
    .model(model)
    .build()?;

  let frame = ImageReader::open(args.input.path())
    .with_context(|| format!("无法打开输入图像: {}", args.input.path()))?
    .decode()?
    .into_rgb8();

  info!("开始推理...");
  detector.detect(&frame, args.rotation);

  let records = storage.records();
  let Some(record) = records.last() else {
    bail!("检测未产生结果");
  };
  info!(
    "检测结果: 标签 {}, 分数 {:.4}, 置信占比 {:.4}, 耗时 {:.2?}",
    record.result.label, record.result.score, record.result.confidence, record.inference_time
  );
  info!("平均推理时间: {:.2?}", perf.average_inference_time());

  let mut overlay = detector.visualize_result(&frame, &record.result)?;

  if let Some(font_path) = &args.font {
    let font_data = std::fs::read(font_path)
      .with_context(|| format!("无法读取字体文件: {}", font_path.display()))?;
    let annotator =
      Annotator::from_font_bytes(font_data).map_err(|e| anyhow::anyhow!("字体无效: {e}"))?;
    annotator.annotate(&mut overlay, &record.result);
  }

  overlay.save(args.output.path())?;
  info!("叠加图已保存: {}", args.output.path());

  detector.close();

  Ok(())
}
