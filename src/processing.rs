// 该文件是 Chawei （察微） 项目的一部分。
// src/processing.rs - 处理策略定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;

use image::RgbImage;
use thiserror::Error;

use crate::model::{DetectionModel, DetectionResult};
use crate::preprocess::{self, PreprocessError};
use crate::tensor::{Shape, Tensor};

mod padim;
mod patchcore;
mod yolo;

pub use self::padim::PadimProcessing;
pub use self::patchcore::PatchcoreProcessing;
pub use self::yolo::YoloProcessing;

#[derive(Error, Debug)]
pub enum ProcessingError {
  #[error("输出中缺少张量: {0}")]
  MissingOutput(&'static str),
  #[error("输出张量格式错误: {0}")]
  MalformedOutput(String),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("模型输入尺寸无效: {0}x{1}")]
  InvalidInputSize(u32, u32),
  #[error("暂不支持: {0}")]
  Unsupported(&'static str),
}

/// 单个模型族的处理策略。
///
/// 检测器每次只持有一个活动实例，切换模型时整体替换。
pub trait ProcessingStrategy: Send {
  /// 将原始帧转为引擎输入张量
  fn preprocess(&self, frame: &RgbImage) -> Result<Tensor, ProcessingError>;

  /// 将引擎命名输出标定为检测结果，消费并释放全部输出张量
  fn postprocess(
    &self,
    outputs: HashMap<String, Tensor>,
  ) -> Result<DetectionResult, ProcessingError>;

  /// 引擎输入张量形状 [batch, channels, height, width]
  fn input_shape(&self) -> Shape;

  /// 将结果热图叠加到原始帧上，原始帧不被修改
  fn visualize_result(
    &self,
    original: &RgbImage,
    result: &DetectionResult,
  ) -> Result<RgbImage, ProcessingError>;
}

/// 按模型标签选择处理策略，穷尽匹配
pub fn strategy_for(
  model: &DetectionModel,
) -> Result<Box<dyn ProcessingStrategy>, ProcessingError> {
  let (w, h) = model.input_size();
  if w == 0 || h == 0 {
    return Err(ProcessingError::InvalidInputSize(w, h));
  }

  Ok(match *model {
    DetectionModel::Patchcore {
      input_size,
      threshold,
    } => Box::new(PatchcoreProcessing::new(input_size, threshold)),
    DetectionModel::Padim {
      input_size,
      threshold,
    } => Box::new(PadimProcessing::new(input_size, threshold)),
    DetectionModel::Yolo { input_size, .. } => Box::new(YoloProcessing::new(input_size)),
  })
}

/// Patchcore/Padim 共用的后处理主干：取出命名的异常图与分数张量，
/// 归一化异常图并统计超阈值像素占比。
pub(crate) fn calibrate_outputs(
  mut outputs: HashMap<String, Tensor>,
  map_key: &'static str,
  score_key: &'static str,
  threshold: f32,
) -> Result<(Vec<f32>, f32, f32), ProcessingError> {
  let map_tensor = outputs
    .remove(map_key)
    .ok_or(ProcessingError::MissingOutput(map_key))?;
  let score_tensor = outputs
    .remove(score_key)
    .ok_or(ProcessingError::MissingOutput(score_key))?;

  let raw_score = score_tensor
    .scalar()
    .ok_or_else(|| ProcessingError::MalformedOutput(format!("'{score_key}' 张量为空")))?;

  if map_tensor.is_empty() {
    return Err(ProcessingError::MalformedOutput(format!(
      "'{map_key}' 张量为空"
    )));
  }

  let normalized = preprocess::normalize_array(map_tensor.data());

  let over = normalized.iter().filter(|v| **v > threshold).count();
  let anomalous_fraction = over as f32 / normalized.len() as f32;

  // 剩余输出张量在此一并释放
  drop(outputs);
  drop(map_tensor);
  drop(score_tensor);

  Ok((normalized, raw_score, anomalous_fraction))
}
