// 该文件是 Chawei （察微） 项目的一部分。
// src/processing/padim.rs - Padim 处理策略
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;

use image::RgbImage;
use tracing::debug;

use crate::model::{DetectionResult, Label};
use crate::preprocess::{self, IMAGENET_STATS};
use crate::processing::{calibrate_outputs, ProcessingError, ProcessingStrategy};
use crate::tensor::{Shape, Tensor};
use crate::visualize::{self, DEFAULT_OVERLAY_ALPHA};

const OUTPUT_ANOMALY_MAP: &str = "anomaly_map";
const OUTPUT_ANOMALY_SCORE: &str = "anomaly_score";

pub struct PadimProcessing {
  input_size: (u32, u32),
  threshold: f32,
}

impl PadimProcessing {
  pub fn new(input_size: (u32, u32), threshold: f32) -> Self {
    Self {
      input_size,
      threshold,
    }
  }
}

impl ProcessingStrategy for PadimProcessing {
  fn preprocess(&self, frame: &RgbImage) -> Result<Tensor, ProcessingError> {
    Ok(preprocess::preprocess(
      frame,
      self.input_size,
      false,
      0,
      &IMAGENET_STATS,
    )?)
  }

  fn postprocess(
    &self,
    outputs: HashMap<String, Tensor>,
  ) -> Result<DetectionResult, ProcessingError> {
    let (normalized, raw_score, anomalous_fraction) = calibrate_outputs(
      outputs,
      OUTPUT_ANOMALY_MAP,
      OUTPUT_ANOMALY_SCORE,
      self.threshold,
    )?;

    debug!("Padim 原始分数: {}", raw_score);

    let label = if raw_score > self.threshold {
      Label::Anomalous
    } else {
      Label::Normal
    };

    // Padim 的分数不做二次标定，直接上报原始值
    Ok(DetectionResult {
      score: raw_score,
      label,
      heatmap: normalized.into_boxed_slice(),
      threshold: self.threshold,
      confidence: anomalous_fraction,
    })
  }

  fn input_shape(&self) -> Shape {
    [1, 3, self.input_size.1 as usize, self.input_size.0 as usize]
  }

  fn visualize_result(
    &self,
    original: &RgbImage,
    result: &DetectionResult,
  ) -> Result<RgbImage, ProcessingError> {
    Ok(visualize::overlay_heatmap(
      original,
      &result.heatmap,
      self.input_size.0,
      self.input_size.1,
      DEFAULT_OVERLAY_ALPHA,
    ))
  }
}
