// 该文件是 Chawei （察微） 项目的一部分。
// src/processing/patchcore.rs - Patchcore 处理策略
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
use crate::preprocess::{self, PASSTHROUGH_STATS};
use crate::processing::{calibrate_outputs, ProcessingError, ProcessingStrategy};
use crate::tensor::{Shape, Tensor};
use crate::visualize::{self, DEFAULT_OVERLAY_ALPHA};

const OUTPUT_ANOMALY_MAP: &str = "anomaly_map";
const OUTPUT_SCORE: &str = "score";

// 整图原始分数阈值，来自上游训练侧，与逐像素阈值刻度无关
const IMAGE_THRESHOLD: f32 = 46.0;
const MIN_SCORE: f32 = 0.0;
const MAX_SCORE: f32 = 1.0;

pub struct PatchcoreProcessing {
  input_size: (u32, u32),
  threshold: f32,
}

impl PatchcoreProcessing {
  pub fn new(input_size: (u32, u32), threshold: f32) -> Self {
    Self {
      input_size,
      threshold,
    }
  }

  fn normalize_score(value: f32) -> f32 {
    ((value - IMAGE_THRESHOLD) / (MAX_SCORE - MIN_SCORE) + 0.5).clamp(0.0, 1.0)
  }
}

impl ProcessingStrategy for PatchcoreProcessing {
  fn preprocess(&self, frame: &RgbImage) -> Result<Tensor, ProcessingError> {
    Ok(preprocess::preprocess(
      frame,
      self.input_size,
      false,
      0,
      &PASSTHROUGH_STATS,
    )?)
  }

  fn postprocess(
    &self,
    outputs: HashMap<String, Tensor>,
  ) -> Result<DetectionResult, ProcessingError> {
    let (normalized, raw_score, anomalous_fraction) =
      calibrate_outputs(outputs, OUTPUT_ANOMALY_MAP, OUTPUT_SCORE, self.threshold)?;

    debug!("Patchcore 原始分数: {}", raw_score);

    // 标签由原始分数对 IMAGE_THRESHOLD 的严格比较决定
    let label = if raw_score > IMAGE_THRESHOLD {
      Label::Anomalous
    } else {
      Label::Normal
    };

    Ok(DetectionResult {
      score: Self::normalize_score(raw_score),
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

#[cfg(test)]
mod tests {
  use super::*;

  fn outputs(map: Vec<f32>, score: f32) -> HashMap<String, Tensor> {
    let len = map.len();
    let mut outputs = HashMap::new();
    outputs.insert(
      OUTPUT_ANOMALY_MAP.to_string(),
      Tensor::new(map, [1, 1, 1, len]).unwrap(),
    );
    outputs.insert(
      OUTPUT_SCORE.to_string(),
      Tensor::new(vec![score], [1, 1, 1, 1]).unwrap(),
    );
    outputs
  }

  #[test]
  fn image_threshold_comparison_is_strict() {
    let strategy = PatchcoreProcessing::new((224, 224), 0.5);

    let result = strategy
      .postprocess(outputs(vec![1.0, 2.0], 46.0))
      .unwrap();
    assert_eq!(result.label, Label::Normal);

    let result = strategy
      .postprocess(outputs(vec![1.0, 2.0], 46.0001))
      .unwrap();
    assert_eq!(result.label, Label::Anomalous);
  }

  #[test]
  fn score_calibration_clamps_to_unit_interval() {
    assert_eq!(PatchcoreProcessing::normalize_score(46.0), 0.5);
    assert_eq!(PatchcoreProcessing::normalize_score(46.3), 0.8);
    assert_eq!(PatchcoreProcessing::normalize_score(100.0), 1.0);
    assert_eq!(PatchcoreProcessing::normalize_score(-100.0), 0.0);
  }

  #[test]
  fn raw_score_threshold_and_pixel_threshold_stay_separate() {
    // 逐像素阈值 0.5 只影响 confidence，不影响标签
    let strategy = PatchcoreProcessing::new((224, 224), 0.5);
    let result = strategy
      .postprocess(outputs(vec![0.0, 10.0, 20.0, 30.0], 10.0))
      .unwrap();
    assert_eq!(result.label, Label::Normal);
    assert!((result.confidence - 0.25).abs() < 1e-6);
    assert_eq!(result.threshold, 0.5);
  }
}
