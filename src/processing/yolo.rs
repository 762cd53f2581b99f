// 该文件是 Chawei （察微） 项目的一部分。
// src/processing/yolo.rs - YOLO 处理策略（占位）
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;

use image::RgbImage;

use crate::model::DetectionResult;
use crate::processing::{ProcessingError, ProcessingStrategy};
use crate::tensor::{Shape, Tensor};

/// YOLO 的边界框解码、输出张量命名与 NMS 细节尚未定稿，
/// 此策略仅上报输入形状，处理路径统一返回可恢复错误而非崩溃。
pub struct YoloProcessing {
  input_size: (u32, u32),
}

impl YoloProcessing {
  pub fn new(input_size: (u32, u32)) -> Self {
    Self { input_size }
  }
}

impl ProcessingStrategy for YoloProcessing {
  fn preprocess(&self, _frame: &RgbImage) -> Result<Tensor, ProcessingError> {
    Err(ProcessingError::Unsupported("YOLO 预处理尚未实现"))
  }

  fn postprocess(
    &self,
    _outputs: HashMap<String, Tensor>,
  ) -> Result<DetectionResult, ProcessingError> {
    Err(ProcessingError::Unsupported("YOLO 后处理尚未实现"))
  }

  fn input_shape(&self) -> Shape {
    [1, 3, self.input_size.1 as usize, self.input_size.0 as usize]
  }

  fn visualize_result(
    &self,
    _original: &RgbImage,
    _result: &DetectionResult,
  ) -> Result<RgbImage, ProcessingError> {
    Err(ProcessingError::Unsupported("YOLO 可视化尚未实现"))
  }
}
