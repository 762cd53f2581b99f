// 该文件是 Chawei （察微） 项目的一部分。
// src/model.rs - 模型配置与检测结果
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use url::Url;

use crate::FromUrl;

const PATCHCORE_DEFAULT_SIZE: (u32, u32) = (224, 224);
const PATCHCORE_DEFAULT_THRESHOLD: f32 = 46.0;
const PADIM_DEFAULT_SIZE: (u32, u32) = (224, 224);
const PADIM_DEFAULT_THRESHOLD: f32 = 0.5;
const YOLO_DEFAULT_SIZE: (u32, u32) = (640, 640);
const YOLO_DEFAULT_CONFIDENCE: f32 = 0.5;
const YOLO_DEFAULT_NMS: f32 = 0.4;

/// 异常检测模型配置。
///
/// 标签式变体：构造后不可变，决定加载哪个引擎模型以及选用哪种处理策略。
/// 新增模型变体时，所有 match 站点都会在编译期暴露缺失分支。
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionModel {
  Patchcore {
    /// 输入尺寸 (宽, 高)
    input_size: (u32, u32),
    /// 逐像素异常计数阈值（归一化 [0,1] 尺度）
    threshold: f32,
  },
  Padim {
    input_size: (u32, u32),
    threshold: f32,
  },
  Yolo {
    input_size: (u32, u32),
    confidence_threshold: f32,
    nms_threshold: f32,
  },
}

impl DetectionModel {
  pub fn patchcore() -> Self {
    DetectionModel::Patchcore {
      input_size: PATCHCORE_DEFAULT_SIZE,
      threshold: PATCHCORE_DEFAULT_THRESHOLD,
    }
  }

  pub fn padim() -> Self {
    DetectionModel::Padim {
      input_size: PADIM_DEFAULT_SIZE,
      threshold: PADIM_DEFAULT_THRESHOLD,
    }
  }

  pub fn yolo() -> Self {
    DetectionModel::Yolo {
      input_size: YOLO_DEFAULT_SIZE,
      confidence_threshold: YOLO_DEFAULT_CONFIDENCE,
      nms_threshold: YOLO_DEFAULT_NMS,
    }
  }

  pub fn input_size(&self) -> (u32, u32) {
    match self {
      DetectionModel::Patchcore { input_size, .. } => *input_size,
      DetectionModel::Padim { input_size, .. } => *input_size,
      DetectionModel::Yolo { input_size, .. } => *input_size,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      DetectionModel::Patchcore { .. } => "patchcore",
      DetectionModel::Padim { .. } => "padim",
      DetectionModel::Yolo { .. } => "yolo",
    }
  }

  /// 模型对应的引擎模型文件名
  pub fn artifact_name(&self) -> &'static str {
    match self {
      DetectionModel::Patchcore { .. } => "patchcore.onnx",
      DetectionModel::Padim { .. } => "padim.onnx",
      DetectionModel::Yolo { .. } => "yolo.onnx",
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelConfigError {
  #[error("未知的模型方案: {0}")]
  UnknownScheme(String),
  #[error("模型参数无效: {0}={1}")]
  InvalidParameter(String, String),
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
  let (w, h) = value.split_once('x')?;
  let w = w.parse().ok()?;
  let h = h.parse().ok()?;
  if w == 0 || h == 0 {
    return None;
  }
  Some((w, h))
}

impl FromUrl for DetectionModel {
  type Error = ModelConfigError;

  /// 从 URL 解析模型配置，例如 `padim://?threshold=0.5&size=224x224`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let mut model = match url.scheme() {
      "patchcore" => DetectionModel::patchcore(),
      "padim" => DetectionModel::padim(),
      "yolo" => DetectionModel::yolo(),
      other => return Err(ModelConfigError::UnknownScheme(other.to_string())),
    };

    for (key, value) in url.query_pairs() {
      let invalid = || ModelConfigError::InvalidParameter(key.to_string(), value.to_string());
      match (&mut model, key.as_ref()) {
        (
          DetectionModel::Patchcore { input_size, .. }
          | DetectionModel::Padim { input_size, .. }
          | DetectionModel::Yolo { input_size, .. },
          "size",
        ) => {
          *input_size = parse_size(&value).ok_or_else(invalid)?;
        }
        (
          DetectionModel::Patchcore { threshold, .. } | DetectionModel::Padim { threshold, .. },
          "threshold",
        ) => {
          *threshold = value.parse().map_err(|_| invalid())?;
        }
        (
          DetectionModel::Yolo {
            confidence_threshold,
            ..
          },
          "confidence",
        ) => {
          *confidence_threshold = value.parse().map_err(|_| invalid())?;
        }
        (DetectionModel::Yolo { nms_threshold, .. }, "nms") => {
          *nms_threshold = value.parse().map_err(|_| invalid())?;
        }
        _ => return Err(invalid()),
      }
    }

    Ok(model)
  }
}

/// 检测标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
  Normal,
  Anomalous,
}

impl std::fmt::Display for Label {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Label::Normal => write!(f, "Normal"),
      Label::Anomalous => write!(f, "Anomalous"),
    }
  }
}

/// 单次检测周期产出的不可变结果。
///
/// 相等性为逐元素比较，包含热图内容。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
  /// 校准后的分数
  pub score: f32,
  pub label: Label,
  /// 归一化到 [0,1] 的异常热图
  pub heatmap: Box<[f32]>,
  /// 逐像素计数所用阈值
  pub threshold: f32,
  /// 超过阈值的像素占比，非概率
  pub confidence: f32,
}
