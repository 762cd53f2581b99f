// 该文件是 Chawei （察微） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::tensor::{Tensor, TensorError};

const RGB_CHANNELS: usize = 3;

/// 逐通道归一化参数，`value = (raw - mean[c]) / std[c]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationStats {
  pub mean: [f32; 3],
  pub std: [f32; 3],
}

/// 直通归一化：仅把 [0,255] 缩放到 [0,1]
pub const PASSTHROUGH_STATS: NormalizationStats = NormalizationStats {
  mean: [0.0, 0.0, 0.0],
  std: [255.0, 255.0, 255.0],
};

/// ImageNet 统计量（0.485/0.456/0.406 与 0.229/0.224/0.225，换算到 255 刻度）
pub const IMAGENET_STATS: NormalizationStats = NormalizationStats {
  mean: [0.485 * 255.0, 0.456 * 255.0, 0.406 * 255.0],
  std: [0.229 * 255.0, 0.224 * 255.0, 0.225 * 255.0],
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("目标尺寸无效: {0}x{1}")]
  InvalidTargetSize(u32, u32),
  #[error("输入帧为空")]
  EmptyFrame,
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
}

/// 中心正方形裁剪，边长取宽高较小者
pub fn crop_to_square(frame: &RgbImage) -> RgbImage {
  let dimension = frame.width().min(frame.height());
  let x = (frame.width() - dimension) / 2;
  let y = (frame.height() - dimension) / 2;
  imageops::crop_imm(frame, x, y, dimension, dimension).to_image()
}

/// 按整幅外接矩形旋转帧。
///
/// 90 度的整数倍走快速路径；任意角度用包住整幅图的仿射旋转，
/// 未覆盖到的角落填黑。
pub fn rotate_frame(frame: &RgbImage, degrees: i32) -> RgbImage {
  match degrees.rem_euclid(360) {
    0 => frame.clone(),
    90 => imageops::rotate90(frame),
    180 => imageops::rotate180(frame),
    270 => imageops::rotate270(frame),
    deg => rotate_arbitrary(frame, deg as f32),
  }
}

fn rotate_arbitrary(frame: &RgbImage, degrees: f32) -> RgbImage {
  let theta = degrees.to_radians();
  let (sin, cos) = theta.sin_cos();
  let (w, h) = (frame.width() as f32, frame.height() as f32);

  let out_w = (w * cos.abs() + h * sin.abs()).ceil() as u32;
  let out_h = (w * sin.abs() + h * cos.abs()).ceil() as u32;

  let (cx, cy) = (w / 2.0, h / 2.0);
  let (ocx, ocy) = (out_w as f32 / 2.0, out_h as f32 / 2.0);

  let mut out = RgbImage::new(out_w, out_h);
  for y in 0..out_h {
    for x in 0..out_w {
      let dx = x as f32 + 0.5 - ocx;
      let dy = y as f32 + 0.5 - ocy;
      // 逆映射回原帧坐标
      let sx = cos * dx + sin * dy + cx;
      let sy = -sin * dx + cos * dy + cy;
      if sx >= 0.0 && sx < w && sy >= 0.0 && sy < h {
        out.put_pixel(x, y, *frame.get_pixel(sx as u32, sy as u32));
      }
    }
  }
  out
}

/// 几何预处理：可选中心裁剪 → 可选旋转 → 精确缩放到目标尺寸。
///
/// 缩放不保持宽高比，目标尺寸强制生效。
pub fn prepare_frame(
  frame: &RgbImage,
  target_size: (u32, u32),
  crop_square: bool,
  rotation: i32,
) -> Result<RgbImage, PreprocessError> {
  let (target_w, target_h) = target_size;
  if target_w == 0 || target_h == 0 {
    return Err(PreprocessError::InvalidTargetSize(target_w, target_h));
  }
  if frame.width() == 0 || frame.height() == 0 {
    return Err(PreprocessError::EmptyFrame);
  }

  let mut processed = if crop_square {
    crop_to_square(frame)
  } else {
    frame.clone()
  };

  if rotation.rem_euclid(360) != 0 {
    processed = rotate_frame(&processed, rotation);
  }

  if processed.width() != target_w || processed.height() != target_h {
    processed = imageops::resize(&processed, target_w, target_h, FilterType::Triangle);
  }

  Ok(processed)
}

/// 将 RGB 帧转为通道前置 (C,H,W) 的归一化浮点张量，长度 `3*H*W`
pub fn to_chw_tensor(
  frame: &RgbImage,
  stats: &NormalizationStats,
) -> Result<Tensor, PreprocessError> {
  let width = frame.width() as usize;
  let height = frame.height() as usize;
  if width == 0 || height == 0 {
    return Err(PreprocessError::EmptyFrame);
  }

  let mut values = vec![0.0f32; RGB_CHANNELS * height * width];
  let mut index = 0;
  for channel in 0..RGB_CHANNELS {
    for y in 0..height {
      for x in 0..width {
        let raw = frame.get_pixel(x as u32, y as u32)[channel] as f32;
        values[index] = (raw - stats.mean[channel]) / stats.std[channel];
        index += 1;
      }
    }
  }

  Ok(Tensor::new(values, [1, RGB_CHANNELS, height, width])?)
}

/// 完整预处理：几何变换后转归一化 CHW 张量。
///
/// 中间帧在返回前全部释放。
pub fn preprocess(
  frame: &RgbImage,
  target_size: (u32, u32),
  crop_square: bool,
  rotation: i32,
  stats: &NormalizationStats,
) -> Result<Tensor, PreprocessError> {
  let processed = prepare_frame(frame, target_size, crop_square, rotation)?;
  debug!(
    "预处理完成: {}x{} -> 张量 [1, 3, {}, {}]",
    frame.width(),
    frame.height(),
    processed.height(),
    processed.width()
  );
  to_chw_tensor(&processed, stats)
}

/// 最小-最大归一化到 [0,1]。
///
/// 退化（常数）输入时全部取 0.5，避免除零。
pub fn normalize_array(values: &[f32]) -> Vec<f32> {
  let min = values.iter().copied().fold(f32::INFINITY, f32::min);
  let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let range = max - min;

  if values.is_empty() {
    return Vec::new();
  }

  if range != 0.0 {
    values.iter().map(|v| (v - min) / range).collect()
  } else {
    vec![0.5; values.len()]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gradient_frame(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
      image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
  }

  #[test]
  fn tensor_length_is_three_h_w() {
    let frame = gradient_frame(64, 48);
    let tensor = preprocess(&frame, (32, 24), false, 0, &PASSTHROUGH_STATS).unwrap();
    assert_eq!(tensor.len(), 3 * 24 * 32);
    assert_eq!(tensor.shape(), [1, 3, 24, 32]);
  }

  #[test]
  fn passthrough_stats_scale_to_unit_range() {
    let mut frame = RgbImage::new(2, 1);
    frame.put_pixel(0, 0, image::Rgb([0, 0, 0]));
    frame.put_pixel(1, 0, image::Rgb([255, 255, 255]));
    let tensor = to_chw_tensor(&frame, &PASSTHROUGH_STATS).unwrap();
    assert_eq!(tensor.data()[0], 0.0);
    assert_eq!(tensor.data()[1], 1.0);
  }

  #[test]
  fn chw_layout_is_channel_major() {
    let mut frame = RgbImage::new(1, 1);
    frame.put_pixel(0, 0, image::Rgb([255, 0, 127]));
    let tensor = to_chw_tensor(&frame, &PASSTHROUGH_STATS).unwrap();
    let data = tensor.data();
    assert_eq!(data[0], 1.0);
    assert_eq!(data[1], 0.0);
    assert!((data[2] - 127.0 / 255.0).abs() < 1e-6);
  }

  #[test]
  fn crop_takes_centered_square() {
    let frame = gradient_frame(100, 60);
    let cropped = crop_to_square(&frame);
    assert_eq!((cropped.width(), cropped.height()), (60, 60));
    // 中心裁剪从 x=20 开始
    assert_eq!(cropped.get_pixel(0, 0)[0], frame.get_pixel(20, 0)[0]);
  }

  #[test]
  fn quarter_turns_swap_dimensions() {
    let frame = gradient_frame(40, 20);
    let r90 = rotate_frame(&frame, 90);
    assert_eq!((r90.width(), r90.height()), (20, 40));
    let r180 = rotate_frame(&frame, 180);
    assert_eq!((r180.width(), r180.height()), (40, 20));
    let r_neg = rotate_frame(&frame, -90);
    assert_eq!((r_neg.width(), r_neg.height()), (20, 40));
  }

  #[test]
  fn arbitrary_rotation_expands_bounding_box() {
    let frame = gradient_frame(40, 20);
    let rotated = rotate_frame(&frame, 45);
    assert!(rotated.width() >= 40 && rotated.height() >= 20);
  }

  #[test]
  fn invalid_target_size_is_rejected() {
    let frame = gradient_frame(8, 8);
    assert!(matches!(
      preprocess(&frame, (0, 24), false, 0, &PASSTHROUGH_STATS),
      Err(PreprocessError::InvalidTargetSize(0, 24))
    ));
    let empty = RgbImage::new(0, 0);
    assert!(matches!(
      preprocess(&empty, (8, 8), false, 0, &PASSTHROUGH_STATS),
      Err(PreprocessError::EmptyFrame)
    ));
  }

  #[test]
  fn normalize_array_spans_unit_interval() {
    let normalized = normalize_array(&[2.0, 4.0, 6.0]);
    assert_eq!(normalized, vec![0.0, 0.5, 1.0]);
  }

  #[test]
  fn normalize_array_constant_input_ties_to_half() {
    let normalized = normalize_array(&[3.0, 3.0, 3.0]);
    assert_eq!(normalized, vec![0.5, 0.5, 0.5]);
  }
}
