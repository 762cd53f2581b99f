// 该文件是 Chawei （察微） 项目的一部分。
// src/visualize.rs - 热图可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};

/// 叠加热图时的基准透明度（0-255）
pub const DEFAULT_OVERLAY_ALPHA: u8 = 128;

/// 四段色带：蓝→青→绿→黄→红，输入限定在 [0,1]
pub fn heat_map_color(value: f32) -> Rgb<u8> {
  let v = value.clamp(0.0, 1.0);
  if v < 0.25 {
    // 蓝到青
    let green = (v * 4.0 * 255.0) as u8;
    Rgb([0, green, 255])
  } else if v < 0.5 {
    // 青到绿
    let factor = (v - 0.25) * 4.0;
    let blue = ((1.0 - factor) * 255.0) as u8;
    Rgb([0, 255, blue])
  } else if v < 0.75 {
    // 绿到黄
    let factor = (v - 0.5) * 4.0;
    let red = (factor * 255.0) as u8;
    Rgb([red, 255, 0])
  } else {
    // 黄到红
    let factor = (v - 0.75) * 4.0;
    let green = ((1.0 - factor) * 255.0) as u8;
    Rgb([255, green, 0])
  }
}

/// 将热图网格按原图尺寸逐轴放大（最近邻块填充）并按像素透明度
/// 合成到原图副本上，低异常值的格子近乎透明。原图不被修改。
pub fn overlay_heatmap(
  original: &RgbImage,
  heatmap: &[f32],
  heatmap_width: u32,
  heatmap_height: u32,
  base_alpha: u8,
) -> RgbImage {
  let mut output = original.clone();
  if heatmap_width == 0 || heatmap_height == 0 || heatmap.is_empty() {
    return output;
  }

  let width = output.width();
  let height = output.height();

  for py in 0..height {
    let hy = (py as u64 * heatmap_height as u64 / height as u64) as u32;
    for px in 0..width {
      let hx = (px as u64 * heatmap_width as u64 / width as u64) as u32;
      let index = (hy * heatmap_width + hx) as usize;
      let Some(&value) = heatmap.get(index) else {
        continue;
      };

      let color = heat_map_color(value);
      let alpha = ((value * base_alpha as f32) as i32).clamp(0, base_alpha as i32) as u16;

      let pixel = output.get_pixel_mut(px, py);
      for c in 0..3 {
        let blended =
          (color[c] as u16 * alpha + pixel[c] as u16 * (255 - alpha) + 127) / 255;
        pixel[c] = blended as u8;
      }
    }
  }

  output
}

#[cfg(feature = "annotate")]
mod annotate {
  use ab_glyph::{FontArc, InvalidFont, PxScale};
  use image::{Rgb, RgbImage};
  use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
  use imageproc::rect::Rect;

  use crate::model::{DetectionResult, Label};

  // 标签文本渲染常量
  const LABEL_FONT_SIZE: f32 = 20.0;
  const LABEL_TEXT_HEIGHT: i32 = 24;
  const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
  const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
  const NORMAL_COLOR: [u8; 3] = [0, 160, 0];
  const ANOMALOUS_COLOR: [u8; 3] = [200, 0, 0];

  /// 在叠加图左上角绘制标签与校准分数。
  ///
  /// 字体由调用方提供，库内不内嵌字体文件。
  pub struct Annotator {
    font: FontArc,
    font_scale: PxScale,
  }

  impl Annotator {
    pub fn new(font: FontArc) -> Self {
      Self {
        font,
        font_scale: PxScale::from(LABEL_FONT_SIZE),
      }
    }

    pub fn from_font_bytes(bytes: Vec<u8>) -> Result<Self, InvalidFont> {
      Ok(Self::new(FontArc::try_from_vec(bytes)?))
    }

    pub fn annotate(&self, image: &mut RgbImage, result: &DetectionResult) {
      let label = format!("{} {:.2}", result.label, result.score);

      let background = match result.label {
        Label::Normal => NORMAL_COLOR,
        Label::Anomalous => ANOMALOUS_COLOR,
      };

      let text_width = (label.len() as f32 * LABEL_CHAR_WIDTH) as u32;
      let width = text_width.min(image.width().saturating_sub(1)).max(1);
      let height = (LABEL_TEXT_HEIGHT as u32).min(image.height().saturating_sub(1)).max(1);

      let rect = Rect::at(0, 0).of_size(width, height);
      draw_filled_rect_mut(image, rect, Rgb(background));

      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        0,
        LABEL_TEXT_VERTICAL_PADDING,
        self.font_scale,
        &self.font,
        &label,
      );
    }
  }
}

#[cfg(feature = "annotate")]
pub use self::annotate::Annotator;
