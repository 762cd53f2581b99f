// 该文件是 Chawei （察微） 项目的一部分。
// src/tensor.rs - NCHW 张量定义
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

use thiserror::Error;

/// 张量形状，依次为 [batch, channels, height, width]
pub type Shape = [usize; 4];

#[derive(Error, Debug)]
pub enum TensorError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 拥有数据所有权的 NCHW 浮点张量。
///
/// 张量同一时刻只有一个持有者：预处理阶段创建，引擎消费并返回新的输出张量，
/// 后处理阶段消费。释放即 drop。
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  data: Box<[f32]>,
  shape: Shape,
}

impl Tensor {
  pub fn new(data: Vec<f32>, shape: Shape) -> Result<Self, TensorError> {
    let expected = shape.iter().product();
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      shape,
    })
  }

  pub fn shape(&self) -> Shape {
    self.shape
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  /// 消费张量，取出内部数据
  pub fn into_data(self) -> Box<[f32]> {
    self.data
  }

  /// 标量张量的首个元素
  pub fn scalar(&self) -> Option<f32> {
    self.data.first().copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_checks_length_against_shape() {
    assert!(Tensor::new(vec![0.0; 12], [1, 3, 2, 2]).is_ok());
    assert!(matches!(
      Tensor::new(vec![0.0; 11], [1, 3, 2, 2]),
      Err(TensorError::LengthMismatch {
        expected: 12,
        actual: 11
      })
    ));
  }

  #[test]
  fn scalar_reads_first_element() {
    let t = Tensor::new(vec![0.25], [1, 1, 1, 1]).unwrap();
    assert_eq!(t.scalar(), Some(0.25));
  }
}
