// 该文件是 Chawei （察微） 项目的一部分。
// src/engine.rs - 推理引擎边界
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;

use crate::tensor::Tensor;

/// 检测器输入张量的固定名称
pub const INPUT_NAME: &str = "input";

/// 推理引擎边界。
///
/// 引擎本身不在本库范围内，这里只约定契约：加载模型得到句柄，
/// 按名称喂入张量并按名称取回输出张量，用完关闭句柄。
/// 引擎环境由检测器显式持有，句柄先于环境释放。
pub trait InferenceEngine {
  type Handle;
  type Error: std::error::Error + Send + Sync + 'static;

  /// 从模型文件字节加载模型
  fn load_model(&mut self, artifact: &[u8]) -> Result<Self::Handle, Self::Error>;

  /// 同步执行一次推理，消费输入张量，返回命名输出张量
  fn run(
    &mut self,
    handle: &mut Self::Handle,
    inputs: HashMap<String, Tensor>,
  ) -> Result<HashMap<String, Tensor>, Self::Error>;

  /// 释放模型句柄
  fn close_handle(&mut self, handle: Self::Handle);
}

#[cfg(feature = "replay_engine")]
mod replay {
  use std::collections::HashMap;
  use std::path::Path;

  use serde::Deserialize;
  use thiserror::Error;
  use tracing::{debug, info};
  use url::Url;

  use crate::tensor::{Shape, Tensor, TensorError};
  use crate::{FromUrl, FromUrlWithScheme};

  use super::InferenceEngine;

  #[derive(Error, Debug)]
  pub enum ReplayEngineError {
    #[error("URI 方案不匹配: {0}")]
    SchemeMismatch(String),
    #[error("I/O 错误: {0}")]
    IoError(#[from] std::io::Error),
    #[error("回放文件解析错误: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("回放张量无效: {name}: {source}")]
    InvalidTensor {
      name: String,
      source: TensorError,
    },
  }

  #[derive(Deserialize)]
  struct ReplayTensor {
    shape: Shape,
    data: Vec<f32>,
  }

  #[derive(Deserialize)]
  struct ReplayCapture {
    outputs: HashMap<String, ReplayTensor>,
  }

  /// 回放引擎：从 JSON 采集文件回放录制好的输出张量。
  ///
  /// 不做任何真实推理，用于离线标定、演示和集成测试。
  /// 模型文件内容被忽略，占位文件即可。
  pub struct ReplayEngine {
    outputs: HashMap<String, Tensor>,
  }

  impl ReplayEngine {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ReplayEngineError> {
      let raw = std::fs::read(path.as_ref())?;
      let capture: ReplayCapture = serde_json::from_slice(&raw)?;

      let mut outputs = HashMap::with_capacity(capture.outputs.len());
      for (name, tensor) in capture.outputs {
        let tensor = Tensor::new(tensor.data, tensor.shape)
          .map_err(|source| ReplayEngineError::InvalidTensor {
            name: name.clone(),
            source,
          })?;
        debug!("回放输出 '{}': 形状 {:?}", name, tensor.shape());
        outputs.insert(name, tensor);
      }

      info!(
        "回放采集文件加载完成: {} 个输出张量",
        outputs.len()
      );

      Ok(ReplayEngine { outputs })
    }
  }

  impl FromUrlWithScheme for ReplayEngine {
    const SCHEME: &'static str = "replay";
  }

  impl FromUrl for ReplayEngine {
    type Error = ReplayEngineError;

    fn from_url(url: &Url) -> Result<Self, Self::Error> {
      if url.scheme() != Self::SCHEME {
        return Err(ReplayEngineError::SchemeMismatch(url.scheme().to_string()));
      }
      Self::from_path(url.path())
    }
  }

  impl InferenceEngine for ReplayEngine {
    type Handle = ();
    type Error = ReplayEngineError;

    fn load_model(&mut self, artifact: &[u8]) -> Result<Self::Handle, Self::Error> {
      debug!("回放引擎忽略模型文件内容: {} 字节", artifact.len());
      Ok(())
    }

    fn run(
      &mut self,
      _handle: &mut Self::Handle,
      inputs: HashMap<String, Tensor>,
    ) -> Result<HashMap<String, Tensor>, Self::Error> {
      debug!("回放引擎收到 {} 个输入张量", inputs.len());
      drop(inputs);
      Ok(self.outputs.clone())
    }

    fn close_handle(&mut self, _handle: Self::Handle) {}
  }
}

#[cfg(feature = "replay_engine")]
pub use self::replay::{ReplayEngine, ReplayEngineError};
