// 该文件是 Chawei （察微） 项目的一部分。
// src/detector.rs - 异常检测器编排
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::engine::{INPUT_NAME, InferenceEngine};
use crate::listener::{DefaultDetectorListener, DetectorListener};
use crate::model::{DetectionModel, DetectionResult};
use crate::preprocess;
use crate::processing::{self, ProcessingError, ProcessingStrategy};

const DEFAULT_ARTIFACT_DIR: &str = "models";

#[derive(Error, Debug)]
pub enum DetectorError<E: std::error::Error + Send + Sync + 'static> {
  #[error("检测器未初始化")]
  NotInitialized,
  #[error("模型文件读取失败: {}: {source}", path.display())]
  ArtifactRead {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("引擎错误: {0}")]
  Engine(#[source] E),
  #[error("处理错误: {0}")]
  Processing(#[from] ProcessingError),
}

enum DetectorState<H> {
  Uninitialized,
  Initialized {
    handle: H,
    strategy: Box<dyn ProcessingStrategy>,
    model: DetectionModel,
  },
  Closed,
}

/// 异常检测器：持有引擎环境与当前处理策略，编排
/// 预处理 → 推理 → 后处理，并把结果或错误上报给监听器。
///
/// 状态机 未初始化 → 已初始化 → 已关闭；`initialize` 可从任意状态
/// 重新进入已初始化（先释放旧资源），`close` 幂等。所有操作都要求
/// `&mut self`，同一实例上 `detect` 与 `close` 不可能并发。
pub struct AnomalyDetector<E: InferenceEngine> {
  engine: E,
  state: DetectorState<E::Handle>,
  listener: Arc<dyn DetectorListener>,
  artifact_dir: PathBuf,
}

impl<E: InferenceEngine> AnomalyDetector<E> {
  pub fn builder(engine: E) -> AnomalyDetectorBuilder<E> {
    AnomalyDetectorBuilder {
      engine,
      listener: None,
      model: None,
      artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
    }
  }

  pub fn new(engine: E, listener: Arc<dyn DetectorListener>) -> Self {
    Self {
      engine,
      state: DetectorState::Uninitialized,
      listener,
      artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
    }
  }

  /// 用指定模型初始化检测器。
  ///
  /// 先释放现有引擎句柄与策略，再按模型标签选择策略与模型文件并加载。
  /// 失败时检测器回到等价于未初始化的状态，并返回错误。
  pub fn initialize(&mut self, model: DetectionModel) -> Result<(), DetectorError<E::Error>> {
    self.release_current();

    let strategy = processing::strategy_for(&model)?;

    let path = self.artifact_dir.join(model.artifact_name());
    info!("加载模型文件: {}", path.display());
    let artifact = std::fs::read(&path).map_err(|source| {
      error!("模型文件读取失败: {}: {}", path.display(), source);
      DetectorError::ArtifactRead { path, source }
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      artifact.len() as f64 / (1024.0 * 1024.0)
    );

    let handle = self.engine.load_model(&artifact).map_err(|e| {
      error!("引擎加载模型失败: {}", e);
      DetectorError::Engine(e)
    })?;

    self.state = DetectorState::Initialized {
      handle,
      strategy,
      model: model.clone(),
    };
    info!("检测器初始化完成: 模型 {}", model.name());

    Ok(())
  }

  /// 对一帧执行检测。
  ///
  /// 仅在已初始化状态下有效，否则上报错误且状态不变。每次调用
  /// 恰好触发一次 `on_results` 或一次 `on_error`，二者不会同时发生。
  pub fn detect(&mut self, frame: &RgbImage, rotation: i32) {
    let DetectorState::Initialized {
      handle, strategy, ..
    } = &mut self.state
    else {
      self.listener.on_error("检测器未初始化");
      return;
    };

    let started = Instant::now();
    let outcome = run_pipeline(&mut self.engine, handle, strategy.as_ref(), frame, rotation);
    let elapsed = started.elapsed();

    match outcome {
      Ok(result) => {
        debug!(
          "检测完成: 标签 {}, 分数 {:.4}, 耗时 {:.2?}",
          result.label, result.score, elapsed
        );
        self
          .listener
          .on_results(&result, elapsed, frame.height(), frame.width());
      }
      Err(e) => {
        error!("检测失败: {}", e);
        self.listener.on_error(&format!("检测失败: {e}"));
      }
    }
  }

  /// 用当前策略把结果热图叠加到原始帧上
  pub fn visualize_result(
    &self,
    original: &RgbImage,
    result: &DetectionResult,
  ) -> Result<RgbImage, DetectorError<E::Error>> {
    let DetectorState::Initialized { strategy, .. } = &self.state else {
      return Err(DetectorError::NotInitialized);
    };
    Ok(strategy.visualize_result(original, result)?)
  }

  /// 释放引擎资源，任意状态进入已关闭，幂等
  pub fn close(&mut self) {
    self.release_current();
    self.state = DetectorState::Closed;
    debug!("检测器已关闭");
  }

  pub fn is_initialized(&self) -> bool {
    matches!(self.state, DetectorState::Initialized { .. })
  }

  pub fn current_model(&self) -> Option<&DetectionModel> {
    match &self.state {
      DetectorState::Initialized { model, .. } => Some(model),
      _ => None,
    }
  }

  pub fn input_size(&self) -> Option<(u32, u32)> {
    self.current_model().map(DetectionModel::input_size)
  }

  fn release_current(&mut self) {
    if let DetectorState::Initialized { handle, .. } =
      std::mem::replace(&mut self.state, DetectorState::Uninitialized)
    {
      self.engine.close_handle(handle);
    }
  }
}

fn run_pipeline<E: InferenceEngine>(
  engine: &mut E,
  handle: &mut E::Handle,
  strategy: &dyn ProcessingStrategy,
  frame: &RgbImage,
  rotation: i32,
) -> Result<DetectionResult, DetectorError<E::Error>> {
  // 先做整幅旋转校正，临时帧在本函数结束时随所有退出路径释放
  let rotated = (rotation.rem_euclid(360) != 0).then(|| preprocess::rotate_frame(frame, rotation));
  let input_frame = rotated.as_ref().unwrap_or(frame);

  let tensor = strategy.preprocess(input_frame)?;

  let mut inputs = HashMap::with_capacity(1);
  inputs.insert(INPUT_NAME.to_string(), tensor);
  let outputs = engine.run(handle, inputs).map_err(DetectorError::Engine)?;

  Ok(strategy.postprocess(outputs)?)
}

pub struct AnomalyDetectorBuilder<E: InferenceEngine> {
  engine: E,
  listener: Option<Arc<dyn DetectorListener>>,
  model: Option<DetectionModel>,
  artifact_dir: PathBuf,
}

impl<E: InferenceEngine> AnomalyDetectorBuilder<E> {
  pub fn listener(mut self, listener: Arc<dyn DetectorListener>) -> Self {
    self.listener = Some(listener);
    self
  }

  /// 构建后立即用该模型初始化
  pub fn model(mut self, model: DetectionModel) -> Self {
    self.model = Some(model);
    self
  }

  /// 模型文件所在目录，默认 `models`
  pub fn artifact_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
    self.artifact_dir = dir.into();
    self
  }

  pub fn build(self) -> Result<AnomalyDetector<E>, DetectorError<E::Error>> {
    let listener = self
      .listener
      .unwrap_or_else(|| Arc::new(DefaultDetectorListener));

    let mut detector = AnomalyDetector {
      engine: self.engine,
      state: DetectorState::Uninitialized,
      listener,
      artifact_dir: self.artifact_dir,
    };

    if let Some(model) = self.model {
      detector.initialize(model)?;
    }

    Ok(detector)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Label;
  use crate::tensor::Tensor;
  use std::sync::Mutex;
  use std::time::Duration;

  #[derive(Error, Debug)]
  #[error("桩引擎错误: {0}")]
  struct StubError(&'static str);

  #[derive(Default)]
  struct StubStats {
    loaded: usize,
    closed: usize,
    runs: usize,
  }

  /// 返回固定输出的桩引擎，记录句柄生命周期
  struct StubEngine {
    outputs: HashMap<String, Tensor>,
    fail_run: bool,
    stats: Arc<Mutex<StubStats>>,
  }

  impl StubEngine {
    fn padim(map: Vec<f32>, score: f32) -> Self {
      let len = map.len();
      let mut outputs = HashMap::new();
      outputs.insert(
        "anomaly_map".to_string(),
        Tensor::new(map, [1, 1, 1, len]).unwrap(),
      );
      outputs.insert(
        "anomaly_score".to_string(),
        Tensor::new(vec![score], [1, 1, 1, 1]).unwrap(),
      );
      StubEngine {
        outputs,
        fail_run: false,
        stats: Arc::new(Mutex::new(StubStats::default())),
      }
    }
  }

  impl InferenceEngine for StubEngine {
    type Handle = u32;
    type Error = StubError;

    fn load_model(&mut self, _artifact: &[u8]) -> Result<Self::Handle, Self::Error> {
      let mut stats = self.stats.lock().unwrap();
      stats.loaded += 1;
      Ok(stats.loaded as u32)
    }

    fn run(
      &mut self,
      _handle: &mut Self::Handle,
      _inputs: HashMap<String, Tensor>,
    ) -> Result<HashMap<String, Tensor>, Self::Error> {
      self.stats.lock().unwrap().runs += 1;
      if self.fail_run {
        return Err(StubError("推理失败"));
      }
      Ok(self.outputs.clone())
    }

    fn close_handle(&mut self, _handle: Self::Handle) {
      self.stats.lock().unwrap().closed += 1;
    }
  }

  #[derive(Default)]
  struct RecordingListener {
    results: Mutex<Vec<DetectionResult>>,
    errors: Mutex<Vec<String>>,
  }

  impl DetectorListener for RecordingListener {
    fn on_results(&self, result: &DetectionResult, _: Duration, _: u32, _: u32) {
      self.results.lock().unwrap().push(result.clone());
    }

    fn on_error(&self, error: &str) {
      self.errors.lock().unwrap().push(error.to_string());
    }
  }

  fn artifact_dir() -> tempdir::TempDirLike {
    tempdir::TempDirLike::new()
  }

  // 简易临时目录，避免引入额外依赖
  mod tempdir {
    use std::path::PathBuf;

    pub struct TempDirLike {
      path: PathBuf,
    }

    impl TempDirLike {
      pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!(
          "chawei-test-{}-{:?}",
          std::process::id(),
          std::thread::current().id()
        ));
        std::fs::create_dir_all(&path).unwrap();
        for name in ["patchcore.onnx", "padim.onnx", "yolo.onnx"] {
          std::fs::write(path.join(name), b"stub").unwrap();
        }
        Self { path }
      }

      pub fn path(&self) -> &std::path::Path {
        &self.path
      }
    }

    impl Drop for TempDirLike {
      fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
      }
    }
  }

  #[test]
  fn detect_before_initialize_reports_error_without_state_change() {
    let listener = Arc::new(RecordingListener::default());
    let engine = StubEngine::padim(vec![0.3; 4], 0.2);
    let mut detector = AnomalyDetector::new(engine, listener.clone());

    let frame = RgbImage::new(8, 8);
    detector.detect(&frame, 0);

    assert!(!detector.is_initialized());
    assert_eq!(listener.errors.lock().unwrap().len(), 1);
    assert!(listener.results.lock().unwrap().is_empty());
  }

  #[test]
  fn successful_detect_reports_exactly_one_result() {
    let dir = artifact_dir();
    let listener = Arc::new(RecordingListener::default());
    let engine = StubEngine::padim(vec![0.3; 4], 0.2);
    let mut detector = AnomalyDetector::builder(engine)
      .listener(listener.clone())
      .artifact_dir(dir.path())
      .model(DetectionModel::padim())
      .build()
      .unwrap();

    assert!(detector.is_initialized());
    let frame = RgbImage::new(16, 16);
    detector.detect(&frame, 90);

    let results = listener.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].label, Label::Normal);
    assert_eq!(results[0].score, 0.2);
    assert_eq!(results[0].confidence, 0.0);
    assert!(listener.errors.lock().unwrap().is_empty());
  }

  #[test]
  fn engine_failure_becomes_single_error_callback() {
    let dir = artifact_dir();
    let listener = Arc::new(RecordingListener::default());
    let mut engine = StubEngine::padim(vec![0.3; 4], 0.2);
    engine.fail_run = true;
    let mut detector = AnomalyDetector::builder(engine)
      .listener(listener.clone())
      .artifact_dir(dir.path())
      .model(DetectionModel::padim())
      .build()
      .unwrap();

    detector.detect(&RgbImage::new(8, 8), 0);

    assert_eq!(listener.errors.lock().unwrap().len(), 1);
    assert!(listener.results.lock().unwrap().is_empty());
    // 失败不改变状态，可以继续调用
    assert!(detector.is_initialized());
  }

  #[test]
  fn reinitialize_releases_previous_handle() {
    let dir = artifact_dir();
    let engine = StubEngine::padim(vec![0.3; 4], 0.2);
    let stats = engine.stats.clone();
    let mut detector = AnomalyDetector::builder(engine)
      .artifact_dir(dir.path())
      .model(DetectionModel::padim())
      .build()
      .unwrap();

    detector.initialize(DetectionModel::patchcore()).unwrap();

    let stats = stats.lock().unwrap();
    assert_eq!(stats.loaded, 2);
    assert_eq!(stats.closed, 1);
  }

  #[test]
  fn close_is_idempotent_and_blocks_detect() {
    let dir = artifact_dir();
    let listener = Arc::new(RecordingListener::default());
    let engine = StubEngine::padim(vec![0.3; 4], 0.2);
    let stats = engine.stats.clone();
    let mut detector = AnomalyDetector::builder(engine)
      .listener(listener.clone())
      .artifact_dir(dir.path())
      .model(DetectionModel::padim())
      .build()
      .unwrap();

    detector.close();
    detector.close();
    assert_eq!(stats.lock().unwrap().closed, 1);
    assert!(!detector.is_initialized());
    assert_eq!(detector.current_model(), None);

    detector.detect(&RgbImage::new(8, 8), 0);
    assert_eq!(listener.errors.lock().unwrap().len(), 1);
  }

  #[test]
  fn missing_artifact_leaves_detector_uninitialized() {
    let listener = Arc::new(RecordingListener::default());
    let engine = StubEngine::padim(vec![0.3; 4], 0.2);
    let mut detector = AnomalyDetector::new(engine, listener);
    detector.artifact_dir = PathBuf::from("/nonexistent/chawei");

    let outcome = detector.initialize(DetectionModel::padim());
    assert!(matches!(
      outcome,
      Err(DetectorError::ArtifactRead { .. })
    ));
    assert!(!detector.is_initialized());
  }

  #[test]
  fn yolo_detect_yields_recoverable_error() {
    let dir = artifact_dir();
    let listener = Arc::new(RecordingListener::default());
    let engine = StubEngine::padim(vec![0.3; 4], 0.2);
    let mut detector = AnomalyDetector::builder(engine)
      .listener(listener.clone())
      .artifact_dir(dir.path())
      .model(DetectionModel::yolo())
      .build()
      .unwrap();

    assert!(detector.is_initialized());
    detector.detect(&RgbImage::new(8, 8), 0);
    assert_eq!(listener.errors.lock().unwrap().len(), 1);
    assert!(detector.is_initialized());
  }
}
