// 该文件是 Chawei （察微） 项目的一部分。
// src/listener.rs - 检测结果监听与聚合
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

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::DetectionResult;

/// 检测结果与错误的观察者。
///
/// 每次 `detect` 恰好触发 `on_results` 或 `on_error` 之一。
pub trait DetectorListener: Send + Sync {
  /// 一次检测成功完成
  fn on_results(
    &self,
    result: &DetectionResult,
    inference_time: Duration,
    image_height: u32,
    image_width: u32,
  );

  /// 检测过程中出错
  fn on_error(&self, error: &str);
}

/// 空实现，可用作测试或占位
#[derive(Default)]
pub struct DefaultDetectorListener;

impl DetectorListener for DefaultDetectorListener {
  fn on_results(&self, _: &DetectionResult, _: Duration, _: u32, _: u32) {}
  fn on_error(&self, _: &str) {}
}

/// 组合监听器：把每个结果或错误按注册顺序同步广播给当前全部观察者。
///
/// 注册表由互斥锁保护；广播前先快照监听器列表，回调不在锁内执行，
/// 因此监听器可以在自己的回调里再注册或注销。
#[derive(Default)]
pub struct CompositeDetectorListener {
  listeners: Mutex<Vec<Arc<dyn DetectorListener>>>,
}

impl CompositeDetectorListener {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_listener(&self, listener: Arc<dyn DetectorListener>) {
    self.listeners.lock().unwrap().push(listener);
  }

  pub fn remove_listener(&self, listener: &Arc<dyn DetectorListener>) {
    self
      .listeners
      .lock()
      .unwrap()
      .retain(|l| !Arc::ptr_eq(l, listener));
  }

  pub fn len(&self) -> usize {
    self.listeners.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn snapshot(&self) -> Vec<Arc<dyn DetectorListener>> {
    self.listeners.lock().unwrap().clone()
  }
}

impl DetectorListener for CompositeDetectorListener {
  fn on_results(
    &self,
    result: &DetectionResult,
    inference_time: Duration,
    image_height: u32,
    image_width: u32,
  ) {
    for listener in self.snapshot() {
      listener.on_results(result, inference_time, image_height, image_width);
    }
  }

  fn on_error(&self, error: &str) {
    for listener in self.snapshot() {
      listener.on_error(error);
    }
  }
}

#[derive(Default)]
struct PerfCounters {
  total_inference_time: Duration,
  inference_count: u64,
  errors: u64,
}

/// 性能统计监听器：累计推理耗时与错误数，可选转发给下游监听器
#[derive(Default)]
pub struct PerformanceMonitoringListener {
  counters: Mutex<PerfCounters>,
  delegate: Option<Arc<dyn DetectorListener>>,
}

impl PerformanceMonitoringListener {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delegate(delegate: Arc<dyn DetectorListener>) -> Self {
    Self {
      counters: Mutex::new(PerfCounters::default()),
      delegate: Some(delegate),
    }
  }

  /// 平均推理耗时，尚无样本时为零
  pub fn average_inference_time(&self) -> Duration {
    let counters = self.counters.lock().unwrap();
    if counters.inference_count > 0 {
      counters.total_inference_time / counters.inference_count as u32
    } else {
      Duration::ZERO
    }
  }

  /// 错误率 = 错误数 / (成功数 + 错误数)，尚无事件时为 0
  pub fn error_rate(&self) -> f32 {
    let counters = self.counters.lock().unwrap();
    let total = counters.inference_count + counters.errors;
    if total > 0 {
      counters.errors as f32 / total as f32
    } else {
      0.0
    }
  }

  /// 原子清零全部计数
  pub fn reset(&self) {
    *self.counters.lock().unwrap() = PerfCounters::default();
  }
}

impl DetectorListener for PerformanceMonitoringListener {
  fn on_results(
    &self,
    result: &DetectionResult,
    inference_time: Duration,
    image_height: u32,
    image_width: u32,
  ) {
    {
      let mut counters = self.counters.lock().unwrap();
      counters.total_inference_time += inference_time;
      counters.inference_count += 1;
    }

    if let Some(delegate) = &self.delegate {
      delegate.on_results(result, inference_time, image_height, image_width);
    }
  }

  fn on_error(&self, error: &str) {
    self.counters.lock().unwrap().errors += 1;

    if let Some(delegate) = &self.delegate {
      delegate.on_error(error);
    }
  }
}

/// 带元数据的检测记录
#[derive(Debug, Clone)]
pub struct DetectionRecord {
  pub result: DetectionResult,
  pub inference_time: Duration,
  pub image_height: u32,
  pub image_width: u32,
  pub timestamp: DateTime<Utc>,
}

const MAX_STORED_RESULTS: usize = 100;

/// 有界结果历史：保留最近 100 条记录，按到达顺序存放，
/// 超出容量时淘汰最旧一条（FIFO，不按访问重排）。
pub struct ResultStorageListener {
  records: Mutex<VecDeque<DetectionRecord>>,
}

impl Default for ResultStorageListener {
  fn default() -> Self {
    Self::new()
  }
}

impl ResultStorageListener {
  pub fn new() -> Self {
    Self {
      records: Mutex::new(VecDeque::with_capacity(MAX_STORED_RESULTS)),
    }
  }

  /// 当前全部记录的快照，按到达顺序
  pub fn records(&self) -> Vec<DetectionRecord> {
    self.records.lock().unwrap().iter().cloned().collect()
  }

  pub fn clear(&self) {
    self.records.lock().unwrap().clear();
  }
}

impl DetectorListener for ResultStorageListener {
  fn on_results(
    &self,
    result: &DetectionResult,
    inference_time: Duration,
    image_height: u32,
    image_width: u32,
  ) {
    let mut records = self.records.lock().unwrap();
    records.push_back(DetectionRecord {
      result: result.clone(),
      inference_time,
      image_height,
      image_width,
      timestamp: Utc::now(),
    });

    while records.len() > MAX_STORED_RESULTS {
      records.pop_front();
    }
  }

  fn on_error(&self, _error: &str) {}
}
