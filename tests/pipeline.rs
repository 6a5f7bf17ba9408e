// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// tests/pipeline.rs - 逐帧处理流程的集成测试
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

use std::{
  cell::Cell,
  fs,
  path::Path,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
};

use image::RgbImage;
use tract_onnx::prelude::tract_ndarray::Array2;

use shanan_video::{
  config::{ClassNames, Palette},
  frame::{Frame, PreparedFrame},
  model::{BOX_ATTRS, DetectResult, Model, RawPrediction},
  output::{
    Control, Draw, FrameSink, OutputError, PredictionLog, PredictionRecord, RecordOutput, Render,
  },
  postprocess::Thresholds,
  task::{ContinuousTask, Task},
};

const CLASSES: usize = 2;
const INPUT_DIM: u32 = 416;

#[derive(Debug, thiserror::Error)]
#[error("模拟推理失败")]
struct MockError;

/// 每帧返回同一组候选框，可在指定帧失败
struct MockModel {
  rows: Vec<[f32; BOX_ATTRS + CLASSES]>,
  fail_at: Option<usize>,
  calls: Cell<usize>,
}

impl MockModel {
  fn empty() -> Self {
    Self {
      rows: vec![[0.0; BOX_ATTRS + CLASSES]],
      fail_at: None,
      calls: Cell::new(0),
    }
  }

  fn with_rows(rows: Vec<[f32; BOX_ATTRS + CLASSES]>) -> Self {
    Self {
      rows,
      ..Self::empty()
    }
  }
}

impl Model for MockModel {
  type Error = MockError;

  fn input_dim(&self) -> u32 {
    INPUT_DIM
  }

  fn infer(&self, input: PreparedFrame) -> Result<RawPrediction, Self::Error> {
    let call = self.calls.get();
    self.calls.set(call + 1);
    if self.fail_at == Some(call) {
      return Err(MockError);
    }

    let dim = INPUT_DIM as usize;
    assert_eq!(input.shape(), &[1, 3, dim, dim]);

    let flat: Vec<f32> = self.rows.iter().flatten().copied().collect();
    let rows = Array2::from_shape_vec((self.rows.len(), BOX_ATTRS + CLASSES), flat).unwrap();
    Ok(RawPrediction::new(rows))
  }
}

#[derive(Debug, Default)]
struct SinkState {
  frames: Vec<(u32, u32)>,
  finished: bool,
}

#[derive(Clone, Default)]
struct MockSink(Arc<Mutex<SinkState>>);

impl FrameSink for MockSink {
  type Error = OutputError;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    self.0.lock().unwrap().frames.push(image.dimensions());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    self.0.lock().unwrap().finished = true;
    Ok(())
  }
}

/// 在第 `quit_after` 帧后要求退出
struct QuitAfter {
  quit_after: u64,
  rendered: Arc<Mutex<u64>>,
  finished: Arc<AtomicBool>,
}

impl Render for QuitAfter {
  type Error = OutputError;

  fn render_result(&mut self, _frame: Frame, _result: &DetectResult) -> Result<Control, Self::Error> {
    let mut rendered = self.rendered.lock().unwrap();
    *rendered += 1;
    if *rendered >= self.quit_after {
      Ok(Control::Quit)
    } else {
      Ok(Control::Continue)
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    self.finished.store(true, Ordering::SeqCst);
    Ok(())
  }
}

fn frames(count: u64) -> Vec<Frame> {
  (0..count)
    .map(|index| Frame::new(RgbImage::new(640, 480), index, index * 40))
    .collect()
}

fn draw() -> Draw {
  Draw::new(["a", "b"].into_iter().collect::<ClassNames>(), Palette::default(), None)
}

fn record_output(log_path: &Path) -> (RecordOutput<MockSink>, MockSink) {
  let sink = MockSink::default();
  let log = PredictionLog::create(log_path).unwrap();
  (RecordOutput::new(draw(), sink.clone(), log), sink)
}

fn read_records(path: &Path) -> Vec<PredictionRecord> {
  fs::read_to_string(path)
    .unwrap()
    .lines()
    .map(|line| serde_json::from_str(line).unwrap())
    .collect()
}

#[test]
fn ten_frames_without_detections_write_ten_frames_and_ten_lines() {
  let dir = tempfile::tempdir().unwrap();
  let log_path = dir.path().join("predictions_clip.jsonl");
  let (output, sink) = record_output(&log_path);

  let summary = ContinuousTask::new(Thresholds::default())
    .run_task(frames(10).into_iter(), MockModel::empty(), output)
    .unwrap();

  assert_eq!(summary.frames, 10);
  assert_eq!(summary.detections, 0);

  let state = sink.0.lock().unwrap();
  assert_eq!(state.frames, vec![(640, 480); 10]);
  assert!(state.finished);

  let records = read_records(&log_path);
  assert_eq!(records.len(), 10);
  for (i, record) in records.iter().enumerate() {
    assert_eq!(record.frame, i as u64);
    assert!(record.predictions.is_empty());
  }
}

#[test]
fn detections_are_rescaled_and_clamped_to_the_frame() {
  let dir = tempfile::tempdir().unwrap();
  let log_path = dir.path().join("predictions_clip.jsonl");
  let (output, _sink) = record_output(&log_path);

  // 居中的 500x500 框超出网络输入范围
  let model = MockModel::with_rows(vec![[208.0, 208.0, 500.0, 500.0, 0.9, 0.1, 0.8]]);
  let summary = ContinuousTask::new(Thresholds::default())
    .run_task(frames(1).into_iter(), model, output)
    .unwrap();

  assert_eq!(summary.detections, 1);
  let records = read_records(&log_path);
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].predictions.len(), 1);
  assert_eq!(records[0].predictions[0].label, "b");
  assert_eq!(records[0].predictions[0].coordinates, [[0, 0], [640, 480]]);
}

#[test]
fn worked_example_box_maps_back_to_frame_pixels() {
  let dir = tempfile::tempdir().unwrap();
  let log_path = dir.path().join("predictions_clip.jsonl");
  let (output, _sink) = record_output(&log_path);

  // 网络坐标 (100, 100, 200, 200)
  let model = MockModel::with_rows(vec![[150.0, 150.0, 100.0, 100.0, 0.9, 0.9, 0.1]]);
  ContinuousTask::new(Thresholds::default())
    .run_task(frames(1).into_iter(), model, output)
    .unwrap();

  let records = read_records(&log_path);
  assert_eq!(records[0].predictions[0].label, "a");
  assert_eq!(records[0].predictions[0].coordinates, [[153, 73], [307, 227]]);
}

#[test]
fn max_frames_limits_the_run() {
  let dir = tempfile::tempdir().unwrap();
  let log_path = dir.path().join("log.jsonl");
  let (output, sink) = record_output(&log_path);

  let summary = ContinuousTask::new(Thresholds::default())
    .with_max_frames(Some(4))
    .run_task(frames(10).into_iter(), MockModel::empty(), output)
    .unwrap();

  assert_eq!(summary.frames, 4);
  assert_eq!(sink.0.lock().unwrap().frames.len(), 4);
  assert_eq!(read_records(&log_path).len(), 4);
}

#[test]
fn quit_stops_early_and_still_finishes_output() {
  let rendered = Arc::new(Mutex::new(0));
  let finished = Arc::new(AtomicBool::new(false));
  let output = QuitAfter {
    quit_after: 3,
    rendered: rendered.clone(),
    finished: finished.clone(),
  };

  let summary = ContinuousTask::new(Thresholds::default())
    .run_task(frames(10).into_iter(), MockModel::empty(), output)
    .unwrap();

  assert_eq!(summary.frames, 3);
  assert_eq!(*rendered.lock().unwrap(), 3);
  assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn stop_flag_ends_the_run_before_the_next_frame() {
  let dir = tempfile::tempdir().unwrap();
  let log_path = dir.path().join("log.jsonl");
  let (output, sink) = record_output(&log_path);

  let stop = Arc::new(AtomicBool::new(true));
  let summary = ContinuousTask::new(Thresholds::default())
    .with_stop_flag(stop)
    .run_task(frames(5).into_iter(), MockModel::empty(), output)
    .unwrap();

  assert_eq!(summary.frames, 0);
  assert!(sink.0.lock().unwrap().finished);
  assert!(read_records(&log_path).is_empty());
}

#[test]
fn inference_failure_aborts_but_keeps_written_output() {
  let dir = tempfile::tempdir().unwrap();
  let log_path = dir.path().join("log.jsonl");
  let (output, sink) = record_output(&log_path);

  let model = MockModel {
    fail_at: Some(2),
    ..MockModel::empty()
  };
  let result = ContinuousTask::new(Thresholds::default()).run_task(
    frames(10).into_iter(),
    model,
    output,
  );

  assert!(result.is_err());
  let state = sink.0.lock().unwrap();
  assert_eq!(state.frames.len(), 2);
  assert!(state.finished);
  assert_eq!(read_records(&log_path).len(), 2);
}
