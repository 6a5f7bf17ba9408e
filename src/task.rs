// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/task.rs - 逐帧处理任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  model::Model,
  output::{Control, Render},
  postprocess::{Thresholds, filter_detections, rescale_detections},
  preprocess::prepare_frame,
};

/// 第二次中断前等待的时间，超时后强制退出
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<TaskSummary, Self::Error>;
}

/// 任务结束时的统计
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TaskSummary {
  /// 已处理的帧数，包括没有检测结果的帧
  pub frames: u64,
  pub detections: usize,
  pub elapsed: Duration,
}

impl TaskSummary {
  pub fn average_fps(&self) -> f64 {
    fps(self.frames, self.elapsed)
  }
}

fn fps(frames: u64, elapsed: Duration) -> f64 {
  let secs = elapsed.as_secs_f64();
  if secs > 0.0 { frames as f64 / secs } else { 0.0 }
}

/// 安装 Ctrl-C 处理函数，返回中断标志
///
/// 每个进程只能安装一次。收到中断后 30 秒内任务仍未结束则强制退出。
pub fn install_interrupt_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
  let stop = Arc::new(AtomicBool::new(false));
  let flag = stop.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(stop)
}

/// 逐帧处理视频直到流结束、用户退出或收到中断
#[derive(Debug, Default)]
pub struct ContinuousTask {
  thresholds: Thresholds,
  max_frames: Option<u64>,
  stop: Option<Arc<AtomicBool>>,
}

impl ContinuousTask {
  pub fn new(thresholds: Thresholds) -> Self {
    Self {
      thresholds,
      ..Default::default()
    }
  }

  /// 处理指定帧数后结束，`None` 表示不限制
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = Some(stop);
    self
  }

  fn interrupted(&self) -> bool {
    self
      .stop
      .as_ref()
      .is_some_and(|stop| stop.load(Ordering::SeqCst))
  }

  fn process<I, M, O>(
    &self,
    input: I,
    model: &M,
    output: &mut O,
    summary: &mut TaskSummary,
    start: Instant,
  ) -> anyhow::Result<()>
  where
    I: Iterator<Item = Frame>,
    M: Model,
    M::Error: std::error::Error + Sync + Send + 'static,
    O: Render,
    O::Error: std::error::Error + Sync + Send + 'static,
  {
    for frame in input {
      if self.interrupted() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      let index = frame.index;
      let now = Instant::now();
      let prepared = prepare_frame(&frame, model.input_dim());
      let letterbox = *prepared.letterbox();
      let raw = model
        .infer(prepared)
        .with_context(|| format!("第 {} 帧推理失败", index))?;
      let elapsed_infer = now.elapsed();

      let mut result = filter_detections(&raw, self.thresholds);
      if !result.is_empty() {
        rescale_detections(&mut result, &letterbox);
      }
      summary.detections += result.len();
      let detections = result.len();

      let control = output
        .render_result(frame, &result)
        .with_context(|| format!("第 {} 帧输出失败", index))?;

      summary.frames += 1;
      debug!(
        "第 {} 帧推理耗时: {:.2?} / {:.2?}",
        index,
        elapsed_infer,
        now.elapsed()
      );
      info!(
        "第 {} 帧: {} 个目标，FPS {:5.2}",
        index,
        detections,
        fps(summary.frames, start.elapsed())
      );

      if control == Control::Quit {
        info!("用户请求退出，结束任务循环");
        break;
      }
      if self.max_frames.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
    }
    Ok(())
  }
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = Frame>,
  M: Model,
  M::Error: std::error::Error + Sync + Send + 'static,
  O: Render,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, mut output: O) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let start = Instant::now();
    let mut summary = TaskSummary::default();

    let processed = self.process(input, &model, &mut output, &mut summary, start);
    summary.elapsed = start.elapsed();

    // 无论循环是否出错都要关闭输出
    let finished = output.finish().context("关闭输出失败");
    match (processed, finished) {
      (Err(e), Err(finish_error)) => {
        warn!("{:#}", finish_error);
        Err(e)
      }
      (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
      (Ok(()), Ok(())) => {
        info!(
          "任务完成: {} 帧，{} 个目标，平均 FPS {:.2}",
          summary.frames,
          summary.detections,
          summary.average_fps()
        );
        Ok(summary)
      }
    }
  }
}
