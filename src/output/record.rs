// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/output/record.rs - 写入模式：标注视频与预测日志
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

use tracing::{debug, warn};

use crate::{
  frame::Frame,
  model::DetectResult,
  output::{
    Control, FrameSink, OutputError, Render,
    draw::Draw,
    prediction_log::{PredictionLog, PredictionRecord},
  },
};

/// 每帧写入一帧视频和一行预测日志
pub struct RecordOutput<S: FrameSink> {
  draw: Draw,
  sink: S,
  log: PredictionLog,
}

impl<S: FrameSink> RecordOutput<S>
where
  S::Error: Into<OutputError>,
{
  pub fn new(draw: Draw, sink: S, log: PredictionLog) -> Self {
    Self { draw, sink, log }
  }
}

impl<S: FrameSink> Render for RecordOutput<S>
where
  S::Error: Into<OutputError>,
{
  type Error = OutputError;

  fn render_result(&mut self, frame: Frame, result: &DetectResult) -> Result<Control, Self::Error> {
    let Frame {
      mut image, index, ..
    } = frame;

    let predictions = if result.is_empty() {
      Vec::new()
    } else {
      self.draw.draw_detections(&mut image, result)
    };

    self.sink.write_frame(&image).map_err(Into::into)?;
    self.log.append(&PredictionRecord {
      frame: index,
      predictions,
    })?;
    debug!("第 {} 帧已写入", index);

    Ok(Control::Continue)
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    // 两个输出都要关闭，返回第一个错误
    let sink_result: Result<(), OutputError> = self.sink.finish().map_err(Into::into);
    let log_result = self.log.finish().map_err(OutputError::from);
    if let (Err(_), Err(e)) = (&sink_result, &log_result) {
      warn!("预测日志关闭失败: {}", e);
    }
    sink_result.and(log_result)
  }
}
