// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/output.rs - 输出定义
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

use crate::{frame::Frame, model::DetectResult};

/// 渲染后是否继续处理下一帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
  Continue,
  /// 用户要求提前结束
  Quit,
}

pub trait Render {
  type Error;

  /// 绘制并输出一帧；检测结果的坐标须已还原到帧坐标
  fn render_result(&mut self, frame: Frame, result: &DetectResult) -> Result<Control, Self::Error>;

  /// 刷新并关闭所有输出，可重复调用
  fn finish(&mut self) -> Result<(), Self::Error>;
}

/// 接收绘制完成的帧的视频写入端
pub trait FrameSink {
  type Error;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error>;

  fn finish(&mut self) -> Result<(), Self::Error>;
}

pub mod draw;
pub mod fourcc;
pub mod prediction_log;
mod record;

pub use self::draw::{ColorMode, Draw, DrawError};
pub use self::fourcc::{FourccError, VideoCodec};
pub use self::prediction_log::{Prediction, PredictionLog, PredictionLogError, PredictionRecord};
pub use self::record::RecordOutput;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display_output::{GStreamerDisplayOutput, GStreamerDisplayOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("预测日志错误: {0}")]
  PredictionLogError(#[from] PredictionLogError),
  #[error("无法创建输出目录 {path}: {source}")]
  OutputDirError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 显示输出错误: {0}")]
  GStreamerDisplayOutputError(#[from] GStreamerDisplayOutputError),
}

/// 写入模式下的输出文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
  pub video: PathBuf,
  pub predictions: PathBuf,
}

impl OutputPaths {
  /// `result_<stem>.avi` 与 `predictions_<stem>.jsonl`
  pub fn new(output_dir: &Path, input: &Path) -> Self {
    let stem = input
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| "video".to_string());
    Self {
      video: output_dir.join(format!("result_{}.avi", stem)),
      predictions: output_dir.join(format!("predictions_{}.jsonl", stem)),
    }
  }
}

pub fn prepare_output_dir(output_dir: &Path) -> Result<(), OutputError> {
  std::fs::create_dir_all(output_dir).map_err(|source| OutputError::OutputDirError {
    path: output_dir.to_path_buf(),
    source,
  })
}

/// 输出方式的选择
#[derive(Debug, Clone)]
pub struct OutputSettings {
  /// 为 `true` 时写入视频与预测日志，否则交互显示
  pub write_output: bool,
  pub output_dir: PathBuf,
  pub codec: VideoCodec,
}

#[cfg(feature = "gstreamer_output")]
pub enum OutputWrapper {
  Record(RecordOutput<GStreamerVideoOutput>),
  Display(GStreamerDisplayOutput),
}

#[cfg(feature = "gstreamer_output")]
impl OutputWrapper {
  pub fn open(
    settings: &OutputSettings,
    input: &Path,
    info: crate::input::VideoInfo,
    draw: Draw,
  ) -> Result<Self, OutputError> {
    if settings.write_output {
      let paths = OutputPaths::new(&settings.output_dir, input);
      prepare_output_dir(&settings.output_dir)?;
      let writer = GStreamerVideoOutput::create(&paths.video, settings.codec, info)?;
      let log = PredictionLog::create(&paths.predictions)?;
      Ok(OutputWrapper::Record(RecordOutput::new(draw, writer, log)))
    } else {
      let display = GStreamerDisplayOutput::new(draw, info)?;
      Ok(OutputWrapper::Display(display))
    }
  }
}

#[cfg(feature = "gstreamer_output")]
impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&mut self, frame: Frame, result: &DetectResult) -> Result<Control, Self::Error> {
    match self {
      OutputWrapper::Record(output) => output.render_result(frame, result),
      OutputWrapper::Display(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Record(output) => output.finish(),
      OutputWrapper::Display(output) => output.finish().map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_names_follow_input_stem() {
    let paths = OutputPaths::new(Path::new("out"), Path::new("/data/videos/street.mp4"));
    assert_eq!(paths.video, Path::new("out/result_street.avi"));
    assert_eq!(paths.predictions, Path::new("out/predictions_street.jsonl"));
  }

  #[test]
  fn output_dir_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    prepare_output_dir(&nested).unwrap();
    assert!(nested.is_dir());
  }
}
