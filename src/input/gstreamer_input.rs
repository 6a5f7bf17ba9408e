// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频文件输入
//!
//! 使用 `decodebin` 解码任意容器格式的视频文件，统一转换为 RGB 帧。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use shanan_video::input::{FrameSource, GStreamerInput};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = GStreamerInput::open("video.avi".as_ref())?;
//! println!("{:?}", input.video_info());
//! for frame in input {
//!   println!("帧 {}: {}x{}", frame.index, frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{Frame, RGB_CHANNELS},
  input::{FrameSource, VideoInfo},
};

/// 打开视频与获取首帧的最长等待时间
const OPEN_TIMEOUT_SECS: u64 = 10;

const PIPELINE_DESCRIPTION: &str = "filesrc name=src ! decodebin ! videoconvert ! \
   video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4 drop=false";

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// 视频文件不存在
  #[error("视频文件不存在: {0}")]
  SourceNotFound(PathBuf),
  /// 视频无法打开或解码
  #[error("无法打开视频 {path}: {reason}")]
  SourceOpenFailed { path: PathBuf, reason: String },
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取管道中的元素
  #[error("Failed to get element {0}")]
  ElementNotFound(&'static str),
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// GStreamer 视频文件输入
///
/// 管理解码管道和 appsink，按顺序产生 RGB 帧。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  info: VideoInfo,
  frame_index: u64,
  finished: bool,
}

impl GStreamerInput {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    if !path.is_file() {
      return Err(GStreamerInputError::SourceNotFound(path.to_path_buf()));
    }

    gst::init()?;

    info!("GStreamer pipeline description: {}", PIPELINE_DESCRIPTION);
    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let filesrc = pipeline
      .by_name("src")
      .ok_or(GStreamerInputError::ElementNotFound("filesrc"))?;
    filesrc.set_property("location", path.to_string_lossy().to_string());

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::ElementNotFound("appsink"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::ElementNotFound("appsink"))?;

    let open_failed = |reason: String| GStreamerInputError::SourceOpenFailed {
      path: path.to_path_buf(),
      reason,
    };

    // 预滚动到 PAUSED，取得首帧的 caps
    if pipeline.set_state(gst::State::Paused).is_err() {
      let reason = take_bus_error(&pipeline).unwrap_or_else(|| "无法进入 PAUSED 状态".to_string());
      let _ = pipeline.set_state(gst::State::Null);
      return Err(open_failed(reason));
    }
    let (state_change, _, _) = pipeline.state(gst::ClockTime::from_seconds(OPEN_TIMEOUT_SECS));
    if state_change.is_err() {
      let reason = take_bus_error(&pipeline).unwrap_or_else(|| "预滚动失败".to_string());
      let _ = pipeline.set_state(gst::State::Null);
      return Err(open_failed(reason));
    }

    let preroll = match appsink.try_pull_preroll(gst::ClockTime::from_seconds(OPEN_TIMEOUT_SECS)) {
      Some(sample) => sample,
      None => {
        let reason = take_bus_error(&pipeline).unwrap_or_else(|| "视频中没有可解码的帧".to_string());
        let _ = pipeline.set_state(gst::State::Null);
        return Err(open_failed(reason));
      }
    };

    let caps = preroll
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
    let fps = video_info.fps();
    let info = VideoInfo::new(
      video_info.width(),
      video_info.height(),
      fps.numer(),
      fps.denom(),
    );
    if (fps.numer(), fps.denom()) != (info.fps_n, info.fps_d) {
      warn!("视频帧率未知，使用默认帧率 {:.2}", info.fps());
    }

    // 预滚动的样本会作为第一个样本再次交付
    pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频已打开: {} {}x{} @ {:.2} fps",
      path.display(),
      info.width,
      info.height,
      info.fps()
    );

    Ok(Self {
      pipeline,
      appsink,
      info,
      frame_index: 0,
      finished: false,
    })
  }

  fn pull_frame(&mut self) -> Option<Frame> {
    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) => {
        if self.appsink.is_eos() {
          info!("视频读取结束，共 {} 帧", self.frame_index);
        } else if let Some(reason) = take_bus_error(&self.pipeline) {
          error!("视频解码失败，按流结束处理: {}", reason);
        } else {
          warn!("无法获取视频帧，按流结束处理");
        }
        return None;
      }
    };

    match convert_sample_to_frame(&sample, self.frame_index) {
      Ok(frame) => {
        self.frame_index += 1;
        Some(frame)
      }
      Err(e) => {
        error!("视频帧转换失败，按流结束处理: {}", e);
        None
      }
    }
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    let frame = self.pull_frame();
    self.finished = frame.is_none();
    frame
  }
}

impl FrameSource for GStreamerInput {
  fn video_info(&self) -> VideoInfo {
    self.info
  }
}

fn take_bus_error(pipeline: &gst::Pipeline) -> Option<String> {
  let bus = pipeline.bus()?;
  let message = bus.pop_filtered(&[gst::MessageType::Error])?;
  match message.view() {
    gst::MessageView::Error(err) => Some(match err.debug() {
      Some(debug) => format!("{} ({})", err.error(), debug),
      None => err.error().to_string(),
    }),
    _ => None,
  }
}

fn convert_sample_to_frame(sample: &gst::Sample, index: u64) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat(video_info.format()));
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row_len = width * RGB_CHANNELS;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  // 行与行之间可能有对齐填充
  let expected_size = stride * (height.saturating_sub(1)) + row_len;
  if width == 0 || height == 0 || data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_len * height);
  for y in 0..height {
    let row_start = y * stride;
    pixels.extend_from_slice(&data[row_start..row_start + row_len]);
  }

  let image = RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("无法创建 RGB 图像".to_string()))?;
  let timestamp_ms = buffer.pts().map_or(0, |pts| pts.mseconds());
  debug!("读取第 {} 帧 ({} ms)", index, timestamp_ms);

  Ok(Frame::new(image, index, timestamp_ms))
}
