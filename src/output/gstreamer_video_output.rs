// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出
//!
//! 将标注后的帧编码为 AVI 文件，编码器由四字符编码决定，
//! 帧率与尺寸与输入视频一致。
//!
//! ## 管道结构
//!
//! ```text
//! appsrc ! videoconvert ! <encoder> ! avimux ! filesink
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use shanan_video::{
//!   input::VideoInfo,
//!   output::{FrameSink, GStreamerVideoOutput, VideoCodec},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let info = VideoInfo::new(640, 480, 25, 1);
//! let mut output = GStreamerVideoOutput::create("result_clip.avi".as_ref(), VideoCodec::Mpeg4, info)?;
//! output.write_frame(&image::RgbImage::new(640, 480))?;
//! output.finish()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::RGB_CHANNELS,
  input::VideoInfo,
  output::{FrameSink, VideoCodec},
};

/// 等待复用器写完文件尾的最长时间
const FINALIZE_TIMEOUT_SECS: u64 = 10;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取管道中的元素
  #[error("Failed to get element {0}")]
  ElementNotFound(&'static str),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 帧尺寸与输出视频不一致
  #[error("帧尺寸 {actual:?} 与输出视频 {expected:?} 不一致")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  /// 已经调用过 finish
  #[error("视频输出已关闭: {0}")]
  Closed(PathBuf),
}

/// GStreamer 视频文件输出
///
/// 管理 GStreamer 编码管道，将视频帧保存为文件。
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  video_info: gst_video::VideoInfo,
  info: VideoInfo,
  path: PathBuf,
  frame_count: u64,
  finished: bool,
}

impl GStreamerVideoOutput {
  pub fn create(
    path: &Path,
    codec: VideoCodec,
    info: VideoInfo,
  ) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    let pipeline_desc = format!(
      "appsrc name=src ! videoconvert ! {} ! avimux ! filesink name=sink",
      codec.encoder_description()
    );
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let filesink = pipeline
      .by_name("sink")
      .ok_or(GStreamerVideoOutputError::ElementNotFound("filesink"))?;
    filesink.set_property("location", path.to_string_lossy().to_string());

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::ElementNotFound("appsrc"))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::ElementNotFound("appsrc"))?;

    let video_info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, info.width, info.height)
      .fps(gst::Fraction::new(info.fps_n, info.fps_d))
      .build()?;
    let caps = video_info.to_caps()?;

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);
    // 编码跟不上时阻塞写入，不丢帧
    appsrc.set_block(true);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {:.2} fps ({}) -> {}",
      info.width,
      info.height,
      info.fps(),
      codec,
      path.display()
    );

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      video_info,
      info,
      path: path.to_path_buf(),
      frame_count: 0,
      finished: false,
    })
  }

  fn push_frame(&mut self, image: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let expected = (self.info.width, self.info.height);
    let actual = image.dimensions();
    if expected != actual {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch { expected, actual });
    }

    let start = self.info.frame_time_ns(self.frame_count);
    let end = self.info.frame_time_ns(self.frame_count + 1);
    let buffer = rgb_image_to_buffer(&self.video_info, image, start, end - start)
      .ok_or(GStreamerVideoOutputError::BufferCreationError)?;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count += 1;
    debug!("写入第 {} 帧视频", self.frame_count);

    Ok(())
  }

  /// 发送 EOS 并等待复用器完成文件
  fn finalize(&mut self) -> Result<(), GStreamerVideoOutputError> {
    self.appsrc.end_of_stream().map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to send EOS: {:?}", e))
    })?;

    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Pipeline has no bus".to_string()))?;
    let message = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(FINALIZE_TIMEOUT_SECS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );

    match message.as_ref().map(|msg| msg.view()) {
      Some(gst::MessageView::Eos(..)) => Ok(()),
      Some(gst::MessageView::Error(err)) => Err(GStreamerVideoOutputError::PipelineError(format!(
        "{} ({:?})",
        err.error(),
        err.debug()
      ))),
      _ => {
        warn!(
          "等待视频文件完成超时 ({} 秒)，文件可能不完整: {}",
          FINALIZE_TIMEOUT_SECS,
          self.path.display()
        );
        Ok(())
      }
    }
  }
}

/// 把 RGB 图像拷贝进按 `video_info` 布局的缓冲区，并设置时间戳
pub(super) fn rgb_image_to_buffer(
  video_info: &gst_video::VideoInfo,
  image: &RgbImage,
  pts_ns: u64,
  duration_ns: u64,
) -> Option<gst::Buffer> {
  let mut buffer = gst::Buffer::with_size(video_info.size()).ok()?;
  {
    let buffer_ref = buffer.get_mut()?;
    buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts_ns));
    buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration_ns));

    let mut buffer_map = buffer_ref.map_writable().ok()?;

    // GStreamer 的 RGB 行按 4 字节对齐
    let stride = video_info.stride()[0] as usize;
    let row_len = image.width() as usize * RGB_CHANNELS;
    for (dst, src) in buffer_map
      .as_mut_slice()
      .chunks_mut(stride)
      .zip(image.as_raw().chunks_exact(row_len))
    {
      dst[..row_len].copy_from_slice(src);
    }
  }
  Some(buffer)
}

impl FrameSink for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    if self.finished {
      return Err(GStreamerVideoOutputError::Closed(self.path.clone()));
    }
    self.push_frame(image)
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let finalized = self.finalize();
    let stopped = self.pipeline.set_state(gst::State::Null);

    info!(
      "Video output closed. Total frames written: {} -> {}",
      self.frame_count,
      self.path.display()
    );
    finalized?;
    stopped?;
    Ok(())
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      warn!("Failed to close GStreamer video output: {}", e);
    }
  }
}
