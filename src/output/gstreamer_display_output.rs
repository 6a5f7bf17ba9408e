// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/output/gstreamer_display_output.rs - GStreamer 窗口显示与按键退出
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

//! # GStreamer 窗口显示
//!
//! 每帧绘制后送入 `autovideosink`，随后以 1 毫秒超时检查一次总线：
//! 窗口中按下 `q` 或窗口被关闭时结束处理。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::Frame,
  input::VideoInfo,
  model::DetectResult,
  output::{Control, Render, draw::Draw, gstreamer_video_output::rgb_image_to_buffer},
};

const PIPELINE_DESCRIPTION: &str = "appsrc name=src ! videoconvert ! autovideosink sync=false";
const KEY_POLL_MILLIS: u64 = 1;
const QUIT_KEY: &str = "q";

/// GStreamer 显示输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
}

/// 交互显示输出
pub struct GStreamerDisplayOutput {
  draw: Draw,
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  video_info: gst_video::VideoInfo,
  info: VideoInfo,
  frame_count: u64,
  finished: bool,
}

impl GStreamerDisplayOutput {
  pub fn new(draw: Draw, info: VideoInfo) -> Result<Self, GStreamerDisplayOutputError> {
    gst::init()?;

    info!("GStreamer pipeline description: {}", PIPELINE_DESCRIPTION);
    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerDisplayOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcNotFound)?;

    let video_info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, info.width, info.height)
      .fps(gst::Fraction::new(info.fps_n, info.fps_d))
      .build()?;
    appsrc.set_caps(Some(&video_info.to_caps()?));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口已打开，按 {} 键退出", QUIT_KEY);

    Ok(Self {
      draw,
      pipeline,
      appsrc,
      video_info,
      info,
      frame_count: 0,
      finished: false,
    })
  }

  /// 取出总线上积压的消息，判断是否需要退出
  fn poll_quit(&self) -> bool {
    let Some(bus) = self.pipeline.bus() else {
      return false;
    };
    while let Some(message) = bus.timed_pop(gst::ClockTime::from_mseconds(KEY_POLL_MILLIS)) {
      match message.view() {
        gst::MessageView::Element(element) if is_quit_key(element.structure()) => {
          info!("按下 {} 键，结束处理", QUIT_KEY);
          return true;
        }
        gst::MessageView::Error(err) => {
          warn!("显示窗口已关闭或出错: {}", err.error());
          return true;
        }
        gst::MessageView::Eos(..) => return true,
        _ => {}
      }
    }
    false
  }
}

/// 导航消息中是否包含 `q` 键按下事件
fn is_quit_key(structure: Option<&gst::StructureRef>) -> bool {
  let Some(structure) = structure else {
    return false;
  };
  if !structure.has_name("GstNavigationMessage") {
    return false;
  }
  let Ok(event) = structure.get::<gst::Event>("event") else {
    return false;
  };
  event.structure().is_some_and(|s| {
    s.get::<&str>("event").is_ok_and(|kind| kind == "key-press")
      && s.get::<&str>("key").is_ok_and(|key| key == QUIT_KEY)
  })
}

impl Render for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn render_result(&mut self, frame: Frame, result: &DetectResult) -> Result<Control, Self::Error> {
    let mut image = frame.image;
    if !result.is_empty() {
      self.draw.draw_detections(&mut image, result);
    }

    let start = self.info.frame_time_ns(self.frame_count);
    let end = self.info.frame_time_ns(self.frame_count + 1);
    let buffer = rgb_image_to_buffer(&self.video_info, &image, start, end - start)
      .ok_or(GStreamerDisplayOutputError::BufferCreationError)?;
    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerDisplayOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count += 1;

    if self.poll_quit() {
      Ok(Control::Quit)
    } else {
      Ok(Control::Continue)
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;
    let _ = self.appsrc.end_of_stream();
    self.pipeline.set_state(gst::State::Null)?;
    info!("显示窗口已关闭，共显示 {} 帧", self.frame_count);
    Ok(())
  }
}

impl Drop for GStreamerDisplayOutput {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      warn!("Failed to stop GStreamer display pipeline: {}", e);
    }
  }
}
