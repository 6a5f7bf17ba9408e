// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/input.rs - 视频输入
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

use crate::frame::Frame;

/// 帧率缺失时使用的默认值
pub const DEFAULT_FPS: (i32, i32) = (30, 1);

/// 视频流参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
  pub width: u32,
  pub height: u32,
  /// 帧率分子
  pub fps_n: i32,
  /// 帧率分母
  pub fps_d: i32,
}

impl VideoInfo {
  pub fn new(width: u32, height: u32, fps_n: i32, fps_d: i32) -> Self {
    let (fps_n, fps_d) = if fps_n > 0 && fps_d > 0 {
      (fps_n, fps_d)
    } else {
      DEFAULT_FPS
    };
    Self {
      width,
      height,
      fps_n,
      fps_d,
    }
  }

  pub fn fps(&self) -> f64 {
    self.fps_n as f64 / self.fps_d as f64
  }

  /// 第 `frame` 帧的显示时间（纳秒）
  pub fn frame_time_ns(&self, frame: u64) -> u64 {
    (frame as u128 * 1_000_000_000 * self.fps_d as u128 / self.fps_n as u128) as u64
  }
}

/// 按顺序产生解码帧的输入源，解码失败视为流结束
pub trait FrameSource: Iterator<Item = Frame> {
  fn video_info(&self) -> VideoInfo;
}

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};
