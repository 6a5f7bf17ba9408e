// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/frame.rs - 视频帧与网络输入张量
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

use image::RgbImage;
use tract_onnx::prelude::*;

use crate::preprocess::Letterbox;

pub const RGB_CHANNELS: usize = 3;

/// 解码后的视频帧，坐标系为原始帧像素空间
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧在视频中的序号
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 送入网络的 NCHW 张量，以及还原坐标所需的 letterbox 几何信息
#[derive(Debug, Clone)]
pub struct PreparedFrame {
  tensor: Tensor,
  letterbox: Letterbox,
}

impl PreparedFrame {
  pub(crate) fn new(tensor: Tensor, letterbox: Letterbox) -> Self {
    Self { tensor, letterbox }
  }

  pub fn tensor(&self) -> &Tensor {
    &self.tensor
  }

  pub fn into_tensor(self) -> Tensor {
    self.tensor
  }

  pub fn letterbox(&self) -> &Letterbox {
    &self.letterbox
  }

  /// `[1, 3, dim, dim]`
  pub fn shape(&self) -> &[usize] {
    self.tensor.shape()
  }
}
