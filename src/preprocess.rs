// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/preprocess.rs - letterbox 预处理
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

//! 将任意尺寸的帧按比例缩放到网络的方形输入，四周以中灰色填充，
//! 再转换为 `[1, 3, dim, dim]`、取值 `[0, 1]` 的浮点张量。

use image::{ImageBuffer, Rgb, RgbImage, imageops::FilterType};
use tract_onnx::prelude::*;

use crate::frame::{Frame, PreparedFrame, RGB_CHANNELS};

/// letterbox 填充色
pub const PAD_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

/// 一次 letterbox 变换的几何参数
///
/// 缩放比例与填充偏移只由原始帧尺寸和网络输入边长决定，
/// 同一组参数既用于正向缩放，也用于把检测框还原到原始帧。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  input_dim: u32,
  orig_width: u32,
  orig_height: u32,
  scale: f32,
  pad_x: f32,
  pad_y: f32,
}

impl Letterbox {
  pub fn new(orig_width: u32, orig_height: u32, input_dim: u32) -> Self {
    let dim = input_dim as f32;
    let (w, h) = (orig_width as f32, orig_height as f32);
    let scale = (dim / w).min(dim / h);
    Self {
      input_dim,
      orig_width,
      orig_height,
      scale,
      pad_x: (dim - scale * w) / 2.0,
      pad_y: (dim - scale * h) / 2.0,
    }
  }

  pub fn input_dim(&self) -> u32 {
    self.input_dim
  }

  pub fn orig_size(&self) -> (u32, u32) {
    (self.orig_width, self.orig_height)
  }

  pub fn scale(&self) -> f32 {
    self.scale
  }

  pub fn padding(&self) -> (f32, f32) {
    (self.pad_x, self.pad_y)
  }

  /// 缩放后（未填充）图像的像素尺寸
  pub fn resized_size(&self) -> (u32, u32) {
    let scale = self.scale as f64;
    let w = (self.orig_width as f64 * scale).round() as u32;
    let h = (self.orig_height as f64 * scale).round() as u32;
    (w.clamp(1, self.input_dim), h.clamp(1, self.input_dim))
  }

  /// 缩放图像在画布中的左上角位置（居中）
  pub fn placement(&self) -> (u32, u32) {
    let (w, h) = self.resized_size();
    ((self.input_dim - w) / 2, (self.input_dim - h) / 2)
  }

  /// 原始帧坐标映射到网络输入坐标
  pub fn forward(&self, bbox: [f32; 4]) -> [f32; 4] {
    [
      bbox[0] * self.scale + self.pad_x,
      bbox[1] * self.scale + self.pad_y,
      bbox[2] * self.scale + self.pad_x,
      bbox[3] * self.scale + self.pad_y,
    ]
  }

  /// 网络输入坐标还原到原始帧坐标，并裁剪到帧边界内
  ///
  /// 返回的框满足 `0 <= x1 <= x2 <= width`、`0 <= y1 <= y2 <= height`。
  pub fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    let (w, h) = (self.orig_width as f32, self.orig_height as f32);
    let x1 = ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w);
    let y1 = ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h);
    let x2 = ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w);
    let y2 = ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h);
    [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)]
  }
}

/// 按 letterbox 参数缩放并填充图像
pub fn letterbox_image(image: &RgbImage, letterbox: &Letterbox) -> RgbImage {
  let dim = letterbox.input_dim();
  let (w, h) = letterbox.resized_size();
  let (x, y) = letterbox.placement();

  let resized = image::imageops::resize(image, w, h, FilterType::CatmullRom);
  let mut canvas: RgbImage = ImageBuffer::from_pixel(dim, dim, PAD_COLOR);
  image::imageops::replace(&mut canvas, &resized, x as i64, y as i64);
  canvas
}

/// HWC 的 RGB 图像转为 NCHW、归一化到 `[0, 1]` 的单张批次张量
pub fn image_to_tensor(image: &RgbImage) -> Tensor {
  let (width, height) = image.dimensions();
  tract_ndarray::Array4::from_shape_fn(
    (1, RGB_CHANNELS, height as usize, width as usize),
    |(_, c, y, x)| image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
  )
  .into_tensor()
}

/// 准备一帧的网络输入
pub fn prepare_frame(frame: &Frame, input_dim: u32) -> PreparedFrame {
  let letterbox = Letterbox::new(frame.width(), frame.height(), input_dim);
  let canvas = letterbox_image(&frame.image, &letterbox);
  PreparedFrame::new(image_to_tensor(&canvas), letterbox)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_close(a: [f32; 4], b: [f32; 4], tolerance: f32) {
    for (x, y) in a.iter().zip(b.iter()) {
      assert!((x - y).abs() <= tolerance, "{:?} != {:?}", a, b);
    }
  }

  #[test]
  fn landscape_frame_is_padded_vertically() {
    let letterbox = Letterbox::new(640, 480, 416);
    assert!((letterbox.scale() - 0.65).abs() < 1e-6);
    let (pad_x, pad_y) = letterbox.padding();
    assert!(pad_x.abs() < 1e-3);
    assert!((pad_y - 52.0).abs() < 1e-3);
    assert_eq!(letterbox.resized_size(), (416, 312));
    assert_eq!(letterbox.placement(), (0, 52));
  }

  #[test]
  fn restore_matches_worked_example() {
    let letterbox = Letterbox::new(640, 480, 416);
    let restored = letterbox.restore([100.0, 100.0, 200.0, 200.0]);
    assert_close(restored, [153.85, 73.85, 307.69, 227.69], 0.05);
  }

  #[test]
  fn restore_inverts_forward() {
    for &(w, h) in &[(640, 480), (480, 640), (1920, 1080), (300, 300), (97, 1013)] {
      let letterbox = Letterbox::new(w, h, 416);
      let bbox = [0.1 * w as f32, 0.2 * h as f32, 0.7 * w as f32, 0.9 * h as f32];
      let restored = letterbox.restore(letterbox.forward(bbox));
      assert_close(restored, bbox, 1e-2 * (w.max(h) as f32 / 416.0).max(1.0));
    }
  }

  #[test]
  fn restore_clamps_to_frame_bounds() {
    let letterbox = Letterbox::new(640, 480, 416);
    let restored = letterbox.restore([-40.0, 10.0, 500.0, 430.0]);
    assert_eq!(restored[0], 0.0);
    assert_eq!(restored[1], 0.0);
    assert_eq!(restored[2], 640.0);
    assert_eq!(restored[3], 480.0);
  }

  #[test]
  fn restore_orders_swapped_corners() {
    let letterbox = Letterbox::new(640, 480, 416);
    let [x1, y1, x2, y2] = letterbox.restore([200.0, 200.0, 100.0, 100.0]);
    assert!(x1 <= x2 && y1 <= y2);
  }

  #[test]
  fn letterbox_image_pads_with_gray() {
    let image: RgbImage = ImageBuffer::from_pixel(64, 32, Rgb([255, 0, 0]));
    let letterbox = Letterbox::new(64, 32, 64);
    let canvas = letterbox_image(&image, &letterbox);
    assert_eq!(canvas.dimensions(), (64, 64));
    assert_eq!(*canvas.get_pixel(32, 0), PAD_COLOR);
    assert_eq!(*canvas.get_pixel(32, 63), PAD_COLOR);
    assert_eq!(*canvas.get_pixel(32, 32), Rgb([255, 0, 0]));
  }

  #[test]
  fn prepared_tensor_is_nchw_and_normalized() {
    let image: RgbImage = ImageBuffer::from_pixel(64, 64, Rgb([255, 0, 51]));
    let prepared = prepare_frame(&Frame::new(image, 0, 0), 64);
    assert_eq!(prepared.shape(), &[1, 3, 64, 64]);

    let view = prepared
      .tensor()
      .to_array_view::<f32>()
      .unwrap()
      .into_dimensionality::<tract_ndarray::Ix4>()
      .unwrap();
    assert!((view[[0, 0, 10, 10]] - 1.0).abs() < 1e-6);
    assert!(view[[0, 1, 10, 10]].abs() < 1e-6);
    assert!((view[[0, 2, 10, 10]] - 0.2).abs() < 1e-6);
    assert_eq!(prepared.letterbox().orig_size(), (64, 64));
  }
}
