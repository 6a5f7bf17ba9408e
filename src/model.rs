// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/model.rs - 模型
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

use tract_onnx::prelude::tract_ndarray::{Array2, ArrayView2};

use crate::frame::PreparedFrame;

/// 候选框属性中坐标与目标分数所占的列数
pub const BOX_ATTRS: usize = 5;

pub trait Model {
  type Error;

  /// 网络的方形输入边长
  fn input_dim(&self) -> u32;

  fn infer(&self, input: PreparedFrame) -> Result<RawPrediction, Self::Error>;
}

/// 网络原始输出
///
/// 每行一个候选框：`cx, cy, w, h, objectness, class scores...`，
/// 坐标位于网络输入像素空间。
#[derive(Debug, Clone)]
pub struct RawPrediction {
  rows: Array2<f32>,
}

impl RawPrediction {
  pub fn new(rows: Array2<f32>) -> Self {
    Self { rows }
  }

  pub fn rows(&self) -> ArrayView2<'_, f32> {
    self.rows.view()
  }

  pub fn num_candidates(&self) -> usize {
    self.rows.nrows()
  }

  pub fn num_classes(&self) -> usize {
    self.rows.ncols().saturating_sub(BOX_ATTRS)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  /// 批次中的图像序号，单帧推理时恒为 0
  pub batch_index: usize,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
  pub objectness: f32,
  pub class_score: f32,
  pub class_id: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

mod yolo;
pub use self::yolo::{YoloError, YoloOnnx, YoloOnnxBuilder};
