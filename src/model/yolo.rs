// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/model/yolo.rs - ONNX YOLO 模型推理
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

use std::path::PathBuf;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::{
  config::{NetworkConfig, OutputLayout},
  frame::{PreparedFrame, RGB_CHANNELS},
  model::{Model, RawPrediction},
};

type YoloPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型加载错误: {0:#}")]
  ModelLoadError(TractError),
  #[error("模型推理错误: {0:#}")]
  InferenceError(TractError),
  #[error("模型没有输出")]
  NoOutput,
  #[error("模型输出形状 {actual:?} 与网络描述不符，期望每个候选框 {attrs} 个属性")]
  OutputShape { actual: Vec<usize>, attrs: usize },
}

impl From<TractError> for YoloError {
  fn from(err: TractError) -> Self {
    YoloError::InferenceError(err)
  }
}

pub struct YoloOnnxBuilder {
  weights: PathBuf,
  network: NetworkConfig,
  input_dim: u32,
}

impl YoloOnnxBuilder {
  pub fn new(weights: impl Into<PathBuf>, network: NetworkConfig, input_dim: u32) -> Self {
    Self {
      weights: weights.into(),
      network,
      input_dim,
    }
  }

  pub fn build(self) -> Result<YoloOnnx, YoloError> {
    if !self.weights.is_file() {
      return Err(YoloError::ModelNotFound(self.weights));
    }

    info!("加载模型文件: {}", self.weights.display());
    let dim = self.input_dim as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.weights)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, RGB_CHANNELS, dim, dim)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(YoloError::ModelLoadError)?;
    info!("模型加载完成，输入分辨率 {}x{}", dim, dim);

    let model = YoloOnnx {
      plan,
      network: self.network,
      input_dim: self.input_dim,
    };

    model.warm_up()?;

    Ok(model)
  }
}

/// 通过 tract 运行的 YOLO 检测网络
pub struct YoloOnnx {
  plan: YoloPlan,
  network: NetworkConfig,
  input_dim: u32,
}

impl YoloOnnx {
  /// 用一帧灰色图像跑一次推理，同时校验输出形状
  fn warm_up(&self) -> Result<(), YoloError> {
    let dim = self.input_dim as usize;
    let gray = tract_ndarray::Array4::from_elem((1, RGB_CHANNELS, dim, dim), 128.0f32 / 255.0);
    let now = Instant::now();
    let outputs = self.plan.run(tvec!(gray.into_tensor().into()))?;
    let raw = self.decode(outputs)?;
    info!(
      "预热推理完成，耗时: {:.2?}，候选框 {} 个",
      now.elapsed(),
      raw.num_candidates()
    );
    Ok(())
  }

  fn decode(&self, outputs: TVec<TValue>) -> Result<RawPrediction, YoloError> {
    let output = outputs.first().ok_or(YoloError::NoOutput)?;
    let view = output.to_array_view::<f32>()?;
    let shape = view.shape().to_vec();
    let attrs = self.network.bbox_attrs();
    let shape_error = || YoloError::OutputShape {
      actual: shape.clone(),
      attrs,
    };

    if shape.len() != 3 || shape[0] != 1 {
      return Err(shape_error());
    }

    let batch = view.index_axis(tract_ndarray::Axis(0), 0);
    let rows = match self.network.layout {
      OutputLayout::Rows if shape[2] == attrs => batch.to_owned(),
      OutputLayout::Columns if shape[1] == attrs => batch.t().to_owned(),
      _ => return Err(shape_error()),
    };
    let rows = rows
      .into_dimensionality::<tract_ndarray::Ix2>()
      .map_err(|_| shape_error())?;

    debug!("模型原始输出: {} 个候选框", rows.nrows());
    Ok(RawPrediction::new(rows))
  }
}

impl Model for YoloOnnx {
  type Error = YoloError;

  fn input_dim(&self) -> u32 {
    self.input_dim
  }

  fn infer(&self, input: PreparedFrame) -> Result<RawPrediction, Self::Error> {
    debug!("执行模型推理");
    let outputs = self.plan.run(tvec!(input.into_tensor().into()))?;
    self.decode(outputs)
  }
}
