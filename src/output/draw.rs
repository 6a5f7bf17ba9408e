// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  config::{ClassNames, Palette},
  model::DetectResult,
  output::prediction_log::Prediction,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_TEXT_HEIGHT: u32 = 12;
const LABEL_CHAR_WIDTH: u32 = 8; // 无字体时每字符平均宽度（粗略估计）
const LABEL_PAD_X: u32 = 3;
const LABEL_PAD_Y: u32 = 4;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 225]);

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/Library/Fonts/Arial.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {path}: {source}")]
  FontRead {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无效的字体文件: {0}")]
  InvalidFont(PathBuf),
}

/// 边框颜色的选取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
  /// 每个框从调色板中随机取色
  #[default]
  Random,
  /// 同一类别始终使用同一颜色
  PerClass,
}

pub fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path).map_err(|source| DrawError::FontRead {
    path: path.to_path_buf(),
    source,
  })?;
  FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))
}

/// 在常见的系统字体位置中查找可用字体
pub fn find_system_font() -> Option<FontArc> {
  SYSTEM_FONT_CANDIDATES
    .iter()
    .map(Path::new)
    .filter(|path| path.is_file())
    .find_map(|path| match load_font(path) {
      Ok(font) => {
        info!("使用系统字体: {}", path.display());
        Some(font)
      }
      Err(e) => {
        warn!("{}", e);
        None
      }
    })
}

/// 检测框与标签绘制器
///
/// 类别名、调色板与字体在创建后只读。
pub struct Draw {
  names: ClassNames,
  palette: Palette,
  font: Option<FontArc>,
  scale: PxScale,
  color_mode: ColorMode,
}

impl Draw {
  pub fn new(names: ClassNames, palette: Palette, font: Option<FontArc>) -> Self {
    if font.is_none() {
      warn!("没有可用的字体（可通过 --font 指定），标签只绘制背景不绘制文字");
    }
    Self {
      names,
      palette,
      font,
      scale: PxScale::from(LABEL_FONT_SIZE),
      color_mode: ColorMode::default(),
    }
  }

  pub fn with_color_mode(mut self, color_mode: ColorMode) -> Self {
    self.color_mode = color_mode;
    self
  }

  pub fn names(&self) -> &ClassNames {
    &self.names
  }

  fn pick_color(&self, class_id: usize) -> Rgb<u8> {
    match self.color_mode {
      ColorMode::PerClass => self.palette.for_class(class_id),
      ColorMode::Random => self
        .palette
        .colors()
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_else(|| self.palette.for_class(class_id)),
    }
  }

  fn label_extent(&self, label: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(self.scale, font, label),
      None => (
        label.chars().count() as u32 * LABEL_CHAR_WIDTH,
        LABEL_TEXT_HEIGHT,
      ),
    }
  }

  /// 在图像上绘制所有检测框，返回对应的预测记录
  ///
  /// 检测框须已还原到图像坐标。
  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) -> Vec<Prediction> {
    result
      .iter()
      .map(|item| {
        let label = self.names.label(item.class_id);
        let color = self.pick_color(item.class_id);
        let [x1, y1, x2, y2] = item.bbox.map(|v| v as i32);
        self.draw_bbox_with_label(image, [x1, y1, x2, y2], &label, color);
        Prediction {
          label,
          coordinates: [[x1, y1], [x2, y2]],
        }
      })
      .collect()
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: [i32; 4], label: &str, color: Rgb<u8>) {
    let [x1, y1, x2, y2] = bbox;

    // 1 像素边框，两端点都包含在内
    let width = (x2 - x1 + 1).max(1) as u32;
    let height = (y2 - y1 + 1).max(1) as u32;
    draw_hollow_rect_mut(image, Rect::at(x1, y1).of_size(width, height), color);

    // 标签背景从框的左上角开始
    let (text_width, text_height) = self.label_extent(label);
    let background = Rect::at(x1, y1).of_size(text_width + LABEL_PAD_X, text_height + LABEL_PAD_Y);
    draw_filled_rect_mut(image, background, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        LABEL_TEXT_COLOR,
        x1 + 1,
        y1 + (LABEL_PAD_Y / 2) as i32,
        self.scale,
        font,
        label,
      );
    }
  }
}
