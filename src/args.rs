// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/args.rs - 命令行参数
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

use std::{fmt, path::PathBuf, str::FromStr};

use clap::Parser;
use thiserror::Error;

use crate::output::VideoCodec;

/// 网络输入分辨率必须是该值的整数倍
pub const RESOLUTION_STRIDE: u32 = 32;

/// 视频目标检测参数配置
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLO 视频检测模块", long_about = None)]
pub struct Args {
  /// 待检测的视频文件
  #[arg(long, default_value = "video.avi", value_name = "FILE")]
  pub video: PathBuf,

  /// 网络训练所用的数据集（仅记录，不参与推理）
  #[arg(long, default_value = "pascal", value_name = "NAME")]
  pub dataset: String,

  /// 目标置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD", value_parser = parse_unit_interval)]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long = "nms-thresh", alias = "nms_thresh", default_value_t = 0.4, value_name = "THRESHOLD", value_parser = parse_unit_interval)]
  pub nms_thresh: f32,

  /// 网络描述文件（TOML）
  #[arg(long, default_value = "cfg/yolov3.toml", value_name = "FILE")]
  pub cfg: PathBuf,

  /// 网络权重文件（ONNX）
  #[arg(long, default_value = "yolov3.onnx", value_name = "FILE")]
  pub weights: PathBuf,

  /// 网络输入分辨率，越大越准确，越小越快
  #[arg(long, default_value = "416", value_name = "PIXELS")]
  pub reso: Resolution,

  /// 写出标注视频与预测日志，而不是实时显示
  #[arg(long = "write-output", alias = "write_output")]
  pub write_output: bool,

  /// 输出目录
  #[arg(long = "output-dir", alias = "output_dir", default_value = ".", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// 类别名称文件，每行一个名称
  #[arg(long, default_value = "data/coco.names", value_name = "FILE")]
  pub names: PathBuf,

  /// 调色板文件（JSON，[[r, g, b], ...]），缺省使用内置调色板
  #[arg(long, value_name = "FILE")]
  pub palette: Option<PathBuf>,

  /// 标签字体文件（TTF/OTF），缺省时在常见系统路径中查找
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 输出视频的四字符编码
  #[arg(long, default_value = "MPEG", value_name = "FOURCC")]
  pub fourcc: VideoCodec,

  /// 按类别固定颜色，而不是每个框随机选色
  #[arg(long = "class-colors")]
  pub class_colors: bool,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long = "max-frames", default_value_t = 0, value_name = "COUNT")]
  pub max_frames: u64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolutionError {
  #[error("分辨率不是整数: {0:?}")]
  NotAnInteger(String),
  #[error("分辨率 {0} 不是 {stride} 的整数倍", stride = RESOLUTION_STRIDE)]
  NotMultipleOfStride(u32),
  #[error("分辨率 {0} 必须大于 {stride}", stride = RESOLUTION_STRIDE)]
  TooSmall(u32),
}

/// 网络的方形输入边长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution(u32);

impl Resolution {
  pub fn new(pixels: u32) -> Result<Self, ResolutionError> {
    if pixels % RESOLUTION_STRIDE != 0 {
      return Err(ResolutionError::NotMultipleOfStride(pixels));
    }
    if pixels <= RESOLUTION_STRIDE {
      return Err(ResolutionError::TooSmall(pixels));
    }
    Ok(Self(pixels))
  }

  pub fn pixels(&self) -> u32 {
    self.0
  }
}

impl FromStr for Resolution {
  type Err = ResolutionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let pixels = s
      .trim()
      .parse::<u32>()
      .map_err(|_| ResolutionError::NotAnInteger(s.to_string()))?;
    Self::new(pixels)
  }
}

impl fmt::Display for Resolution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

fn parse_unit_interval(s: &str) -> Result<f32, String> {
  let value: f32 = s.parse().map_err(|e| format!("无效的数值 {s:?}: {e}"))?;
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(format!("阈值 {value} 超出 [0, 1] 范围"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolution_accepts_multiples_of_32() {
    assert_eq!("416".parse::<Resolution>().unwrap().pixels(), 416);
    assert_eq!("64".parse::<Resolution>().unwrap().pixels(), 64);
    assert_eq!(" 608 ".parse::<Resolution>().unwrap().pixels(), 608);
  }

  #[test]
  fn resolution_rejects_bad_values() {
    assert_eq!(
      "417".parse::<Resolution>(),
      Err(ResolutionError::NotMultipleOfStride(417))
    );
    assert_eq!("32".parse::<Resolution>(), Err(ResolutionError::TooSmall(32)));
    assert_eq!("0".parse::<Resolution>(), Err(ResolutionError::TooSmall(0)));
    assert!(matches!(
      "abc".parse::<Resolution>(),
      Err(ResolutionError::NotAnInteger(_))
    ));
  }

  #[test]
  fn resolution_errors_name_the_stride() {
    assert_eq!(
      ResolutionError::NotMultipleOfStride(417).to_string(),
      "分辨率 417 不是 32 的整数倍"
    );
    assert_eq!(ResolutionError::TooSmall(32).to_string(), "分辨率 32 必须大于 32");
  }

  #[test]
  fn underscore_flag_names_are_accepted() {
    let args = Args::try_parse_from([
      "video-demo",
      "--nms_thresh",
      "0.3",
      "--write_output",
      "--output_dir",
      "out",
    ])
    .unwrap();
    assert_eq!(args.nms_thresh, 0.3);
    assert!(args.write_output);
    assert_eq!(args.output_dir, PathBuf::from("out"));
  }

  #[test]
  fn bad_resolution_fails_argument_parsing() {
    let result = Args::try_parse_from(["video-demo", "--reso", "417"]);
    assert!(result.is_err());
  }

  #[test]
  fn defaults_follow_the_demo_script() {
    let args = Args::try_parse_from(["video-demo"]).unwrap();
    assert_eq!(args.video, PathBuf::from("video.avi"));
    assert_eq!(args.reso.pixels(), 416);
    assert_eq!(args.confidence, 0.5);
    assert_eq!(args.nms_thresh, 0.4);
    assert!(!args.write_output);
    assert_eq!(args.output_dir, PathBuf::from("."));
    assert_eq!(args.fourcc, VideoCodec::Mpeg4);
  }

  #[test]
  fn thresholds_outside_unit_interval_are_rejected() {
    assert!(Args::try_parse_from(["video-demo", "--confidence", "1.5"]).is_err());
    assert!(Args::try_parse_from(["video-demo", "--nms-thresh", "-0.1"]).is_err());
  }

  #[test]
  fn unknown_fourcc_fails_argument_parsing() {
    assert!(Args::try_parse_from(["video-demo", "--fourcc", "WMV3"]).is_err());
    let args = Args::try_parse_from(["video-demo", "--fourcc", "MJPG"]).unwrap();
    assert_eq!(args.fourcc, VideoCodec::Mjpeg);
  }
}
