// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/output/fourcc.rs - 四字符编码与编码器选择
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

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FourccError {
  #[error("四字符编码必须是 4 个 ASCII 字符: {0:?}")]
  Malformed(String),
  #[error("不支持的四字符编码: {0}")]
  Unsupported(String),
}

/// 输出视频编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
  /// MPEG-4 Part 2
  Mpeg4,
  /// Motion JPEG
  Mjpeg,
  H264,
}

impl VideoCodec {
  /// 编码器在 GStreamer 管道中的描述
  pub fn encoder_description(&self) -> &'static str {
    match self {
      VideoCodec::Mpeg4 => "avenc_mpeg4 bitrate=4000000",
      VideoCodec::Mjpeg => "jpegenc",
      VideoCodec::H264 => "video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse",
    }
  }
}

impl FromStr for VideoCodec {
  type Err = FourccError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.len() != 4 || !s.is_ascii() {
      return Err(FourccError::Malformed(s.to_string()));
    }
    match s.to_ascii_uppercase().as_str() {
      "MPEG" | "FMP4" | "DIVX" | "XVID" | "MP4V" => Ok(VideoCodec::Mpeg4),
      "MJPG" => Ok(VideoCodec::Mjpeg),
      "H264" | "X264" | "AVC1" => Ok(VideoCodec::H264),
      other => Err(FourccError::Unsupported(other.to_string())),
    }
  }
}

impl fmt::Display for VideoCodec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      VideoCodec::Mpeg4 => "MPEG-4",
      VideoCodec::Mjpeg => "MJPEG",
      VideoCodec::H264 => "H.264",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_fourcc_is_mpeg4() {
    assert_eq!("MPEG".parse::<VideoCodec>(), Ok(VideoCodec::Mpeg4));
    assert_eq!("xvid".parse::<VideoCodec>(), Ok(VideoCodec::Mpeg4));
  }

  #[test]
  fn jpeg_and_h264_codes() {
    assert_eq!("MJPG".parse::<VideoCodec>(), Ok(VideoCodec::Mjpeg));
    assert_eq!("avc1".parse::<VideoCodec>(), Ok(VideoCodec::H264));
  }

  #[test]
  fn unknown_or_malformed_codes_are_rejected() {
    assert!(matches!(
      "WMV3".parse::<VideoCodec>(),
      Err(FourccError::Unsupported(_))
    ));
    assert!(matches!(
      "MPEG4".parse::<VideoCodec>(),
      Err(FourccError::Malformed(_))
    ));
  }
}
