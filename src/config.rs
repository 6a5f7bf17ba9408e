// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/config.rs - 网络描述、类别名称与调色板
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

use image::Rgb;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// 默认调色板颜色数量（对应 COCO 数据集的 80 个类别）
const DEFAULT_PALETTE_SIZE: usize = 80;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取 {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("网络描述文件格式错误 {path}: {source}")]
  NetworkToml {
    path: PathBuf,
    source: toml::de::Error,
  },
  #[error("调色板文件格式错误 {path}: {source}")]
  PaletteJson {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("网络类别数必须大于 0")]
  NoClasses,
  #[error("类别名称数量 {names} 少于网络类别数 {classes}")]
  NotEnoughNames { names: usize, classes: usize },
  #[error("调色板为空")]
  EmptyPalette,
}

/// 网络输出张量的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
  /// `[1, N, 5 + C]`，每行一个候选框
  #[default]
  Rows,
  /// `[1, 5 + C, N]`，每列一个候选框
  Columns,
}

/// 网络描述
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
  pub classes: usize,
  #[serde(default)]
  pub layout: OutputLayout,
}

impl NetworkConfig {
  /// 每个候选框的属性数：4 个坐标、1 个目标分数和每类分数
  pub fn bbox_attrs(&self) -> usize {
    5 + self.classes
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NetworkConfigFile {
  network: NetworkConfig,
}

/// 从 TOML 文件加载网络描述
pub fn load_network_config(path: &Path) -> Result<NetworkConfig, ConfigError> {
  let text = read_to_string(path)?;
  parse_network_config(&text).map_err(|source| match source {
    ParseNetworkError::Toml(source) => ConfigError::NetworkToml {
      path: path.to_path_buf(),
      source,
    },
    ParseNetworkError::NoClasses => ConfigError::NoClasses,
  })
}

#[derive(Debug)]
enum ParseNetworkError {
  Toml(toml::de::Error),
  NoClasses,
}

fn parse_network_config(text: &str) -> Result<NetworkConfig, ParseNetworkError> {
  let file: NetworkConfigFile = toml::from_str(text).map_err(ParseNetworkError::Toml)?;
  if file.network.classes == 0 {
    return Err(ParseNetworkError::NoClasses);
  }
  debug!("网络描述: {:?}", file.network);
  Ok(file.network)
}

/// 类别名称表，运行期间只读
#[derive(Debug, Clone, Default)]
pub struct ClassNames {
  names: Vec<String>,
}

impl ClassNames {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let names = Self::parse(&read_to_string(path)?);
    info!("已加载 {} 个类别名称: {}", names.len(), path.display());
    Ok(names)
  }

  /// 每行一个名称，忽略末尾的空行
  pub fn parse(text: &str) -> Self {
    let mut names: Vec<String> = text
      .lines()
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect();
    while names.last().is_some_and(|name| name.trim().is_empty()) {
      names.pop();
    }
    Self { names }
  }

  pub fn ensure_covers(&self, classes: usize) -> Result<(), ConfigError> {
    if self.names.len() < classes {
      return Err(ConfigError::NotEnoughNames {
        names: self.names.len(),
        classes,
      });
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn label(&self, class_id: usize) -> String {
    self
      .names
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| format!("class {}", class_id))
  }
}

impl<S: Into<String>> FromIterator<S> for ClassNames {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

/// 绘制边框使用的调色板，运行期间只读
#[derive(Debug, Clone)]
pub struct Palette {
  colors: Vec<Rgb<u8>>,
}

impl Default for Palette {
  fn default() -> Self {
    let colors = (0..DEFAULT_PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / DEFAULT_PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();
    Self { colors }
  }
}

impl Palette {
  pub fn new(colors: Vec<Rgb<u8>>) -> Result<Self, ConfigError> {
    if colors.is_empty() {
      return Err(ConfigError::EmptyPalette);
    }
    Ok(Self { colors })
  }

  /// 从 JSON 文件加载调色板，格式为 `[[r, g, b], ...]`
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = read_to_string(path)?;
    let triples: Vec<[u8; 3]> =
      serde_json::from_str(&text).map_err(|source| ConfigError::PaletteJson {
        path: path.to_path_buf(),
        source,
      })?;
    let palette = Self::new(triples.into_iter().map(Rgb).collect())?;
    info!("已加载 {} 种颜色: {}", palette.len(), path.display());
    Ok(palette)
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }

  pub fn colors(&self) -> &[Rgb<u8>] {
    &self.colors
  }

  pub fn for_class(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

fn read_to_string(path: &Path) -> Result<String, ConfigError> {
  std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn network_config_defaults_to_rows() {
    let config = parse_network_config("[network]\nclasses = 80\n").unwrap();
    assert_eq!(config.classes, 80);
    assert_eq!(config.layout, OutputLayout::Rows);
    assert_eq!(config.bbox_attrs(), 85);
  }

  #[test]
  fn network_config_reads_layout() {
    let config = parse_network_config("[network]\nclasses = 20\nlayout = \"columns\"\n").unwrap();
    assert_eq!(config.layout, OutputLayout::Columns);
  }

  #[test]
  fn network_config_rejects_unknown_keys_and_zero_classes() {
    assert!(parse_network_config("[network]\nclasses = 80\nanchors = 3\n").is_err());
    assert!(matches!(
      parse_network_config("[network]\nclasses = 0\n"),
      Err(ParseNetworkError::NoClasses)
    ));
  }

  #[test]
  fn class_names_drop_trailing_blank_lines() {
    let names = ClassNames::parse("person\r\nbicycle\ncar\n\n");
    assert_eq!(names.len(), 3);
    assert_eq!(names.label(0), "person");
    assert_eq!(names.label(1), "bicycle");
    assert_eq!(names.label(7), "class 7");
  }

  #[test]
  fn class_names_must_cover_network_classes() {
    let names: ClassNames = ["a", "b"].into_iter().collect();
    assert!(names.ensure_covers(2).is_ok());
    assert!(matches!(
      names.ensure_covers(3),
      Err(ConfigError::NotEnoughNames {
        names: 2,
        classes: 3
      })
    ));
  }

  #[test]
  fn palette_loads_json_triples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("palette.json");
    std::fs::write(&path, "[[255, 0, 0], [0, 255, 0]]").unwrap();
    let palette = Palette::load(&path).unwrap();
    assert_eq!(palette.len(), 2);
    assert_eq!(palette.for_class(3), Rgb([0, 255, 0]));
  }

  #[test]
  fn empty_palette_is_rejected() {
    assert!(matches!(Palette::new(Vec::new()), Err(ConfigError::EmptyPalette)));
  }

  #[test]
  fn default_palette_has_distinct_first_colors() {
    let palette = Palette::default();
    assert_eq!(palette.len(), DEFAULT_PALETTE_SIZE);
    assert_ne!(palette.colors()[0], palette.colors()[20]);
  }
}
