// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/output/prediction_log.rs - 逐帧检测结果日志 (JSON Lines)
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

use std::{
  fs::{self, File, OpenOptions},
  io::{self, BufWriter, Write},
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PredictionLogError {
  #[error("预测日志 {path} 读写失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("预测记录序列化失败: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("预测日志已关闭")]
  Closed,
}

/// 单个检测目标，坐标为原始帧中的整数像素
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
  pub label: String,
  /// `[[x1, y1], [x2, y2]]`
  pub coordinates: [[i32; 2]; 2],
}

/// 每帧一行的日志记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRecord {
  pub frame: u64,
  pub predictions: Vec<Prediction>,
}

/// 追加写入的预测日志
///
/// 创建时删除已有文件；每写一行立即刷新，`finish` 之后不再接受写入。
pub struct PredictionLog {
  path: PathBuf,
  writer: Option<BufWriter<File>>,
  lines: u64,
}

impl PredictionLog {
  pub fn create(path: &Path) -> Result<Self, PredictionLogError> {
    let io_error = |source| PredictionLogError::Io {
      path: path.to_path_buf(),
      source,
    };

    match fs::remove_file(path) {
      Ok(()) => info!("已删除旧的预测日志: {}", path.display()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(io_error(e)),
    }

    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(path)
      .map_err(io_error)?;

    Ok(Self {
      path: path.to_path_buf(),
      writer: Some(BufWriter::new(file)),
      lines: 0,
    })
  }

  /// 已写入的行数
  pub fn lines(&self) -> u64 {
    self.lines
  }

  pub fn append(&mut self, record: &PredictionRecord) -> Result<(), PredictionLogError> {
    let writer = self.writer.as_mut().ok_or(PredictionLogError::Closed)?;
    serde_json::to_writer(&mut *writer, record)?;
    writer
      .write_all(b"\n")
      .and_then(|_| writer.flush())
      .map_err(|source| PredictionLogError::Io {
        path: self.path.clone(),
        source,
      })?;
    self.lines += 1;
    Ok(())
  }

  /// 刷新并关闭日志，重复调用无副作用
  pub fn finish(&mut self) -> Result<(), PredictionLogError> {
    let Some(mut writer) = self.writer.take() else {
      return Ok(());
    };
    writer
      .flush()
      .and_then(|_| writer.get_ref().sync_all())
      .map_err(|source| PredictionLogError::Io {
        path: self.path.clone(),
        source,
      })?;
    info!(
      "预测日志已关闭: {}，共 {} 行",
      self.path.display(),
      self.lines
    );
    Ok(())
  }
}

impl Drop for PredictionLog {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      warn!("关闭预测日志失败: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
      .unwrap()
      .lines()
      .map(str::to_string)
      .collect()
  }

  #[test]
  fn record_serializes_to_expected_shape() {
    let record = PredictionRecord {
      frame: 3,
      predictions: vec![Prediction {
        label: "dog".to_string(),
        coordinates: [[10, 20], [110, 220]],
      }],
    };
    assert_eq!(
      serde_json::to_string(&record).unwrap(),
      r#"{"frame":3,"predictions":[{"label":"dog","coordinates":[[10,20],[110,220]]}]}"#
    );
  }

  #[test]
  fn existing_log_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("predictions_clip.jsonl");
    fs::write(&path, "stale line\n").unwrap();

    let mut log = PredictionLog::create(&path).unwrap();
    log
      .append(&PredictionRecord {
        frame: 0,
        predictions: Vec::new(),
      })
      .unwrap();
    log.finish().unwrap();

    assert_eq!(read_lines(&path), vec![r#"{"frame":0,"predictions":[]}"#]);
  }

  #[test]
  fn one_line_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    let mut log = PredictionLog::create(&path).unwrap();
    for frame in 0..4 {
      log
        .append(&PredictionRecord {
          frame,
          predictions: Vec::new(),
        })
        .unwrap();
    }
    assert_eq!(log.lines(), 4);
    drop(log);

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 4);
    for (i, line) in lines.iter().enumerate() {
      let record: PredictionRecord = serde_json::from_str(line).unwrap();
      assert_eq!(record.frame, i as u64);
      assert!(record.predictions.is_empty());
    }
  }

  #[test]
  fn append_after_finish_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = PredictionLog::create(&dir.path().join("log.jsonl")).unwrap();
    log.finish().unwrap();
    log.finish().unwrap();
    let err = log
      .append(&PredictionRecord {
        frame: 0,
        predictions: Vec::new(),
      })
      .unwrap_err();
    assert!(matches!(err, PredictionLogError::Closed));
  }
}
