// 该文件是 Shanan （山南西风） 视频检测项目的一部分。
// src/postprocess.rs - 置信度过滤、非极大值抑制与坐标还原
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

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
  model::{BOX_ATTRS, DetectItem, DetectResult, RawPrediction},
  preprocess::Letterbox,
};

/// 后处理阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  /// 目标分数高于该值的候选框才会保留
  pub confidence: f32,
  /// 同类框 IoU 不低于该值时被抑制
  pub nms: f32,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      confidence: 0.5,
      nms: 0.4,
    }
  }
}

/// 过滤网络原始输出，得到网络输入坐标下的检测结果
///
/// 结果为空即表示该帧没有检测到目标。
pub fn filter_detections(raw: &RawPrediction, thresholds: Thresholds) -> DetectResult {
  let rows = raw.rows();
  if raw.num_classes() == 0 {
    return DetectResult::default();
  }

  let mut by_class: BTreeMap<usize, Vec<DetectItem>> = BTreeMap::new();
  for row in rows.outer_iter() {
    let objectness = row[4];
    if !(objectness > thresholds.confidence) {
      continue;
    }

    let (class_id, class_score) = row
      .iter()
      .skip(BOX_ATTRS)
      .copied()
      .enumerate()
      .fold((0usize, f32::MIN), |best, (id, score)| {
        if score > best.1 { (id, score) } else { best }
      });

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    by_class.entry(class_id).or_default().push(DetectItem {
      batch_index: 0,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
      objectness,
      class_score,
      class_id,
    });
  }

  let mut items = Vec::new();
  for (_, mut candidates) in by_class {
    candidates.sort_by(|a, b| b.objectness.total_cmp(&a.objectness));
    items.extend(non_max_suppression(candidates, thresholds.nms));
  }

  debug!(
    "候选框 {} 个，过滤后保留 {} 个",
    raw.num_candidates(),
    items.len()
  );
  DetectResult::from(items)
}

/// 对已按目标分数降序排列的同类候选框做非极大值抑制
fn non_max_suppression(sorted: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  let mut kept: Vec<DetectItem> = Vec::with_capacity(sorted.len());
  for candidate in sorted {
    if kept
      .iter()
      .all(|k| bbox_iou(&k.bbox, &candidate.bbox) < iou_threshold)
    {
      kept.push(candidate);
    }
  }
  kept
}

/// 两个框的 IoU，宽高按包含端点的像素计数（各加 1）
pub fn bbox_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let inter_x1 = a[0].max(b[0]);
  let inter_y1 = a[1].max(b[1]);
  let inter_x2 = a[2].min(b[2]);
  let inter_y2 = a[3].min(b[3]);

  let inter_area = (inter_x2 - inter_x1 + 1.0).max(0.0) * (inter_y2 - inter_y1 + 1.0).max(0.0);
  let area_a = (a[2] - a[0] + 1.0) * (a[3] - a[1] + 1.0);
  let area_b = (b[2] - b[0] + 1.0) * (b[3] - b[1] + 1.0);

  inter_area / (area_a + area_b - inter_area)
}

/// 把检测框从网络输入坐标还原到原始帧坐标
pub fn rescale_detections(result: &mut DetectResult, letterbox: &Letterbox) {
  for item in result.items.iter_mut() {
    item.bbox = letterbox.restore(item.bbox);
  }
}
