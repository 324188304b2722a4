// 该文件是 Shanan （山南西风） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use crate::utils::FLOAT_EPSILON;

/// 中心点形式的候选框
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
  pub class_id: usize,
  pub prob: f32,
}

impl DetectBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32, class_id: usize, prob: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
      class_id,
      prob,
    }
  }

  /// 由左上、右下角点构造，宽高取绝对值
  pub fn from_corners(bbox: [f32; 4], class_id: usize, prob: f32) -> Self {
    let [x0, y0, x1, y1] = bbox;
    Self {
      x: (x0 + x1) / 2.0,
      y: (y0 + y1) / 2.0,
      width: (x1 - x0).abs(),
      height: (y1 - y0).abs(),
      class_id,
      prob,
    }
  }

  /// [x_min, y_min, x_max, y_max]
  pub fn corners(&self) -> [f32; 4] {
    [
      self.x - self.width / 2.0,
      self.y - self.height / 2.0,
      self.x + self.width / 2.0,
      self.y + self.height / 2.0,
    ]
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  pub fn is_degenerate(&self) -> bool {
    !(self.width > 0.0 && self.height > 0.0) || !self.x.is_finite() || !self.y.is_finite()
  }
}

/// 重叠度量方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IouMethod {
  /// 交集 / 并集
  #[default]
  Union,
  /// 交集 / 较大面积
  Max,
  /// 交集 / 较小面积
  Min,
  /// 交并比减去中心距离惩罚项
  Diou,
}

fn intersection(a: &DetectBox, b: &DetectBox) -> Option<f32> {
  let [a_x0, a_y0, a_x1, a_y1] = a.corners();
  let [b_x0, b_y0, b_x1, b_y1] = b.corners();
  let left = a_x0.max(b_x0);
  let right = a_x1.min(b_x1);
  let top = a_y0.max(b_y0);
  let bottom = a_y1.min(b_y1);
  if top > bottom || left > right {
    return None;
  }
  Some((right - left) * (bottom - top))
}

/// 计算两个框的重叠度，无交集或分母过小时为 0
pub fn calc_iou(a: &DetectBox, b: &DetectBox, method: IouMethod) -> f32 {
  let Some(inter) = intersection(a, b) else {
    return 0.0;
  };
  let area_a = a.area();
  let area_b = b.area();

  match method {
    IouMethod::Max => {
      let denom = area_a.max(area_b);
      if denom.abs() < FLOAT_EPSILON {
        return 0.0;
      }
      inter / denom
    }
    IouMethod::Min => {
      let denom = area_a.min(area_b);
      if denom.abs() < FLOAT_EPSILON {
        return 0.0;
      }
      inter / denom
    }
    IouMethod::Union => {
      let union = area_a + area_b - inter;
      if union.abs() < FLOAT_EPSILON {
        return 0.0;
      }
      inter / union
    }
    IouMethod::Diou => {
      let union = area_a + area_b - inter;
      if union.abs() < FLOAT_EPSILON {
        return 0.0;
      }
      let iou = inter / union;
      let center_dist = (a.x - b.x).powi(2) + (a.y - b.y).powi(2);
      let [a_x0, a_y0, a_x1, a_y1] = a.corners();
      let [b_x0, b_y0, b_x1, b_y1] = b.corners();
      let out_w = a_x1.max(b_x1) - a_x0.min(b_x0);
      let out_h = a_y1.max(b_y1) - a_y0.min(b_y0);
      let outer_diag = out_w * out_w + out_h * out_h;
      if outer_diag.abs() < FLOAT_EPSILON {
        return 0.0;
      }
      iou - center_dist / outer_diag
    }
  }
}

/// 按当前顺序贪心过滤：保留靠前的框，删除与其重叠度超过阈值的后续框
///
/// 不区分类别，调用方负责排序。
pub fn filter_by_iou(dets: Vec<DetectBox>, iou_thresh: f32, method: IouMethod) -> Vec<DetectBox> {
  let mut suppressed = vec![false; dets.len()];
  let mut kept = Vec::with_capacity(dets.len());
  for m in 0..dets.len() {
    if suppressed[m] {
      continue;
    }
    let item = dets[m];
    kept.push(item);
    for n in (m + 1)..dets.len() {
      if !suppressed[n] && calc_iou(&item, &dets[n], method) > iou_thresh {
        suppressed[n] = true;
      }
    }
  }
  kept
}

fn group_by_class(boxes: Vec<DetectBox>) -> BTreeMap<usize, Vec<DetectBox>> {
  let total = boxes.len();
  let mut groups: BTreeMap<usize, Vec<DetectBox>> = BTreeMap::new();
  for item in boxes.into_iter().filter(|b| !b.is_degenerate()) {
    groups.entry(item.class_id).or_default().push(item);
  }
  let valid: usize = groups.values().map(Vec::len).sum();
  if valid != total {
    debug!("忽略 {} 个宽高为零的候选框", total - valid);
  }
  groups
}

/// 按类别分组的非极大值抑制
///
/// 每个类别内按置信度降序稳定排序后贪心过滤，结果按类别编号升序拼接。
pub fn suppress(boxes: Vec<DetectBox>, iou_thresh: f32, method: IouMethod) -> Vec<DetectBox> {
  let mut result = Vec::with_capacity(boxes.len());
  for (_, mut group) in group_by_class(boxes) {
    group.sort_by(|a, b| b.prob.total_cmp(&a.prob));
    result.extend(filter_by_iou(group, iou_thresh, method));
  }
  result
}

/// 与 [`suppress`] 相同，但按面积降序决定保留优先级
pub fn suppress_by_area(boxes: Vec<DetectBox>, iou_thresh: f32, method: IouMethod) -> Vec<DetectBox> {
  let mut result = Vec::with_capacity(boxes.len());
  for (_, mut group) in group_by_class(boxes) {
    group.sort_by(|a, b| b.area().total_cmp(&a.area()));
    result.extend(filter_by_iou(group, iou_thresh, method));
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;

  fn square(x0: f32, y0: f32, size: f32, class_id: usize, prob: f32) -> DetectBox {
    DetectBox::from_corners([x0, y0, x0 + size, y0 + size], class_id, prob)
  }

  #[test]
  fn union_overlap_of_half_shifted_squares() {
    let a = square(0.0, 0.0, 2.0, 0, 0.9);
    let b = square(1.0, 0.0, 2.0, 0, 0.8);
    // 交集 2, 并集 6
    assert!((calc_iou(&a, &b, IouMethod::Union) - 1.0 / 3.0).abs() < 1e-6);
    assert!((calc_iou(&a, &b, IouMethod::Max) - 0.5).abs() < 1e-6);
    assert!((calc_iou(&a, &b, IouMethod::Min) - 0.5).abs() < 1e-6);
  }

  #[test]
  fn disjoint_boxes_have_no_overlap() {
    let a = square(0.0, 0.0, 1.0, 0, 0.9);
    let b = square(5.0, 5.0, 1.0, 0, 0.9);
    for method in [IouMethod::Union, IouMethod::Max, IouMethod::Min, IouMethod::Diou] {
      assert_eq!(calc_iou(&a, &b, method), 0.0);
    }
  }

  #[test]
  fn diou_penalizes_center_distance() {
    let a = square(0.0, 0.0, 4.0, 0, 0.9);
    let b = square(1.0, 1.0, 4.0, 0, 0.9);
    let iou = calc_iou(&a, &b, IouMethod::Union);
    let diou = calc_iou(&a, &b, IouMethod::Diou);
    // 中心距离平方 2, 外接框对角线平方 50
    assert!((iou - diou - 2.0 / 50.0).abs() < 1e-6);
  }

  #[test]
  fn suppress_keeps_highest_and_groups_classes() {
    let boxes = vec![
      square(0.0, 0.0, 10.0, 1, 0.6),
      square(0.5, 0.5, 10.0, 1, 0.9),
      square(0.0, 0.0, 10.0, 0, 0.5),
      square(50.0, 50.0, 10.0, 1, 0.3),
    ];
    let kept = suppress(boxes, 0.5, IouMethod::Union);
    assert_eq!(kept.len(), 3);
    assert_eq!(kept[0].class_id, 0);
    assert_eq!(kept[1].prob, 0.9);
    assert_eq!(kept[2].prob, 0.3);
  }

  #[test]
  fn suppress_is_stable_for_equal_scores() {
    let first = square(0.0, 0.0, 10.0, 0, 0.7);
    let second = square(1.0, 0.0, 10.0, 0, 0.7);
    let kept = suppress(vec![first, second], 0.5, IouMethod::Union);
    assert_eq!(kept, vec![first]);
  }

  #[test]
  fn degenerate_boxes_are_dropped() {
    let boxes = vec![
      DetectBox::new(0.5, 0.5, 0.0, 0.2, 0, 0.99),
      square(0.0, 0.0, 1.0, 0, 0.4),
    ];
    let kept = suppress(boxes, 0.5, IouMethod::Union);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].prob, 0.4);
  }

  #[test]
  fn suppress_by_area_prefers_larger_box() {
    let small = square(0.0, 0.0, 9.0, 0, 0.9);
    let large = square(0.0, 0.0, 10.0, 0, 0.1);
    let kept = suppress_by_area(vec![small, large], 0.5, IouMethod::Union);
    assert_eq!(kept, vec![large]);
  }
}
