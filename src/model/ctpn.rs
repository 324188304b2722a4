// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/ctpn.rs - CTPN 文本行检测后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, error, info, warn};

use crate::{
  config::ConfigData,
  coordinate::ImageInfo,
  error::{PostProcessError, Result},
  model::{PostProcessor, TextObjDetectInfo},
  nms::{DetectBox, IouMethod, filter_by_iou},
  tensor::{RawTensor, tensor_at},
  utils::{LineRegression, is_denominator_zero, is_denominator_zero_f64},
};

const ANCHOR_HEIGHTS: [i32; 10] = [11, 16, 23, 33, 48, 68, 97, 139, 198, 283];
const BOX_TENSOR: usize = 0;
const CONF_TENSOR: usize = 1;
const MIN_TENSOR_NUM: usize = 2;
const TENSOR_RANK: usize = 4;
/// 置信度张量中前景分数的偏移
const CONF_OBJECT: usize = 1;
const HEIGHT_OFFSET: f64 = 2.5;
const MAX_PARAM: u32 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct CtpnConfig {
  pub min_size: u32,
  pub feat_stride: u32,
  pub anchor_scales: u32,
  pub feat_box_layer: usize,
  pub feat_conf_layer: usize,
  pub anchor_num: usize,
  pub max_horizontal_gap: u32,
  pub min_over_laps: f32,
  pub min_size_sim: f32,
  pub is_oriented: bool,
  pub box_iou_thresh: f32,
  pub text_iou_thresh: f32,
  pub min_ratio: f32,
  pub text_proposals_min_score: f32,
  pub line_min_score: f32,
  pub text_proposals_width: u32,
  pub min_num_proposals: u32,
  pub rpn_pre_nms_top_n: usize,
  pub rpn_post_nms_top_n: usize,
  pub check_model: bool,
}

impl Default for CtpnConfig {
  fn default() -> Self {
    Self {
      min_size: 8,
      feat_stride: 16,
      anchor_scales: 16,
      feat_box_layer: 4,
      feat_conf_layer: 2,
      anchor_num: 10,
      max_horizontal_gap: 50,
      min_over_laps: 0.7,
      min_size_sim: 0.7,
      is_oriented: false,
      box_iou_thresh: 0.7,
      text_iou_thresh: 0.2,
      min_ratio: 0.5,
      text_proposals_min_score: 0.7,
      line_min_score: 0.9,
      text_proposals_width: 16,
      min_num_proposals: 2,
      rpn_pre_nms_top_n: 12000,
      rpn_post_nms_top_n: 1000,
      check_model: true,
    }
  }
}

impl CtpnConfig {
  pub fn from_config(config: &ConfigData) -> Self {
    let d = Self::default();
    let max = MAX_PARAM as usize;
    Self {
      min_size: config.get_or("MIN_SIZE", d.min_size, 0, MAX_PARAM),
      feat_stride: config.get_or("FEAT_STRIDE", d.feat_stride, 0, MAX_PARAM),
      anchor_scales: config.get_or("ANCHOR_SCALES", d.anchor_scales, 0, MAX_PARAM),
      feat_box_layer: config.get_or("FEAT_BOX_LAYER", d.feat_box_layer, 0, max),
      feat_conf_layer: config.get_or("FEAT_CONF_LAYER", d.feat_conf_layer, 0, max),
      anchor_num: config.get_or("ANCHORNUM", d.anchor_num, 0, max),
      max_horizontal_gap: config.get_or("MAX_HORIZONTAL_GAP", d.max_horizontal_gap, 0, MAX_PARAM),
      min_over_laps: config.get_or("MIN_OVER_LAPS", d.min_over_laps, 0.0, 1000.0),
      min_size_sim: config.get_or("MIN_SIZE_SIM", d.min_size_sim, 0.0, 1000.0),
      is_oriented: config.get_bool_or("IS_ORIENTED", d.is_oriented),
      box_iou_thresh: config.get_or("BOX_IOU_THRESH", d.box_iou_thresh, 0.0, 1.0),
      text_iou_thresh: config.get_or("TEXT_IOU_THRESH", d.text_iou_thresh, 0.0, 1.0),
      min_ratio: config.get_or("MIN_RATIO", d.min_ratio, 0.0, 1000.0),
      text_proposals_min_score: config.get_or("TEXT_PROPOSALS_MIN_SCORE", d.text_proposals_min_score, 0.0, 1.0),
      line_min_score: config.get_or("LINE_MIN_SCORE", d.line_min_score, 0.0, 1.0),
      text_proposals_width: config.get_or("TEXT_PROPOSALS_WIDTH", d.text_proposals_width, 0, MAX_PARAM),
      min_num_proposals: config.get_or("MIN_NUM_PROPOSALS", d.min_num_proposals, 0, MAX_PARAM),
      rpn_pre_nms_top_n: config.get_or("RPN_PRE_NMS_TOP_N", d.rpn_pre_nms_top_n, 0, max),
      rpn_post_nms_top_n: config.get_or("RPN_POST_NMS_TOP_N", d.rpn_post_nms_top_n, 0, max),
      check_model: config.get_bool_or("CHECK_MODEL", d.check_model),
    }
  }
}

/// 文本候选框，模型输入像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextProposal {
  pub x0: f32,
  pub y0: f32,
  pub x1: f32,
  pub y1: f32,
  pub score: f32,
}

impl TextProposal {
  pub fn new(bbox: [f32; 4], score: f32) -> Self {
    let [x0, y0, x1, y1] = bbox;
    Self {
      x0,
      y0,
      x1,
      y1,
      score,
    }
  }

  fn height(&self) -> f32 {
    self.y1 - self.y0 + 1.0
  }
}

/// 候选框之间的无向连接图
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextGraph {
  adjacency: Vec<BTreeSet<usize>>,
}

impl TextGraph {
  fn with_nodes(n: usize) -> Self {
    Self {
      adjacency: vec![BTreeSet::new(); n],
    }
  }

  fn link(&mut self, a: usize, b: usize) {
    self.adjacency[a].insert(b);
    self.adjacency[b].insert(a);
  }

  pub fn is_linked(&self, a: usize, b: usize) -> bool {
    self.adjacency.get(a).is_some_and(|set| set.contains(&b))
  }

  pub fn node_count(&self) -> usize {
    self.adjacency.len()
  }

  /// 广度优先求连通分量，按最小下标的顺序输出
  pub fn components(&self) -> Vec<Vec<usize>> {
    let mut visited = vec![false; self.adjacency.len()];
    let mut components = Vec::new();
    for start in 0..self.adjacency.len() {
      if visited[start] {
        continue;
      }
      visited[start] = true;
      let mut component = Vec::new();
      let mut queue = VecDeque::from([start]);
      while let Some(node) = queue.pop_front() {
        component.push(node);
        for &next in self.adjacency[node].iter() {
          if !visited[next] {
            visited[next] = true;
            queue.push_back(next);
          }
        }
      }
      components.push(component);
    }
    components
  }
}

pub struct CtpnBuilder {
  config: CtpnConfig,
  output_shapes: Vec<Vec<usize>>,
}

impl CtpnBuilder {
  pub fn from_config(config: &ConfigData) -> Result<Self> {
    info!("开始初始化 CTPN 后处理");
    Ok(Self::new(CtpnConfig::from_config(config)))
  }

  pub fn new(config: CtpnConfig) -> Self {
    Self {
      config,
      output_shapes: Vec::new(),
    }
  }

  pub fn output_shapes(mut self, shapes: Vec<Vec<usize>>) -> Self {
    self.output_shapes = shapes;
    self
  }

  pub fn build(self) -> Result<CtpnPostProcessor> {
    let config = self.config;
    if config.anchor_num == 0 || config.anchor_num > ANCHOR_HEIGHTS.len() {
      error!("ANCHORNUM ({}) 必须在 [1, {}] 内", config.anchor_num, ANCHOR_HEIGHTS.len());
      return Err(PostProcessError::invalid("ANCHORNUM 无效"));
    }
    if config.feat_stride == 0 {
      error!("FEAT_STRIDE 不能为 0");
      return Err(PostProcessError::invalid("FEAT_STRIDE 为 0"));
    }
    if config.feat_box_layer < 4 || config.feat_conf_layer <= CONF_OBJECT {
      error!(
        "FEAT_BOX_LAYER ({}) 至少为 4, FEAT_CONF_LAYER ({}) 至少为 2",
        config.feat_box_layer, config.feat_conf_layer
      );
      return Err(PostProcessError::invalid("FEAT_BOX_LAYER 或 FEAT_CONF_LAYER 过小"));
    }

    let processor = CtpnPostProcessor { config };
    if self.output_shapes.is_empty() {
      debug!("未提供模型输出形状, 跳过模型检查");
    } else if !processor.config.check_model {
      warn!("CHECK_MODEL 为 false, 跳过模型检查");
    } else {
      processor.check_shapes(&self.output_shapes)?;
    }
    info!("CTPN 后处理初始化完成");
    Ok(processor)
  }
}

#[derive(Debug, Clone)]
pub struct CtpnPostProcessor {
  config: CtpnConfig,
}

impl CtpnPostProcessor {
  pub fn config(&self) -> &CtpnConfig {
    &self.config
  }

  fn check_shapes(&self, shapes: &[Vec<usize>]) -> Result<()> {
    if shapes.len() < MIN_TENSOR_NUM {
      error!("输出张量数量 {} 小于 {}", shapes.len(), MIN_TENSOR_NUM);
      return Err(PostProcessError::invalid("输出张量数量不足"));
    }
    for index in [BOX_TENSOR, CONF_TENSOR] {
      if shapes[index].len() != TENSOR_RANK {
        error!(
          "第 {} 个输出张量维度数 {} 不等于 {}",
          index,
          shapes[index].len(),
          TENSOR_RANK
        );
        return Err(PostProcessError::invalid("输出张量维度数错误"));
      }
    }
    Ok(())
  }

  /// 以 (0, 0) 为中心的基础锚框，宽度固定，高度依次增大
  pub fn create_anchors(&self) -> Vec<[i32; 4]> {
    let scale = self.config.anchor_scales as f64;
    let base = [0.0, 0.0, scale - 1.0, scale - 1.0];
    let x_base = (base[0] + base[2]) * 0.5;
    let y_base = (base[1] + base[3]) * 0.5;
    ANCHOR_HEIGHTS
      .iter()
      .take(self.config.anchor_num)
      .map(|&height| {
        let half_h = height as f64 * 0.5;
        [
          (x_base - scale * 0.5).trunc() as i32,
          (y_base - half_h).trunc() as i32,
          (x_base + scale * 0.5).trunc() as i32,
          (y_base + half_h).trunc() as i32,
        ]
      })
      .collect()
  }

  /// 基础锚框平铺到整张特征图，顺序为行、列、锚框
  pub fn whole_image_anchors(&self, feat_width: usize, feat_height: usize) -> Vec<[i32; 4]> {
    let anchors = self.create_anchors();
    let stride = self.config.feat_stride as i32;
    let mut whole = Vec::with_capacity(feat_width * feat_height * anchors.len());
    for y in 0..feat_height as i32 {
      for x in 0..feat_width as i32 {
        let (sx, sy) = (x * stride, y * stride);
        for a in anchors.iter() {
          whole.push([a[0] + sx, a[1] + sy, a[2] + sx, a[3] + sy]);
        }
      }
    }
    whole
  }

  fn decode_proposals(
    &self,
    box_data: &[f32],
    conf_data: &[f32],
    anchors: &[[i32; 4]],
    feat_width: usize,
    feat_height: usize,
    image: &ImageInfo,
  ) -> Vec<DetectBox> {
    let cfg = &self.config;
    let anchor_num = cfg.anchor_num;
    let box_anchor_size = cfg.feat_box_layer * anchor_num;
    let conf_anchor_size = cfg.feat_conf_layer * anchor_num;
    let max_x = image.model_width as f32 - 1.0;
    let max_y = image.model_height as f32 - 1.0;
    let min_size = cfg.min_size as f32;

    let mut dets = Vec::new();
    for i in 0..feat_height {
      for j in 0..feat_width {
        for k in 0..anchor_num {
          let count = feat_width * anchor_num * i + anchor_num * j + k;
          let b = box_anchor_size * j + k * cfg.feat_box_layer + box_anchor_size * feat_width * i;
          let score = conf_data[conf_anchor_size * j + k * cfg.feat_conf_layer + CONF_OBJECT + conf_anchor_size * feat_width * i];
          let (dy, dh) = (box_data[b + 1], box_data[b + 3]);

          let anchor = anchors[count];
          let anchor_w = (anchor[2] - anchor[0] + 1) as f64;
          let x1 = anchor[0] as f64;
          let x2 = x1 + anchor_w;
          let anchor_h = (anchor[3] - anchor[1] + 1) as f64;
          let anchor_mid = anchor[1] as f64 + anchor_h * 0.5;
          let pred_y = dy as f64 * anchor_h + anchor_mid;
          let pred_h = (dh as f64).exp() * anchor_h;

          let x1 = (x1 as f32).min(max_x).max(0.0);
          let x2 = (x2 as f32).min(max_x).max(0.0);
          let y1 = ((pred_y - pred_h * 0.5) as f32).min(max_y).max(0.0);
          let y2 = ((pred_y + pred_h * 0.5) as f32).min(max_y).max(0.0);

          let large_enough = x2 - x1 + 1.0 >= min_size && y2 - y1 + 1.0 >= min_size;
          if !large_enough || score <= cfg.text_proposals_min_score {
            continue;
          }
          dets.push(DetectBox::from_corners([x1, y1, x2, y2], 0, score));
        }
      }
    }
    dets
  }

  /// 两轮去重：先取前 N 个做宽松过滤，再按分数筛选后做严格过滤
  pub fn suppress_proposals(&self, mut dets: Vec<DetectBox>) -> Vec<TextProposal> {
    let cfg = &self.config;
    dets.sort_by(|a, b| b.prob.total_cmp(&a.prob));
    dets.truncate(cfg.rpn_pre_nms_top_n);
    let mut kept = filter_by_iou(dets, cfg.box_iou_thresh, IouMethod::Union);
    kept.truncate(cfg.rpn_post_nms_top_n);
    debug!("第一轮去重后候选框数量: {}", kept.len());

    kept.retain(|d| d.prob > cfg.text_proposals_min_score);
    let kept = filter_by_iou(kept, cfg.text_iou_thresh, IouMethod::Union);
    debug!("第二轮去重后候选框数量: {}", kept.len());

    kept
      .iter()
      .map(|d| TextProposal::new(d.corners(), d.prob))
      .collect()
  }

  /// 纵向重叠率与高度相似度都达到阈值
  fn is_overlapped(&self, a: &TextProposal, b: &TextProposal) -> bool {
    let (h1, h2) = (a.height(), b.height());
    if is_denominator_zero(h1) || is_denominator_zero(h2) {
      warn!("候选框高度为 0: {}, {}", h1, h2);
      return false;
    }
    let top = a.y0.max(b.y0);
    let bottom = a.y1.min(b.y1);
    let overlap = (bottom - top + 1.0).max(0.0) / h1.min(h2);
    let similarity = h1.min(h2) / h1.max(h2);
    overlap >= self.config.min_over_laps && similarity >= self.config.min_size_sim
  }

  fn successions(&self, proposals: &[TextProposal], table: &[Vec<usize>], index: usize) -> Vec<usize> {
    let target = &proposals[index];
    let left = target.x0 as usize;
    let end = (left + self.config.max_horizontal_gap as usize + 1).min(table.len());
    let mut found = Vec::new();
    for column in (left + 1)..end {
      found.extend(
        table[column]
          .iter()
          .copied()
          .filter(|&adj| self.is_overlapped(&proposals[adj], target)),
      );
      if !found.is_empty() {
        break;
      }
    }
    found
  }

  fn precursors(&self, proposals: &[TextProposal], table: &[Vec<usize>], succession: usize) -> Vec<usize> {
    let target = &proposals[succession];
    let left = target.x0 as i64;
    let lowest = (left - self.config.max_horizontal_gap as i64).max(0);
    let mut found = Vec::new();
    for column in (lowest..left).rev() {
      let Some(entries) = table.get(column as usize) else {
        continue;
      };
      found.extend(
        entries
          .iter()
          .copied()
          .filter(|&adj| self.is_overlapped(&proposals[adj], target)),
      );
      if !found.is_empty() {
        break;
      }
    }
    found
  }

  /// 双向最佳匹配建图：候选框与其右侧最佳后继相连，
  /// 当且仅当它不弱于该后继左侧的所有前驱
  pub fn build_graph(&self, proposals: &[TextProposal], model_width: u32) -> TextGraph {
    let width = model_width as usize;
    let mut table: Vec<Vec<usize>> = vec![Vec::new(); width];
    for (i, p) in proposals.iter().enumerate() {
      if p.x0 >= 0.0 && (p.x0 as usize) < width {
        table[p.x0 as usize].push(i);
      }
    }

    let mut graph = TextGraph::with_nodes(proposals.len());
    for index in 0..proposals.len() {
      let successions = self.successions(proposals, &table, index);
      let mut best = None;
      let mut best_score = f32::NEG_INFINITY;
      for &s in successions.iter() {
        if proposals[s].score > best_score {
          best_score = proposals[s].score;
          best = Some(s);
        }
      }
      let Some(succession) = best else {
        continue;
      };

      let precursors = self.precursors(proposals, &table, succession);
      if precursors.is_empty() {
        continue;
      }
      let precursor_max = precursors
        .iter()
        .map(|&p| proposals[p].score)
        .fold(f32::NEG_INFINITY, f32::max);
      if proposals[index].score >= precursor_max {
        graph.link(index, succession);
      }
    }
    graph
  }

  fn oriented_quad(&self, boxes: &[TextProposal], x0: f32, x1: f32, score: f32) -> Option<TextObjDetectInfo> {
    let mid_x: Vec<f32> = boxes.iter().map(|b| (b.x0 + b.x1) * 0.5).collect();
    let mid_y: Vec<f32> = boxes.iter().map(|b| (b.y0 + b.y1) * 0.5).collect();
    let mean_height = boxes.iter().map(|b| (b.y1 - b.y0) as f64).sum::<f64>() / boxes.len() as f64;
    let line = LineRegression::fit(&mid_x, &mid_y);

    let height_off = mean_height + HEIGHT_OFFSET;
    let (x0, x1) = (x0 as f64, x1 as f64);
    let y1 = line.alpha * x0 + (line.beta - height_off * 0.5);
    let y2 = line.alpha * x1 + (line.beta - height_off * 0.5);
    let y3 = line.alpha * x0 + (line.beta + height_off * 0.5);
    let y4 = line.alpha * x1 + (line.beta + height_off * 0.5);

    let dis_x = (x1 - x0).abs();
    let dis_y = (y2 - y1).abs();
    let width = (dis_x * dis_x + dis_y * dis_y).sqrt();
    if is_denominator_zero_f64(width) {
      error!("文本行宽度为 0");
      return None;
    }
    let shift = (y3 - y1) * dis_y / width;
    let x = (shift * dis_x / width).abs();
    let y = (shift * dis_y / width).abs();

    let quad = if line.alpha < 0.0 {
      [x0 - x, y1 + y, x1, y2, x1 + x, y4 - y, x0, y3]
    } else {
      [x0, y1, x1 + x, y2 + y, x1, y4, x0 - x, y3 - y]
    };
    Some(TextObjDetectInfo {
      x0: quad[0] as f32,
      y0: quad[1] as f32,
      x1: quad[2] as f32,
      y1: quad[3] as f32,
      x2: quad[4] as f32,
      y2: quad[5] as f32,
      x3: quad[6] as f32,
      y3: quad[7] as f32,
      confidence: score,
    })
  }

  fn is_valid_line(&self, line: &TextObjDetectInfo) -> bool {
    let heights = ((line.y2 - line.y0).abs() + (line.y3 - line.y1).abs()) as f64 * 0.5 + 1.0;
    if is_denominator_zero_f64(heights) {
      warn!("文本行高度为 0");
      return false;
    }
    let widths = ((line.x1 - line.x0).abs() + (line.x3 - line.x2).abs()) as f64 * 0.5 + 1.0;
    let cfg = &self.config;
    widths / heights > cfg.min_ratio as f64
      && line.confidence > cfg.line_min_score
      && widths > (cfg.text_proposals_width * cfg.min_num_proposals) as f64
  }

  fn text_line(&self, proposals: &[TextProposal], component: &[usize], image: &ImageInfo) -> Option<TextObjDetectInfo> {
    let boxes: Vec<TextProposal> = component.iter().map(|&i| proposals[i]).collect();
    let first = boxes.first()?;
    let x0s: Vec<f32> = boxes.iter().map(|b| b.x0).collect();
    let y0s: Vec<f32> = boxes.iter().map(|b| b.y0).collect();
    let y1s: Vec<f32> = boxes.iter().map(|b| b.y1).collect();
    let line_x0 = x0s.iter().copied().fold(f32::INFINITY, f32::min);
    let line_x1 = boxes.iter().map(|b| b.x1).fold(f32::NEG_INFINITY, f32::max);
    let offset = (first.x1 - first.x0) * 0.5;

    let top = LineRegression::fit(&x0s, &y0s);
    let bottom = LineRegression::fit(&x0s, &y1s);
    let y0 = top.predict(line_x0 + offset).min(top.predict(line_x1 - offset));
    let y1 = bottom.predict(line_x0 + offset).max(bottom.predict(line_x1 - offset));
    let score = (boxes.iter().map(|b| b.score as f64).sum::<f64>() / boxes.len() as f64) as f32;

    let line = if self.config.is_oriented {
      self.oriented_quad(&boxes, line_x0, line_x1, score)?
    } else {
      let max_x = image.model_width as f32 - 1.0;
      let max_y = image.model_height as f32 - 1.0;
      let x0 = line_x0.min(max_x).max(0.0);
      let x1 = line_x1.min(max_x).max(0.0);
      let y0 = y0.min(max_y).max(0.0);
      let y1 = y1.min(max_y).max(0.0);
      TextObjDetectInfo {
        x0,
        y0,
        x1,
        y1: y0,
        x2: x1,
        y2: y1,
        x3: x0,
        y3: y1,
        confidence: score,
      }
    };
    self.is_valid_line(&line).then_some(line)
  }

  /// 连通分量拟合为文本行并过滤
  pub fn text_lines(&self, proposals: &[TextProposal], graph: &TextGraph, image: &ImageInfo) -> Vec<TextObjDetectInfo> {
    graph
      .components()
      .iter()
      .filter_map(|component| self.text_line(proposals, component, image))
      .collect()
  }
}

impl PostProcessor for CtpnPostProcessor {
  type Output = TextObjDetectInfo;

  fn decode(&self, tensors: &[RawTensor], image: &ImageInfo) -> Result<Vec<TextObjDetectInfo>> {
    if image.model_width == 0 || image.model_height == 0 {
      error!(
        "模型输入尺寸不能为 0: {}x{}",
        image.model_width, image.model_height
      );
      return Err(PostProcessError::invalid("模型输入尺寸为 0"));
    }
    if tensors.len() < MIN_TENSOR_NUM {
      error!("输出张量数量 {} 小于 {}", tensors.len(), MIN_TENSOR_NUM);
      return Err(PostProcessError::invalid("输出张量数量不足"));
    }
    if self.config.check_model {
      let shapes: Vec<Vec<usize>> = tensors.iter().map(|t| t.shape().to_vec()).collect();
      self.check_shapes(&shapes)?;
    }

    let stride = self.config.feat_stride as usize;
    let feat_width = image.model_width as usize / stride;
    let feat_height = image.model_height as usize / stride;
    let cells = feat_width * feat_height * self.config.anchor_num;
    if cells == 0 {
      debug!("特征图为空");
      return Ok(Vec::new());
    }
    let box_data = tensor_at(tensors, BOX_TENSOR)?.f32_covering(cells * self.config.feat_box_layer - 1)?;
    let conf_data = tensor_at(tensors, CONF_TENSOR)?.f32_covering(cells * self.config.feat_conf_layer - 1)?;

    let anchors = self.whole_image_anchors(feat_width, feat_height);
    let dets = self.decode_proposals(box_data, conf_data, &anchors, feat_width, feat_height, image);
    debug!("CTPN 候选框数量: {}", dets.len());
    let proposals = self.suppress_proposals(dets);
    let graph = self.build_graph(&proposals, image.model_width);
    let lines = self.text_lines(&proposals, &graph, image);
    debug!("CTPN 文本行数量: {}", lines.len());
    Ok(lines)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn processor() -> CtpnPostProcessor {
    CtpnBuilder::new(CtpnConfig::default()).build().unwrap()
  }

  fn image(width: u32, height: u32) -> ImageInfo {
    ImageInfo {
      model_width: width,
      model_height: height,
      img_width: width,
      img_height: height,
    }
  }

  #[test]
  fn base_anchors_are_centered() {
    let anchors = processor().create_anchors();
    assert_eq!(anchors.len(), 10);
    assert_eq!(anchors[0], [0, 2, 15, 13]);
    assert_eq!(anchors[1], [0, 0, 15, 15]);
    assert_eq!(anchors[9], [0, -134, 15, 149]);
  }

  #[test]
  fn whole_image_anchors_are_tiled() {
    let whole = processor().whole_image_anchors(3, 2);
    assert_eq!(whole.len(), 3 * 2 * 10);
    // 第 1 行第 2 列的第 1 个锚框
    assert_eq!(whole[(3 + 2) * 10 + 1], [32, 16, 47, 31]);
  }

  #[test]
  fn overlap_requires_similar_heights() {
    let p = processor();
    let a = TextProposal::new([0.0, 0.0, 15.0, 19.0], 0.9);
    let b = TextProposal::new([16.0, 1.0, 31.0, 20.0], 0.9);
    let c = TextProposal::new([16.0, 0.0, 31.0, 59.0], 0.9);
    assert!(p.is_overlapped(&a, &b));
    assert!(!p.is_overlapped(&a, &c));
  }

  #[test]
  fn weaker_box_does_not_steal_link() {
    let p = processor();
    // 0 与 1 同列且都可以连到 2, 只有分数较高者连上
    let proposals = [
      TextProposal::new([10.0, 0.0, 25.0, 19.0], 0.95),
      TextProposal::new([10.0, 1.0, 25.0, 20.0], 0.8),
      TextProposal::new([30.0, 0.0, 45.0, 19.0], 0.9),
    ];
    let graph = p.build_graph(&proposals, 100);
    assert!(graph.is_linked(0, 2));
    assert!(!graph.is_linked(1, 2));
  }

  #[test]
  fn stronger_precursor_of_successor_wins() {
    let p = processor();
    // 1 只与 2 重叠, 不与 0 重叠; 2 的最佳前驱是 1, 因此 0 不连向 2
    let proposals = [
      TextProposal::new([0.0, 0.0, 15.0, 20.0], 0.8),
      TextProposal::new([8.0, 10.0, 23.0, 30.0], 0.9),
      TextProposal::new([16.0, 5.0, 31.0, 25.0], 0.85),
    ];
    assert!(!p.is_overlapped(&proposals[0], &proposals[1]));
    let graph = p.build_graph(&proposals, 100);
    assert!(graph.is_linked(1, 2));
    assert!(!graph.is_linked(0, 2));
    assert!(!graph.is_linked(0, 1));
  }

  #[test]
  fn components_include_isolated_nodes() {
    let mut graph = TextGraph::with_nodes(4);
    graph.link(0, 2);
    graph.link(2, 3);
    assert_eq!(graph.components(), vec![vec![0, 2, 3], vec![1]]);
  }

  #[test]
  fn horizontal_line_becomes_rectangle() {
    let p = processor();
    let proposals: Vec<TextProposal> = (0..4)
      .map(|i| TextProposal::new([16.0 * i as f32, 10.0, 16.0 * i as f32 + 15.0, 29.0], 0.95))
      .collect();
    let graph = p.build_graph(&proposals, 200);
    let lines = p.text_lines(&proposals, &graph, &image(200, 100));
    assert_eq!(lines.len(), 1);
    let line = lines[0];
    assert!((line.x0 - 0.0).abs() < 1e-4);
    assert!((line.x1 - 63.0).abs() < 1e-4);
    assert!((line.y0 - 10.0).abs() < 1e-3);
    assert!((line.y2 - 29.0).abs() < 1e-3);
    assert!((line.confidence - 0.95).abs() < 1e-6);
  }

  #[test]
  fn oriented_line_keeps_horizontal_extent() {
    let config = CtpnConfig {
      is_oriented: true,
      ..CtpnConfig::default()
    };
    let p = CtpnBuilder::new(config).build().unwrap();
    let proposals: Vec<TextProposal> = (0..4)
      .map(|i| TextProposal::new([16.0 * i as f32, 10.0, 16.0 * i as f32 + 15.0, 29.0], 0.95))
      .collect();
    let graph = p.build_graph(&proposals, 200);
    let lines = p.text_lines(&proposals, &graph, &image(200, 100));
    assert_eq!(lines.len(), 1);
    let line = lines[0];
    // 水平中线：高度为平均高度 + 2.5
    assert!((line.x0 - 0.0).abs() < 1e-3);
    assert!((line.x1 - 63.0).abs() < 1e-3);
    assert!((line.y3 - line.y0 - 21.5).abs() < 1e-3);
  }

  #[test]
  fn invalid_anchor_num_is_rejected() {
    let config = CtpnConfig {
      anchor_num: 11,
      ..CtpnConfig::default()
    };
    assert!(CtpnBuilder::new(config).build().is_err());
  }

  #[test]
  fn short_tensors_are_rejected() {
    let p = processor();
    let boxes = RawTensor::from_f32(vec![1, 2, 2, 40], vec![0.0; 10]);
    let scores = RawTensor::from_f32(vec![1, 2, 2, 20], vec![0.0; 80]);
    assert!(matches!(
      p.decode(&[boxes, scores], &image(32, 32)),
      Err(PostProcessError::InvalidParam(_))
    ));
  }
}
