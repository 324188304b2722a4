// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/faster_rcnn.rs - FasterRCNN 后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::{debug, error, info, warn};

use crate::{
  config::{ConfigData, ObjectConfig},
  coordinate::ImageInfo,
  error::{PostProcessError, Result},
  model::{ObjDetectInfo, PostProcessor, nms_sort},
  nms::IouMethod,
  tensor::{DataType, RawTensor, tensor_at},
};

const BOX_DIM: usize = 4;
const FPN_BOX_DIM: usize = 5;
const FPN_SCORE_OFFSET: usize = 4;
const MIN_TENSOR_NUM: usize = 4;
const FPN_TENSOR_NUM: usize = 2;
const FPN_MAX_CLASS_ID: i64 = 80;
const MAX_TENSOR_INDEX: usize = 5000;

const DEFAULT_IOU_THRESH: f32 = 0.45;

// 框数据排列为 (y0, x0, y1, x1)
const TOP_Y: usize = 0;
const LEFT_X: usize = 1;
const BOTTOM_Y: usize = 2;
const RIGHT_X: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FasterRcnnMode {
  /// 模型未做 NMS
  Raw,
  /// 模型已完成 NMS
  NmsFinished,
  /// FPN 输出
  Fpn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FasterRcnnConfig {
  pub object: ObjectConfig,
  pub iou_thresh: f32,
  pub mode: FasterRcnnMode,
  /// 参与打分的类别数，未做 NMS 时不含背景类
  pub score_class_num: usize,
  pub object_num_tensor: usize,
  pub bbox_tensor: usize,
  pub confidence_tensor: usize,
  pub confidence_uncut_tensor: usize,
  pub bbox_uncut_tensor: usize,
  pub class_id_uncut_tensor: usize,
}

impl FasterRcnnConfig {
  pub fn from_config(config: &ConfigData) -> Result<Self> {
    let object = ObjectConfig::from_config(config)?;
    let iou_thresh = config.get_or("IOU_THRESH", DEFAULT_IOU_THRESH, 0.0, 1.0);
    let nms_finished = config.get_bool_or("NMS_FINISHED", false);
    let fpn_switch = config.get_bool_or("FPN_SWITCH", false);
    let mode = if fpn_switch {
      FasterRcnnMode::Fpn
    } else if nms_finished {
      FasterRcnnMode::NmsFinished
    } else {
      FasterRcnnMode::Raw
    };

    let score_class_num = if nms_finished {
      object.class_num
    } else {
      object.class_num.saturating_sub(1)
    };

    Ok(Self {
      iou_thresh,
      mode,
      score_class_num,
      object_num_tensor: config.get_or("OBJECT_NUM_TENSOR", 0, 0, MAX_TENSOR_INDEX),
      bbox_tensor: config.get_or("BBOX_TENSOR", 1, 0, MAX_TENSOR_INDEX),
      confidence_tensor: config.get_or("CONFIDENCE_TENSOR", 2, 0, MAX_TENSOR_INDEX),
      confidence_uncut_tensor: config.get_or("CONFIDENCE_UNCUT_TENSOR", 1, 0, MAX_TENSOR_INDEX),
      bbox_uncut_tensor: config.get_or("BBOX_UNCUT_TENSOR", 2, 0, MAX_TENSOR_INDEX),
      class_id_uncut_tensor: config.get_or("CLASSID_UNCUT_TENSOR", 3, 0, MAX_TENSOR_INDEX),
      object,
    })
  }
}

pub struct FasterRcnnBuilder {
  config: FasterRcnnConfig,
  output_shapes: Vec<Vec<usize>>,
}

impl FasterRcnnBuilder {
  pub fn from_config(config: &ConfigData) -> Result<Self> {
    info!("开始初始化 FasterRCNN 后处理");
    Ok(Self {
      config: FasterRcnnConfig::from_config(config)?,
      output_shapes: Vec::new(),
    })
  }

  pub fn new(config: FasterRcnnConfig) -> Self {
    Self {
      config,
      output_shapes: Vec::new(),
    }
  }

  pub fn output_shapes(mut self, shapes: Vec<Vec<usize>>) -> Self {
    self.output_shapes = shapes;
    self
  }

  pub fn build(self) -> Result<FasterRcnnPostProcessor> {
    let processor = FasterRcnnPostProcessor {
      config: self.config,
    };
    let shapes = &self.output_shapes;
    if shapes.is_empty() {
      debug!("未提供模型输出形状, 跳过模型检查");
    } else if processor.config.mode == FasterRcnnMode::Fpn {
      // FPN 模式总是检查
      processor.check_fpn_model(shapes)?;
    } else if !processor.config.object.check_model {
      warn!("CHECK_MODEL 为 false, 跳过模型检查, 请确认模型输出正确");
    } else if processor.config.mode == FasterRcnnMode::NmsFinished {
      processor.check_nms_finished_model(shapes)?;
    } else {
      processor.check_raw_model(shapes)?;
    }
    info!("FasterRCNN 后处理初始化完成, 模式 {:?}", processor.config.mode);
    Ok(processor)
  }
}

#[derive(Debug, Clone)]
pub struct FasterRcnnPostProcessor {
  config: FasterRcnnConfig,
}

fn model_check_failed(msg: String) -> PostProcessError {
  error!("{}", msg);
  PostProcessError::invalid(msg)
}

/// 读取检测数量，数量张量可以是 float32 或 int64
fn detected_number(tensor: &RawTensor) -> Result<usize> {
  let value = match tensor.data_type() {
    DataType::Float32 => tensor.as_f32()?[0] as i64,
    DataType::Int64 => tensor.as_i64()?[0],
  };
  if value < 0 {
    warn!("检测数量为负数: {}", value);
  }
  Ok(value.max(0) as usize)
}

/// `count` 个宽为 `stride` 的元素中最后一个的下标
fn last_index(count: usize, stride: usize) -> Result<usize> {
  match count.checked_mul(stride) {
    Some(len) if len > 0 => Ok(len - 1),
    _ => Err(model_check_failed(format!("检测数量 {} 超出范围", count))),
  }
}

impl FasterRcnnPostProcessor {
  pub fn config(&self) -> &FasterRcnnConfig {
    &self.config
  }

  fn check_raw_model(&self, shapes: &[Vec<usize>]) -> Result<()> {
    if shapes.len() < MIN_TENSOR_NUM - 1 {
      return Err(model_check_failed(format!(
        "输出张量数量 {} 小于 {}",
        shapes.len(),
        MIN_TENSOR_NUM - 1
      )));
    }
    let index = self.config.bbox_tensor;
    let Some(shape) = shapes.get(index) else {
      return Err(model_check_failed(format!("BBOX_TENSOR ({}) 超出张量数量", index)));
    };
    if shape.len() != 4 || shape[2] != self.config.score_class_num || shape[3] != BOX_DIM {
      return Err(model_check_failed(format!(
        "框张量形状 {:?} 应为 [.., .., {}, {}]",
        shape, self.config.score_class_num, BOX_DIM
      )));
    }
    Ok(())
  }

  fn check_nms_finished_model(&self, shapes: &[Vec<usize>]) -> Result<()> {
    if shapes.len() < MIN_TENSOR_NUM {
      return Err(model_check_failed(format!(
        "输出张量数量 {} 小于 {}",
        shapes.len(),
        MIN_TENSOR_NUM
      )));
    }
    let index = self.config.bbox_uncut_tensor;
    let Some(shape) = shapes.get(index) else {
      return Err(model_check_failed(format!("BBOX_UNCUT_TENSOR ({}) 超出张量数量", index)));
    };
    if shape.len() != 3 || shape[2] != BOX_DIM {
      return Err(model_check_failed(format!(
        "框张量形状 {:?} 应为 [.., .., {}]",
        shape, BOX_DIM
      )));
    }
    Ok(())
  }

  fn check_fpn_model(&self, shapes: &[Vec<usize>]) -> Result<()> {
    if shapes.len() != FPN_TENSOR_NUM {
      return Err(model_check_failed(format!(
        "FPN 输出张量数量 {} 不等于 {}",
        shapes.len(),
        FPN_TENSOR_NUM
      )));
    }
    let index = self.config.object_num_tensor;
    let Some(shape) = shapes.get(index) else {
      return Err(model_check_failed(format!("OBJECT_NUM_TENSOR ({}) 超出张量数量", index)));
    };
    if shape.len() != 2 || shape[1] != FPN_BOX_DIM {
      return Err(model_check_failed(format!(
        "FPN 框张量形状 {:?} 应为 [n, {}]",
        shape, FPN_BOX_DIM
      )));
    }
    Ok(())
  }

  fn decode_raw(&self, tensors: &[RawTensor], image: &ImageInfo) -> Result<Vec<ObjDetectInfo>> {
    if tensors.len() < MIN_TENSOR_NUM {
      return Err(model_check_failed(format!(
        "输出张量数量 {} 小于 {}",
        tensors.len(),
        MIN_TENSOR_NUM
      )));
    }
    let count = detected_number(tensor_at(tensors, self.config.object_num_tensor)?)?;
    let class_num = self.config.score_class_num;
    if count == 0 || class_num == 0 {
      debug!("没有候选框");
      return Ok(Vec::new());
    }
    let bbox = tensor_at(tensors, self.config.bbox_tensor)?.f32_covering(last_index(count, class_num * BOX_DIM)?)?;
    let conf = tensor_at(tensors, self.config.confidence_tensor)?.f32_covering(last_index(count, class_num)?)?;

    let model_w = image.model_width as f32;
    let model_h = image.model_height as f32;
    let mut objects = Vec::new();
    for j in 0..count {
      let scores = &conf[j * class_num..(j + 1) * class_num];
      let mut max_prob = 0.0f32;
      let mut max_index = 0usize;
      for (k, &score) in scores.iter().enumerate() {
        if max_prob < score {
          max_prob = score;
          max_index = k;
        }
      }
      if max_prob <= self.config.object.threshold_of(max_index) {
        continue;
      }
      let base = j * class_num * BOX_DIM + max_index * BOX_DIM;
      objects.push(ObjDetectInfo {
        x0: bbox[base + LEFT_X] / model_w,
        y0: bbox[base + TOP_Y] / model_h,
        x1: bbox[base + RIGHT_X] / model_w,
        y1: bbox[base + BOTTOM_Y] / model_h,
        confidence: max_prob,
        class_id: max_index + 1,
      });
    }
    debug!("FasterRCNN 候选框数量: {}", objects.len());
    nms_sort(objects, self.config.iou_thresh, IouMethod::Union)
  }

  fn decode_nms_finished(&self, tensors: &[RawTensor]) -> Result<Vec<ObjDetectInfo>> {
    if tensors.len() < MIN_TENSOR_NUM {
      return Err(model_check_failed(format!(
        "输出张量数量 {} 小于 {}",
        tensors.len(),
        MIN_TENSOR_NUM
      )));
    }
    let count = detected_number(tensor_at(tensors, self.config.object_num_tensor)?)?;
    if count == 0 {
      debug!("模型没有输出检测结果");
      return Ok(Vec::new());
    }
    let bbox = tensor_at(tensors, self.config.bbox_uncut_tensor)?.f32_covering(last_index(count, BOX_DIM)?)?;
    let conf = tensor_at(tensors, self.config.confidence_uncut_tensor)?.f32_covering(count - 1)?;
    let class_ids = tensor_at(tensors, self.config.class_id_uncut_tensor)?.f32_covering(count - 1)?;

    let thresholds = &self.config.object.separate_score_thresh;
    let mut objects = Vec::new();
    for i in 0..count {
      // 类别 0 为背景
      if class_ids[i] <= 0.0 {
        continue;
      }
      let class_id = class_ids[i] as usize;
      match thresholds.get(class_id) {
        Some(&thresh) if conf[i] >= thresh => {}
        _ => continue,
      }
      let base = i * BOX_DIM;
      objects.push(ObjDetectInfo {
        x0: bbox[base + LEFT_X],
        y0: bbox[base + TOP_Y],
        x1: bbox[base + RIGHT_X],
        y1: bbox[base + BOTTOM_Y],
        confidence: conf[i],
        class_id,
      });
    }
    debug!("FasterRCNN 检测结果数量: {}", objects.len());
    Ok(objects)
  }

  fn decode_fpn(&self, tensors: &[RawTensor], image: &ImageInfo) -> Result<Vec<ObjDetectInfo>> {
    if tensors.len() != FPN_TENSOR_NUM {
      return Err(model_check_failed(format!(
        "FPN 输出张量数量 {} 不等于 {}",
        tensors.len(),
        FPN_TENSOR_NUM
      )));
    }
    let box_tensor = tensor_at(tensors, self.config.object_num_tensor)?;
    let count = box_tensor.shape().first().copied().unwrap_or(0);
    if count == 0 {
      debug!("模型没有输出检测结果");
      return Ok(Vec::new());
    }
    let boxes = box_tensor.f32_covering(last_index(count, FPN_BOX_DIM)?)?;
    let class_ids = tensor_at(tensors, self.config.bbox_tensor)?.i64_covering(count - 1)?;

    let model_w = image.model_width as f32;
    let model_h = image.model_height as f32;
    let mut objects = Vec::new();
    for i in 0..count {
      let class_id = class_ids[i];
      if !(0..=FPN_MAX_CLASS_ID).contains(&class_id) {
        continue;
      }
      let class_id = class_id as usize;
      let b = &boxes[i * FPN_BOX_DIM..(i + 1) * FPN_BOX_DIM];
      let confidence = b[FPN_SCORE_OFFSET];
      if confidence < self.config.object.threshold_of(class_id) {
        continue;
      }
      objects.push(ObjDetectInfo {
        x0: b[0] / model_w,
        y0: b[1] / model_h,
        x1: b[2] / model_w,
        y1: b[3] / model_h,
        confidence,
        class_id,
      });
    }
    debug!("FasterRCNN FPN 检测结果数量: {}", objects.len());
    Ok(objects)
  }
}

impl PostProcessor for FasterRcnnPostProcessor {
  type Output = ObjDetectInfo;

  fn decode(&self, tensors: &[RawTensor], image: &ImageInfo) -> Result<Vec<ObjDetectInfo>> {
    if image.model_width == 0 || image.model_height == 0 {
      error!(
        "模型输入尺寸不能为 0: {}x{}",
        image.model_width, image.model_height
      );
      return Err(PostProcessError::invalid("模型输入尺寸为 0"));
    }
    match self.config.mode {
      FasterRcnnMode::Raw => self.decode_raw(tensors, image),
      FasterRcnnMode::NmsFinished => self.decode_nms_finished(tensors),
      FasterRcnnMode::Fpn => self.decode_fpn(tensors, image),
    }
  }
}
