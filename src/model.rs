// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{fmt, str::FromStr};

use serde::Serialize;
use tracing::{debug, error};

use crate::{
  config::ConfigData,
  coordinate::{self, ImageInfo, MAX_IMAGE_EDGE, PostImageInfo},
  error::{PostProcessError, Result},
  nms::{self, DetectBox, IouMethod},
  frame::TensorFrame,
  tensor::RawTensor,
};

/// 以一帧输出张量为输入的推理后处理模型
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> std::result::Result<Self::Output, Self::Error>;
}

/// 检测框（左上、右下角点形式）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObjDetectInfo {
  pub x0: f32,
  pub y0: f32,
  pub x1: f32,
  pub y1: f32,
  pub confidence: f32,
  pub class_id: usize,
}

impl ObjDetectInfo {
  pub fn new(bbox: [f32; 4], confidence: f32, class_id: usize) -> Self {
    let [x0, y0, x1, y1] = bbox;
    Self {
      x0,
      y0,
      x1,
      y1,
      confidence,
      class_id,
    }
  }

  pub fn bbox(&self) -> [f32; 4] {
    [self.x0, self.y0, self.x1, self.y1]
  }

  pub fn to_detect_box(&self) -> DetectBox {
    DetectBox::from_corners(self.bbox(), self.class_id, self.confidence)
  }

  /// 由中心点形式还原，坐标截断到 [0, 1]
  pub fn from_detect_box(det: &DetectBox) -> Self {
    let [x0, y0, x1, y1] = det.corners();
    Self {
      x0: x0.max(0.0),
      y0: y0.max(0.0),
      x1: x1.min(1.0),
      y1: y1.min(1.0),
      confidence: det.prob,
      class_id: det.class_id,
    }
  }

  /// 按整数部分判断，(-1, 0) 之间的坐标视为 0
  fn is_in_image_range(&self) -> bool {
    self
      .bbox()
      .iter()
      .all(|&v| v.is_finite() && (0..=MAX_IMAGE_EDGE as i64).contains(&(v as i64)))
  }
}

/// 文本行四边形，顶点顺序为左上、右上、右下、左下
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TextObjDetectInfo {
  pub x0: f32,
  pub y0: f32,
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub x3: f32,
  pub y3: f32,
  pub confidence: f32,
}

impl TextObjDetectInfo {
  pub fn points(&self) -> [(f32, f32); 4] {
    [
      (self.x0, self.y0),
      (self.x1, self.y1),
      (self.x2, self.y2),
      (self.x3, self.y3),
    ]
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[T]>,
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl<T> From<Vec<T>> for DetectResult<T> {
  fn from(items: Vec<T>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 解码结果还原到原图坐标的方式
pub trait ToImageSpace: Sized {
  fn to_image_space(items: Vec<Self>, info: &PostImageInfo) -> Result<Vec<Self>>;
}

impl ToImageSpace for ObjDetectInfo {
  fn to_image_space(items: Vec<Self>, info: &PostImageInfo) -> Result<Vec<Self>> {
    coordinate::to_image_space(items, info)
  }
}

impl ToImageSpace for TextObjDetectInfo {
  fn to_image_space(items: Vec<Self>, info: &PostImageInfo) -> Result<Vec<Self>> {
    coordinate::text_to_image_space(items, info)
  }
}

/// 模型后处理器
///
/// `decode` 只负责把输出张量解码为模型空间的结果（含去重），
/// 参数校验与坐标还原由 [`process`] 统一完成。
pub trait PostProcessor {
  type Output: ToImageSpace + fmt::Debug;

  fn decode(&self, tensors: &[RawTensor], image: &ImageInfo) -> Result<Vec<Self::Output>>;

  fn process(&self, tensors: &[RawTensor], info: &PostImageInfo) -> Result<DetectResult<Self::Output>>
  where
    Self: Sized,
  {
    process(self, tensors, info)
  }
}

pub fn process<M: PostProcessor>(
  model: &M,
  tensors: &[RawTensor],
  info: &PostImageInfo,
) -> Result<DetectResult<M::Output>> {
  let image = info.image_info()?;
  let decoded = model.decode(tensors, &image)?;
  debug!("解码得到 {} 个结果", decoded.len());
  let items = M::Output::to_image_space(decoded, info)?;
  for item in items.iter() {
    debug!("检测结果: {:?}", item);
  }
  Ok(items.into())
}

/// 角点形式的结果做按类别 NMS，结果坐标截断到 [0, 1]
pub fn nms_sort(objects: Vec<ObjDetectInfo>, iou_thresh: f32, method: IouMethod) -> Result<Vec<ObjDetectInfo>> {
  if let Some(bad) = objects.iter().find(|obj| !obj.is_in_image_range()) {
    error!("检测框坐标无效: {:?}", bad);
    return Err(PostProcessError::invalid("检测框坐标超出范围"));
  }
  let boxes = objects.iter().map(ObjDetectInfo::to_detect_box).collect();
  Ok(
    nms::suppress(boxes, iou_thresh, method)
      .iter()
      .map(ObjDetectInfo::from_detect_box)
      .collect(),
  )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
  Yolo,
  FasterRcnn,
  Ctpn,
}

impl FromStr for ModelKind {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "yolo" | "yolov3" => Ok(ModelKind::Yolo),
      "faster-rcnn" | "fasterrcnn" | "faster_rcnn" => Ok(ModelKind::FasterRcnn),
      "ctpn" => Ok(ModelKind::Ctpn),
      other => Err(format!("未知的模型类型: {}", other)),
    }
  }
}

impl fmt::Display for ModelKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelKind::Yolo => write!(f, "yolo"),
      ModelKind::FasterRcnn => write!(f, "faster-rcnn"),
      ModelKind::Ctpn => write!(f, "ctpn"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PostProcessOutput {
  Objects(DetectResult<ObjDetectInfo>),
  Texts(DetectResult<TextObjDetectInfo>),
}

impl PostProcessOutput {
  pub fn len(&self) -> usize {
    match self {
      PostProcessOutput::Objects(r) => r.len(),
      PostProcessOutput::Texts(r) => r.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 按模型类型分派的后处理器
#[derive(Debug, Clone)]
pub enum PostProcessorWrapper {
  Yolo(YoloPostProcessor),
  FasterRcnn(FasterRcnnPostProcessor),
  Ctpn(CtpnPostProcessor),
}

impl PostProcessorWrapper {
  /// `output_shapes` 非空时在构建阶段检查模型输出是否兼容
  pub fn build(kind: ModelKind, config: &ConfigData, output_shapes: &[Vec<usize>]) -> Result<Self> {
    let shapes = output_shapes.to_vec();
    Ok(match kind {
      ModelKind::Yolo => PostProcessorWrapper::Yolo(
        YoloBuilder::from_config(config)?
          .output_shapes(shapes)
          .build()?,
      ),
      ModelKind::FasterRcnn => PostProcessorWrapper::FasterRcnn(
        FasterRcnnBuilder::from_config(config)?
          .output_shapes(shapes)
          .build()?,
      ),
      ModelKind::Ctpn => PostProcessorWrapper::Ctpn(
        CtpnBuilder::from_config(config)?
          .output_shapes(shapes)
          .build()?,
      ),
    })
  }

  pub fn kind(&self) -> ModelKind {
    match self {
      PostProcessorWrapper::Yolo(_) => ModelKind::Yolo,
      PostProcessorWrapper::FasterRcnn(_) => ModelKind::FasterRcnn,
      PostProcessorWrapper::Ctpn(_) => ModelKind::Ctpn,
    }
  }

  pub fn process(&self, tensors: &[RawTensor], info: &PostImageInfo) -> Result<PostProcessOutput> {
    match self {
      PostProcessorWrapper::Yolo(m) => m.process(tensors, info).map(PostProcessOutput::Objects),
      PostProcessorWrapper::FasterRcnn(m) => m.process(tensors, info).map(PostProcessOutput::Objects),
      PostProcessorWrapper::Ctpn(m) => m.process(tensors, info).map(PostProcessOutput::Texts),
    }
  }
}

impl Model for PostProcessorWrapper {
  type Input = TensorFrame;
  type Output = PostProcessOutput;
  type Error = PostProcessError;

  fn infer(&self, input: &TensorFrame) -> Result<PostProcessOutput> {
    self.process(input.tensors(), input.image())
  }
}

mod ctpn;
mod faster_rcnn;
mod yolo;

pub use self::ctpn::{CtpnBuilder, CtpnConfig, CtpnPostProcessor};
pub use self::faster_rcnn::{FasterRcnnBuilder, FasterRcnnConfig, FasterRcnnMode, FasterRcnnPostProcessor};
pub use self::yolo::{
  Framework, OutputLayer, TensorLayout, YoloBuilder, YoloConfig, YoloPostProcessor,
};
