// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolo.rs - YOLO v3/v4/v5 后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::{
  config::{ConfigData, ObjectConfig, parse_float_list},
  coordinate::ImageInfo,
  error::{PostProcessError, Result},
  model::{ObjDetectInfo, PostProcessor, nms_sort},
  nms::IouMethod,
  tensor::RawTensor,
  utils::sigmoid,
};

const YOLO_SCALE: u32 = 32;
const YOLO_BOX_DIM: usize = 4;
const YOLO_INFO_DIM: usize = YOLO_BOX_DIM + 1;
const YOLO_ANCHOR_NUM: usize = 6;
const YOLO_MIN_RANK: usize = 4;

const DEFAULT_OBJECTNESS_THRESH: f32 = 0.3;
const DEFAULT_IOU_THRESH: f32 = 0.45;
const DEFAULT_ANCHOR_DIM: usize = 3;
const DEFAULT_BIASES_NUM: usize = 18;
const DEFAULT_YOLO_TYPE: usize = 3;
const DEFAULT_YOLO_VERSION: u32 = 3;

/// 输出张量的内存排布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  Nhwc,
  Nchw,
  Nchwc,
}

impl TensorLayout {
  pub fn from_index(index: u32) -> Option<Self> {
    match index {
      0 => Some(TensorLayout::Nhwc),
      1 => Some(TensorLayout::Nchw),
      2 => Some(TensorLayout::Nchwc),
      _ => None,
    }
  }

  /// 特征图宽、高所在的维度
  fn grid_dims(self) -> (usize, usize) {
    match self {
      TensorLayout::Nhwc => (2, 1),
      TensorLayout::Nchw | TensorLayout::Nchwc => (3, 2),
    }
  }
}

impl fmt::Display for TensorLayout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TensorLayout::Nhwc => write!(f, "NHWC"),
      TensorLayout::Nchw => write!(f, "NCHW"),
      TensorLayout::Nchwc => write!(f, "NCHWC"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framework {
  Tensorflow,
  Caffe,
  Mindspore,
  Pytorch,
  Other(String),
}

impl Framework {
  pub fn parse(name: &str) -> Self {
    match name.trim().to_ascii_lowercase().as_str() {
      "tensorflow" => Framework::Tensorflow,
      "caffe" => Framework::Caffe,
      "mindspore" => Framework::Mindspore,
      "pytorch" => Framework::Pytorch,
      other => Framework::Other(other.to_string()),
    }
  }

  fn default_for(version: u32, layout: TensorLayout) -> Self {
    match (version, layout) {
      (4, _) => Framework::Mindspore,
      (5, _) => Framework::Pytorch,
      (3, TensorLayout::Nchw) => Framework::Caffe,
      _ => Framework::Tensorflow,
    }
  }
}

impl fmt::Display for Framework {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Framework::Tensorflow => write!(f, "tensorflow"),
      Framework::Caffe => write!(f, "caffe"),
      Framework::Mindspore => write!(f, "mindspore"),
      Framework::Pytorch => write!(f, "pytorch"),
      Framework::Other(name) => write!(f, "{}", name),
    }
  }
}

/// 具体的解码方式，由版本、框架与排布共同决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
  Nhwc,
  Nchw,
  Nchwc,
  /// 输出已经过激活
  MindsporeNhwc,
}

impl Variant {
  fn select(version: u32, framework: &Framework, layout: TensorLayout) -> Option<Self> {
    match (version, framework, layout) {
      (3, Framework::Tensorflow, TensorLayout::Nhwc) => Some(Variant::Nhwc),
      (3, Framework::Caffe, TensorLayout::Nchw) => Some(Variant::Nchw),
      (4, Framework::Mindspore, TensorLayout::Nhwc) => Some(Variant::MindsporeNhwc),
      (4, Framework::Pytorch, TensorLayout::Nchw) => Some(Variant::Nchw),
      (5, Framework::Pytorch, TensorLayout::Nchwc) => Some(Variant::Nchwc),
      _ => None,
    }
  }

  fn iou_method(self) -> IouMethod {
    match self {
      Variant::MindsporeNhwc => IouMethod::Diou,
      _ => IouMethod::Union,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct YoloConfig {
  pub object: ObjectConfig,
  pub objectness_thresh: f32,
  pub iou_thresh: f32,
  pub anchor_dim: usize,
  /// 所有层的锚框宽高，按 (w, h) 交替排列
  pub biases: Vec<f32>,
  pub yolo_type: usize,
  pub yolo_version: u32,
  pub layout: TensorLayout,
  pub framework: Framework,
}

impl YoloConfig {
  pub fn from_config(config: &ConfigData) -> Result<Self> {
    let object = ObjectConfig::from_config(config)?;
    let biases_num = config.get_or("BIASES_NUM", DEFAULT_BIASES_NUM, 0, 100);
    let objectness_thresh = config.get_or("OBJECTNESS_THRESH", DEFAULT_OBJECTNESS_THRESH, 0.0, 1.0);
    let iou_thresh = config.get_or("IOU_THRESH", DEFAULT_IOU_THRESH, 0.0, 1.0);
    let yolo_type = config.get_or("YOLO_TYPE", DEFAULT_YOLO_TYPE, 0, 16);
    let yolo_version = config.get_or("YOLO_VERSION", DEFAULT_YOLO_VERSION, 0, 16);
    let anchor_dim = config.get_or("ANCHOR_DIM", DEFAULT_ANCHOR_DIM, 0, 16);

    let layout_index = match config.get_in_range::<u32>("MODEL_TYPE", 0, 2) {
      Ok(Some(index)) => index,
      Ok(None) if yolo_version == 5 => {
        warn!("配置中缺少 MODEL_TYPE, YOLOv5 使用 NCHWC");
        2
      }
      Ok(None) => {
        warn!("配置中缺少 MODEL_TYPE, 使用 NHWC");
        0
      }
      Err(e) => {
        error!("读取 MODEL_TYPE 失败: {}", e);
        return Err(e.into());
      }
    };
    let layout = TensorLayout::from_index(layout_index)
      .ok_or_else(|| PostProcessError::invalid(format!("不支持的 MODEL_TYPE: {}", layout_index)))?;

    let framework = match config.get_str("FRAMEWORK") {
      Some(name) => Framework::parse(name),
      None => {
        let framework = Framework::default_for(yolo_version, layout);
        warn!("配置中缺少 FRAMEWORK, 使用默认值 {}", framework);
        framework
      }
    };

    let biases = match config.get_str("BIASES") {
      Some(text) => parse_float_list("BIASES", text)?,
      None => {
        error!("配置中缺少 BIASES");
        return Err(PostProcessError::invalid("配置中缺少 BIASES"));
      }
    };
    if biases.len() != biases_num {
      error!(
        "BIASES_NUM ({}) 与 BIASES 数量 ({}) 不一致",
        biases_num,
        biases.len()
      );
      return Err(PostProcessError::invalid(format!(
        "BIASES 需要 {} 个值, 实际为 {}",
        biases_num,
        biases.len()
      )));
    }

    Ok(Self {
      object,
      objectness_thresh,
      iou_thresh,
      anchor_dim,
      biases,
      yolo_type,
      yolo_version,
      layout,
      framework,
    })
  }

  /// 单个锚框在输出通道中占用的长度
  fn anchor_channels(&self) -> usize {
    YOLO_INFO_DIM + self.object.class_num
  }
}

/// 一个 YOLO 特征层
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputLayer {
  pub layer_index: usize,
  pub grid_width: usize,
  pub grid_height: usize,
  pub anchors: [f32; YOLO_ANCHOR_NUM],
}

struct NetInfo {
  anchor_dim: usize,
  class_num: usize,
  net_width: f32,
  net_height: f32,
}

pub struct YoloBuilder {
  config: YoloConfig,
  output_shapes: Vec<Vec<usize>>,
}

impl YoloBuilder {
  pub fn from_config(config: &ConfigData) -> Result<Self> {
    info!("开始初始化 YOLO 后处理");
    Ok(Self {
      config: YoloConfig::from_config(config)?,
      output_shapes: Vec::new(),
    })
  }

  pub fn new(config: YoloConfig) -> Self {
    Self {
      config,
      output_shapes: Vec::new(),
    }
  }

  /// 模型输出张量形状，用于构建阶段的兼容性检查
  pub fn output_shapes(mut self, shapes: Vec<Vec<usize>>) -> Self {
    self.output_shapes = shapes;
    self
  }

  pub fn build(self) -> Result<YoloPostProcessor> {
    let config = self.config;
    info!(
      "YOLO 后处理设置: Yolov{}, {}, {}",
      config.yolo_version, config.framework, config.layout
    );
    let variant = Variant::select(config.yolo_version, &config.framework, config.layout).ok_or_else(|| {
      error!(
        "不支持的组合 Yolov{}-{}-{}, 仅支持 Yolov3-tensorflow-NHWC, Yolov3-caffe-NCHW, \
         Yolov4-mindspore-NHWC, Yolov4-pytorch-NCHW, Yolov5-pytorch-NCHWC",
        config.yolo_version, config.framework, config.layout
      );
      PostProcessError::unrealized(format!(
        "Yolov{}-{}-{}",
        config.yolo_version, config.framework, config.layout
      ))
    })?;
    if config.anchor_dim * 2 > YOLO_ANCHOR_NUM {
      error!("ANCHOR_DIM ({}) 超出每层锚框上限", config.anchor_dim);
      return Err(PostProcessError::invalid("ANCHOR_DIM 过大"));
    }

    let processor = YoloPostProcessor { config, variant };
    if self.output_shapes.is_empty() {
      debug!("未提供模型输出形状, 跳过模型检查");
    } else if !processor.config.object.check_model {
      warn!("CHECK_MODEL 为 false, 跳过模型检查");
    } else {
      processor.check_shapes(&self.output_shapes)?;
    }
    info!("YOLO 后处理初始化完成");
    Ok(processor)
  }
}

#[derive(Debug, Clone)]
pub struct YoloPostProcessor {
  config: YoloConfig,
  variant: Variant,
}

impl YoloPostProcessor {
  pub fn config(&self) -> &YoloConfig {
    &self.config
  }

  fn check_shapes(&self, shapes: &[Vec<usize>]) -> Result<()> {
    if shapes.len() != self.config.yolo_type {
      error!(
        "输出张量数量 ({}) 与 YOLO_TYPE ({}) 不一致",
        shapes.len(),
        self.config.yolo_type
      );
      return Err(PostProcessError::invalid("输出张量数量与 YOLO_TYPE 不一致"));
    }
    let expected = self.config.anchor_dim * self.config.anchor_channels();
    for (i, shape) in shapes.iter().enumerate() {
      if shape.len() < YOLO_MIN_RANK {
        error!("第 {} 个输出张量维度数 {} 小于 {}", i, shape.len(), YOLO_MIN_RANK);
        return Err(PostProcessError::invalid("输出张量维度数不足"));
      }
      let channels = match self.config.layout {
        TensorLayout::Nhwc => shape[3..].iter().product::<usize>(),
        TensorLayout::Nchw => shape[1..shape.len() - 2].iter().product::<usize>(),
        TensorLayout::Nchwc => {
          if shape.len() == YOLO_MIN_RANK {
            error!("NCHWC 输出张量需要 5 个维度, 实际为 {:?}", shape);
            return Err(PostProcessError::invalid("NCHWC 输出张量维度数错误"));
          }
          shape[1] * shape[4]
        }
      };
      if channels != expected {
        error!(
          "第 {} 个输出张量通道数 ({}) 与 ANCHOR_DIM * (CLASS_NUM + 5) ({}) 不一致",
          i, channels, expected
        );
        return Err(PostProcessError::invalid("输出张量通道数不匹配"));
      }
    }
    Ok(())
  }

  fn output_layer(&self, layer_index: usize, shape: &[usize], net_width: u32) -> Result<OutputLayer> {
    let (w_dim, h_dim) = self.config.layout.grid_dims();
    let grid_width = shape[w_dim];
    let grid_height = shape[h_dim];

    let ratio = (grid_width as f32 * YOLO_SCALE as f32) / net_width as f32;
    let log_order = ratio.log2() as i64;
    let span = (self.config.anchor_dim * 2) as i64;
    let start = (self.config.yolo_type as i64 - 1 - log_order) * span;
    let end = start + span;
    if start < 0 || end > self.config.biases.len() as i64 {
      error!(
        "第 {} 层锚框下标 [{}, {}) 超出 BIASES 范围 {}",
        layer_index,
        start,
        end,
        self.config.biases.len()
      );
      return Err(PostProcessError::invalid("锚框下标越界"));
    }

    let mut anchors = [0.0f32; YOLO_ANCHOR_NUM];
    for (slot, &bias) in anchors.iter_mut().zip(&self.config.biases[start as usize..end as usize]) {
      *slot = bias;
    }
    Ok(OutputLayer {
      layer_index,
      grid_width,
      grid_height,
      anchors,
    })
  }

  fn decode_layer(&self, data: &[f32], info: &NetInfo, layer: &OutputLayer, boxes: &mut Vec<ObjDetectInfo>) {
    let stride = layer.grid_width * layer.grid_height;
    let channels = YOLO_INFO_DIM + info.class_num;
    let object = &self.config.object;

    for j in 0..stride {
      let row = (j / layer.grid_width) as f32;
      let col = (j % layer.grid_width) as f32;
      for k in 0..info.anchor_dim {
        // 字段 f 的下标为 base + f * step
        let (base, step) = match self.variant {
          Variant::Nchw => (channels * stride * k + j, stride),
          Variant::Nhwc | Variant::MindsporeNhwc => (channels * info.anchor_dim * j + k * channels, 1),
          Variant::Nchwc => (channels * stride * k + j * channels, 1),
        };
        let field = |f: usize| data[base + f * step];

        let objectness = match self.variant {
          Variant::MindsporeNhwc => {
            let min_thresh = object
              .separate_score_thresh
              .iter()
              .copied()
              .fold(f32::INFINITY, f32::min);
            let objectness = field(YOLO_BOX_DIM);
            if objectness < min_thresh {
              continue;
            }
            objectness
          }
          _ => {
            let objectness = sigmoid(field(YOLO_BOX_DIM));
            if objectness <= self.config.objectness_thresh {
              continue;
            }
            objectness
          }
        };

        let mut class_id = None;
        let mut max_prob = object.score_thresh;
        for c in 0..info.class_num {
          let raw = field(YOLO_INFO_DIM + c);
          let prob = match self.variant {
            Variant::MindsporeNhwc => raw * objectness,
            _ => sigmoid(raw) * objectness,
          };
          if prob > max_prob {
            max_prob = prob;
            class_id = Some(c);
          }
        }
        let Some(class_id) = class_id else {
          continue;
        };
        if max_prob <= object.threshold_of(class_id) {
          continue;
        }

        let (anchor_w, anchor_h) = (layer.anchors[2 * k], layer.anchors[2 * k + 1]);
        let (x, y, width, height) = match self.variant {
          Variant::MindsporeNhwc => (field(0), field(1), field(2), field(3)),
          Variant::Nchwc => {
            let w = sigmoid(field(2)) * 2.0;
            let h = sigmoid(field(3)) * 2.0;
            (
              (col + sigmoid(field(0)) * 2.0 - 0.5) / layer.grid_width as f32,
              (row + sigmoid(field(1)) * 2.0 - 0.5) / layer.grid_height as f32,
              w * w * anchor_w / info.net_width,
              h * h * anchor_h / info.net_height,
            )
          }
          Variant::Nhwc | Variant::Nchw => (
            (col + sigmoid(field(0))) / layer.grid_width as f32,
            (row + sigmoid(field(1))) / layer.grid_height as f32,
            field(2).exp() * anchor_w / info.net_width,
            field(3).exp() * anchor_h / info.net_height,
          ),
        };

        boxes.push(ObjDetectInfo {
          x0: (x - width / 2.0).max(0.0),
          y0: (y - height / 2.0).max(0.0),
          x1: (x + width / 2.0).min(1.0),
          y1: (y + height / 2.0).min(1.0),
          confidence: max_prob,
          class_id,
        });
      }
    }
  }
}

impl PostProcessor for YoloPostProcessor {
  type Output = ObjDetectInfo;

  fn decode(&self, tensors: &[RawTensor], image: &ImageInfo) -> Result<Vec<ObjDetectInfo>> {
    if image.model_width == 0 || image.model_height == 0 {
      error!(
        "模型输入尺寸不能为 0: {}x{}",
        image.model_width, image.model_height
      );
      return Err(PostProcessError::invalid("模型输入尺寸为 0"));
    }
    let shapes: Vec<Vec<usize>> = tensors.iter().map(|t| t.shape().to_vec()).collect();
    self.check_shapes(&shapes)?;

    let info = NetInfo {
      anchor_dim: self.config.anchor_dim,
      class_num: self.config.object.class_num,
      net_width: image.model_width as f32,
      net_height: image.model_height as f32,
    };

    // 先完成所有层的检查，再解码
    let mut layers = Vec::with_capacity(tensors.len());
    for (i, tensor) in tensors.iter().enumerate() {
      let layer = self.output_layer(i, tensor.shape(), image.model_width)?;
      let count = layer.grid_width * layer.grid_height * info.anchor_dim * (YOLO_INFO_DIM + info.class_num);
      if count == 0 {
        error!("第 {} 个输出张量为空: {:?}", i, tensor.shape());
        return Err(PostProcessError::invalid("输出张量为空"));
      }
      let data = tensor.f32_covering(count - 1)?;
      layers.push((layer, data));
    }

    let mut boxes = Vec::new();
    for (layer, data) in layers.iter() {
      self.decode_layer(data, &info, layer, &mut boxes);
    }
    debug!("YOLO 候选框数量: {}", boxes.len());
    nms_sort(boxes, self.config.iou_thresh, self.variant.iou_method())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const BIASES: &str = "10,13,16,30,33,23,30,61,62,45,59,119,116,90,156,198,373,326";

  fn base_config() -> ConfigData {
    ConfigData::new()
      .with("CLASS_NUM", 2)
      .with("BIASES_NUM", 18)
      .with("BIASES", BIASES)
  }

  fn image() -> ImageInfo {
    ImageInfo {
      model_width: 416,
      model_height: 416,
      img_width: 416,
      img_height: 416,
    }
  }

  #[test]
  fn framework_defaults_follow_version() {
    let v4 = YoloConfig::from_config(&base_config().with("YOLO_VERSION", 4)).unwrap();
    assert_eq!(v4.framework, Framework::Mindspore);
    assert_eq!(v4.layout, TensorLayout::Nhwc);

    let v5 = YoloConfig::from_config(&base_config().with("YOLO_VERSION", 5)).unwrap();
    assert_eq!(v5.framework, Framework::Pytorch);
    assert_eq!(v5.layout, TensorLayout::Nchwc);

    let caffe = YoloConfig::from_config(&base_config().with("MODEL_TYPE", 1)).unwrap();
    assert_eq!(caffe.framework, Framework::Caffe);

    let named = YoloConfig::from_config(&base_config().with("FRAMEWORK", "TensorFlow")).unwrap();
    assert_eq!(named.framework, Framework::Tensorflow);
  }

  #[test]
  fn biases_count_must_match() {
    let config = base_config().with("BIASES_NUM", 12);
    assert!(matches!(
      YoloConfig::from_config(&config),
      Err(PostProcessError::InvalidParam(_))
    ));
    let config = ConfigData::new().with("CLASS_NUM", 2);
    assert!(YoloConfig::from_config(&config).is_err());
  }

  #[test]
  fn unsupported_combination_is_unrealized() {
    let config = base_config().with("FRAMEWORK", "caffe");
    let result = YoloBuilder::from_config(&config).unwrap().build();
    assert!(matches!(result, Err(PostProcessError::Unrealized(_))));
  }

  #[test]
  fn anchor_slice_follows_pyramid_level() {
    let processor = YoloBuilder::from_config(&base_config()).unwrap().build().unwrap();
    let coarse = processor.output_layer(0, &[1, 13, 13, 21], 416).unwrap();
    assert_eq!(coarse.anchors, [116.0, 90.0, 156.0, 198.0, 373.0, 326.0]);
    let fine = processor.output_layer(2, &[1, 52, 52, 21], 416).unwrap();
    assert_eq!(fine.anchors, [10.0, 13.0, 16.0, 30.0, 33.0, 23.0]);
    // 特征图过大时下标为负
    assert!(processor.output_layer(0, &[1, 208, 208, 21], 416).is_err());
  }

  #[test]
  fn build_checks_channel_count() {
    let ok = YoloBuilder::from_config(&base_config())
      .unwrap()
      .output_shapes(vec![vec![1, 13, 13, 21], vec![1, 26, 26, 21], vec![1, 52, 52, 21]])
      .build();
    assert!(ok.is_ok());

    let bad = YoloBuilder::from_config(&base_config())
      .unwrap()
      .output_shapes(vec![vec![1, 13, 13, 20], vec![1, 26, 26, 21], vec![1, 52, 52, 21]])
      .build();
    assert!(matches!(bad, Err(PostProcessError::InvalidParam(_))));

    let skipped = YoloBuilder::from_config(&base_config().with("CHECK_MODEL", false))
      .unwrap()
      .output_shapes(vec![vec![1, 13, 13, 20]])
      .build();
    assert!(skipped.is_ok());
  }

  #[test]
  fn nchw_single_cell_decodes() {
    let config = base_config().with("MODEL_TYPE", 1).with("YOLO_TYPE", 1);
    let processor = YoloBuilder::from_config(&config).unwrap().build().unwrap();
    // 只有一层时使用前 6 个锚框值
    let (w, h, channels) = (13usize, 13usize, 7usize);
    let stride = w * h;
    let mut data = vec![-10.0f32; 3 * channels * stride];
    let (k, row, col) = (1usize, 4usize, 6usize);
    let j = row * w + col;
    let base = channels * stride * k + j;
    data[base] = 0.0;
    data[base + stride] = 0.0;
    data[base + 2 * stride] = 0.0;
    data[base + 3 * stride] = 0.0;
    data[base + 4 * stride] = 10.0;
    data[base + 6 * stride] = 10.0;
    let tensor = RawTensor::from_f32(vec![1, 3 * channels, h, w], data);

    let boxes = processor.decode(&[tensor], &image()).unwrap();
    assert_eq!(boxes.len(), 1);
    let obj = boxes[0];
    assert_eq!(obj.class_id, 1);
    let cx = (col as f32 + 0.5) / w as f32;
    let cy = (row as f32 + 0.5) / h as f32;
    let half_w = 16.0 / 416.0 / 2.0;
    let half_h = 30.0 / 416.0 / 2.0;
    assert!((obj.x0 - (cx - half_w)).abs() < 1e-4);
    assert!((obj.y1 - (cy + half_h)).abs() < 1e-4);
  }

  #[test]
  fn nchwc_single_cell_decodes() {
    let config = base_config()
      .with("YOLO_VERSION", 5)
      .with("MODEL_TYPE", 2)
      .with("YOLO_TYPE", 1);
    let processor = YoloBuilder::from_config(&config).unwrap().build().unwrap();
    let (w, h, channels) = (13usize, 13usize, 7usize);
    let stride = w * h;
    let mut data = vec![-10.0f32; 3 * stride * channels];
    let (k, row, col) = (1usize, 4usize, 6usize);
    let base = channels * stride * k + (row * w + col) * channels;
    // 中心 x 偏移 1.5 格, 宽度为锚框的 4 倍, 高度等于锚框
    data[base..base + channels].copy_from_slice(&[10.0, 0.0, 10.0, 0.0, 10.0, -10.0, 10.0]);
    let tensor = RawTensor::from_f32(vec![1, 3, h, w, channels], data);

    let boxes = processor.decode(&[tensor], &image()).unwrap();
    assert_eq!(boxes.len(), 1);
    let obj = boxes[0];
    assert_eq!(obj.class_id, 1);
    let cx = (col as f32 + 1.5) / w as f32;
    let cy = (row as f32 + 0.5) / h as f32;
    let half_w = 4.0 * 16.0 / 416.0 / 2.0;
    let half_h = 30.0 / 416.0 / 2.0;
    assert!((obj.x0 - (cx - half_w)).abs() < 1e-4);
    assert!((obj.x1 - (cx + half_w)).abs() < 1e-4);
    assert!((obj.y0 - (cy - half_h)).abs() < 1e-4);
    assert!((obj.y1 - (cy + half_h)).abs() < 1e-4);
  }

  #[test]
  fn score_equal_to_class_threshold_is_dropped() {
    let config = base_config()
      .with("YOLO_VERSION", 4)
      .with("YOLO_TYPE", 1)
      .with("SCORE_THRESH", 0.3)
      .with("SEPARATE_SCORE_THRESH", "0.5,0.3");
    let processor = YoloBuilder::from_config(&config).unwrap().build().unwrap();
    let (w, h, channels) = (13usize, 13usize, 7usize);
    let mut data = vec![0.0f32; w * h * 3 * channels];
    // 两个格子的分数都是 0.5: 类别 0 恰好等于阈值, 类别 1 高于阈值
    let first = channels * 3 * 20;
    data[first..first + channels].copy_from_slice(&[0.2, 0.2, 0.1, 0.1, 0.5, 1.0, 0.0]);
    let second = channels * 3 * 100;
    data[second..second + channels].copy_from_slice(&[0.7, 0.7, 0.1, 0.1, 0.5, 0.0, 1.0]);
    let tensor = RawTensor::from_f32(vec![1, h, w, 3 * channels], data);

    let boxes = processor.decode(&[tensor], &image()).unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].class_id, 1);
  }

  #[test]
  fn mindspore_uses_raw_values() {
    let config = base_config()
      .with("YOLO_VERSION", 4)
      .with("YOLO_TYPE", 1)
      .with("SCORE_THRESH", 0.5);
    let processor = YoloBuilder::from_config(&config).unwrap().build().unwrap();
    let (w, h, channels) = (13usize, 13usize, 7usize);
    let mut data = vec![0.0f32; w * h * 3 * channels];
    let j = 20usize;
    let base = channels * 3 * j;
    data[base..base + channels].copy_from_slice(&[0.5, 0.5, 0.2, 0.4, 0.9, 0.8, 0.1]);
    let tensor = RawTensor::from_f32(vec![1, h, w, 3 * channels], data);

    let boxes = processor.decode(&[tensor], &image()).unwrap();
    assert_eq!(boxes.len(), 1);
    let obj = boxes[0];
    assert_eq!(obj.class_id, 0);
    assert!((obj.confidence - 0.72).abs() < 1e-6);
    assert!((obj.x0 - 0.4).abs() < 1e-6);
    assert!((obj.y1 - 0.7).abs() < 1e-6);
  }

  #[test]
  fn short_buffer_is_rejected() {
    let config = base_config().with("YOLO_TYPE", 1);
    let processor = YoloBuilder::from_config(&config).unwrap().build().unwrap();
    let tensor = RawTensor::from_f32(vec![1, 13, 13, 21], vec![0.0f32; 100]);
    assert!(matches!(
      processor.decode(&[tensor], &image()),
      Err(PostProcessError::InvalidParam(_))
    ));
  }
}
