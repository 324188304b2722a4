// tests/pipeline_tests.rs
use shanan_postprocess::{
  config::ConfigData,
  coordinate::PostImageInfo,
  frame::TensorFrame,
  model::{ModelKind, Model, PostProcessOutput, PostProcessorWrapper},
  tensor::RawTensor,
};

const BIASES: &str = "10,13,16,30,33,23,30,61,62,45,59,119,116,90,156,198,373,326";

fn build(kind: ModelKind, config: &ConfigData, tensors: &[RawTensor]) -> PostProcessorWrapper {
  let shapes: Vec<Vec<usize>> = tensors.iter().map(|t| t.shape().to_vec()).collect();
  PostProcessorWrapper::build(kind, config, &shapes).unwrap()
}

fn objects(output: PostProcessOutput) -> Vec<shanan_postprocess::model::ObjDetectInfo> {
  match output {
    PostProcessOutput::Objects(result) => result.items.into_vec(),
    PostProcessOutput::Texts(_) => panic!("期望检测框结果"),
  }
}

fn texts(output: PostProcessOutput) -> Vec<shanan_postprocess::model::TextObjDetectInfo> {
  match output {
    PostProcessOutput::Texts(result) => result.items.into_vec(),
    PostProcessOutput::Objects(_) => panic!("期望文本行结果"),
  }
}

#[test]
fn yolov3_all_zero_output_is_empty() {
  let config = ConfigData::new()
    .with("CLASS_NUM", 20)
    .with("BIASES_NUM", 18)
    .with("BIASES", BIASES);
  let tensors = vec![
    RawTensor::zeros(vec![1, 13, 13, 75]),
    RawTensor::zeros(vec![1, 26, 26, 75]),
    RawTensor::zeros(vec![1, 52, 52, 75]),
  ];
  let model = build(ModelKind::Yolo, &config, &tensors);
  let frame = TensorFrame::new(tensors, PostImageInfo::new(416, 416, 1280, 720));
  let output = model.infer(&frame).unwrap();
  assert!(output.is_empty());
}

#[test]
fn yolov3_single_cell_maps_to_image() {
  let config = ConfigData::new()
    .with("CLASS_NUM", 2)
    .with("BIASES_NUM", 18)
    .with("BIASES", BIASES)
    .with("YOLO_TYPE", 1);
  let (grid, channels, anchors) = (13usize, 7usize, 3usize);
  let mut data = vec![-10.0f32; grid * grid * anchors * channels];
  let (row, col) = (3usize, 9usize);
  let base = channels * anchors * (row * grid + col);
  data[base..base + 4].fill(0.0);
  data[base + 4] = 10.0;
  data[base + 6] = 10.0;
  let tensors = vec![RawTensor::from_f32(vec![1, grid, grid, anchors * channels], data)];

  let model = build(ModelKind::Yolo, &config, &tensors);
  let frame = TensorFrame::new(tensors, PostImageInfo::new(416, 416, 832, 832));
  let found = objects(model.infer(&frame).unwrap());
  assert_eq!(found.len(), 1);
  let obj = found[0];
  assert_eq!(obj.class_id, 1);
  assert!(obj.confidence > 0.99);
  // 第一个锚框 (10, 13), 原图放大 2 倍
  let cx = (col as f32 + 0.5) / grid as f32 * 832.0;
  let cy = (row as f32 + 0.5) / grid as f32 * 832.0;
  assert!((obj.x0 - (cx - 10.0)).abs() < 1e-2);
  assert!((obj.x1 - (cx + 10.0)).abs() < 1e-2);
  assert!((obj.y0 - (cy - 13.0)).abs() < 1e-2);
  assert!((obj.y1 - (cy + 13.0)).abs() < 1e-2);
}

#[test]
fn faster_rcnn_nms_finished_applies_class_thresholds() {
  let config = ConfigData::new()
    .with("CLASS_NUM", 4)
    .with("NMS_FINISHED", true)
    .with("SEPARATE_SCORE_THRESH", "0.5,0.5,0.5,0.9");
  let tensors = vec![
    RawTensor::from_f32(vec![1], vec![3.0]),
    RawTensor::from_f32(vec![1, 3], vec![0.8, 0.7, 0.8]),
    RawTensor::from_f32(
      vec![1, 3, 4],
      vec![
        0.1, 0.1, 0.2, 0.2, //
        0.5, 0.5, 0.6, 0.7, //
        0.3, 0.3, 0.4, 0.4,
      ],
    ),
    RawTensor::from_f32(vec![1, 3], vec![1.0, 2.0, 3.0]),
  ];
  let model = build(ModelKind::FasterRcnn, &config, &tensors);
  let frame = TensorFrame::new(tensors, PostImageInfo::new(600, 600, 1000, 500));
  let found = objects(model.infer(&frame).unwrap());
  assert_eq!(found.len(), 2);
  assert_eq!(found[0].class_id, 1);
  assert_eq!(found[1].class_id, 2);
  // (y0, x0, y1, x1) 布局
  assert!((found[1].x1 - 700.0).abs() < 1e-3);
  assert!((found[1].y1 - 300.0).abs() < 1e-3);
}

/// 单锚框 CTPN 输出，`columns` 为第 0 行上有文字的格子
fn ctpn_tensors(feat_width: usize, feat_height: usize, columns: &[usize]) -> Vec<RawTensor> {
  let boxes = RawTensor::zeros(vec![1, feat_height, feat_width, 4]);
  let mut scores = vec![0.0f32; feat_height * feat_width * 2];
  for &j in columns {
    scores[2 * j + 1] = 0.95;
  }
  vec![boxes, RawTensor::from_f32(vec![1, feat_height, feat_width, 2], scores)]
}

#[test]
fn ctpn_links_neighbouring_proposals_into_lines() {
  let config = ConfigData::new().with("ANCHORNUM", 1);
  let tensors = ctpn_tensors(16, 2, &[0, 1, 2, 3, 10, 11, 12, 13]);
  let model = build(ModelKind::Ctpn, &config, &tensors);
  let frame = TensorFrame::new(tensors, PostImageInfo::new(256, 32, 512, 64));
  let lines = texts(model.infer(&frame).unwrap());

  // 两组之间的间隔超过 MAX_HORIZONTAL_GAP
  assert_eq!(lines.len(), 2);
  assert!((lines[0].x0 - 0.0).abs() < 1e-3);
  assert!((lines[0].x1 - 128.0).abs() < 1e-3);
  assert!((lines[1].x0 - 320.0).abs() < 1e-3);
  assert!((lines[1].x1 - 448.0).abs() < 1e-3);
  for line in lines.iter() {
    assert!((line.y0 - 4.0).abs() < 1e-3);
    assert!((line.y2 - 28.0).abs() < 1e-3);
    assert!((line.confidence - 0.95).abs() < 1e-5);
  }
}

#[test]
fn ctpn_drops_short_lines() {
  let config = ConfigData::new().with("ANCHORNUM", 1);
  let tensors = ctpn_tensors(16, 2, &[5]);
  let model = build(ModelKind::Ctpn, &config, &tensors);
  let frame = TensorFrame::new(tensors, PostImageInfo::new(256, 32, 256, 32));
  assert!(model.infer(&frame).unwrap().is_empty());
}

#[test]
fn model_kind_is_reported() {
  let config = ConfigData::new().with("ANCHORNUM", 1);
  let model = PostProcessorWrapper::build(ModelKind::Ctpn, &config, &[]).unwrap();
  assert_eq!(model.kind(), ModelKind::Ctpn);
  assert_eq!(model.kind().to_string(), "ctpn");
}
