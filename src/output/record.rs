// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/record.rs - 检测结果记录格式
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::Serialize;

use crate::{
  config::LabelMap,
  coordinate::PostImageInfo,
  frame::TensorFrame,
  model::{ObjDetectInfo, PostProcessOutput, TextObjDetectInfo},
};

#[derive(Serialize, Debug)]
pub struct LabeledObject<'a> {
  #[serde(flatten)]
  object: &'a ObjDetectInfo,
  #[serde(skip_serializing_if = "Option::is_none")]
  label: Option<&'a str>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum RecordItems<'a> {
  Objects(Vec<LabeledObject<'a>>),
  Texts(&'a [TextObjDetectInfo]),
}

/// 一帧的记录：图像信息加检测结果（原图坐标）
#[derive(Serialize, Debug)]
pub struct Record<'a> {
  image: &'a PostImageInfo,
  #[serde(flatten)]
  items: RecordItems<'a>,
}

impl<'a> Record<'a> {
  pub fn new(frame: &'a TensorFrame, result: &'a PostProcessOutput, labels: Option<&'a LabelMap>) -> Self {
    let items = match result {
      PostProcessOutput::Objects(objects) => RecordItems::Objects(
        objects
          .items
          .iter()
          .map(|object| LabeledObject {
            object,
            label: labels.and_then(|l| l.name(object.class_id)),
          })
          .collect(),
      ),
      PostProcessOutput::Texts(texts) => RecordItems::Texts(&texts.items),
    };
    Self {
      image: frame.image(),
      items,
    }
  }

  pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
    if pretty {
      serde_json::to_string_pretty(self)
    } else {
      serde_json::to_string(self)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectResult;

  fn frame() -> TensorFrame {
    TensorFrame::new(Vec::new(), PostImageInfo::new(416, 416, 640, 480))
  }

  #[test]
  fn objects_carry_label_names() {
    let labels = LabelMap::parse("person\nbicycle\n");
    let result = PostProcessOutput::Objects(DetectResult::from(vec![ObjDetectInfo::new(
      [1.0, 2.0, 3.0, 4.0],
      0.5,
      1,
    )]));
    let frame = frame();
    let json = Record::new(&frame, &result, Some(&labels)).to_json(false).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["objects"][0]["label"], "bicycle");
    assert_eq!(value["objects"][0]["class_id"], 1);
    assert_eq!(value["image"]["width_original"], 640);
  }

  #[test]
  fn texts_are_recorded_without_labels() {
    let result = PostProcessOutput::Texts(DetectResult::from(vec![TextObjDetectInfo::default()]));
    let frame = frame();
    let json = Record::new(&frame, &result, None).to_json(true).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["texts"].as_array().map(Vec::len), Some(1));
    assert!(value.get("objects").is_none());
  }
}
