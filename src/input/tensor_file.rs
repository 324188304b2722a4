// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/tensor_file.rs - 张量文件输入
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

use std::collections::VecDeque;

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  coordinate::PostImageInfo,
  frame::TensorFrame,
  tensor::RawTensor,
};

const TENSOR_FILE_SCHEME: &str = "tensor";

#[derive(Error, Debug)]
pub enum TensorFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("第 {frame} 帧第 {tensor} 个张量形状 {shape:?} 与数据长度 {len} 不符")]
  ShapeMismatch {
    frame: usize,
    tensor: usize,
    shape: Vec<usize>,
    len: usize,
  },
  #[error("文件中没有任何帧")]
  Empty,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum RecordType {
  Float32,
  Int64,
}

#[derive(Deserialize, Debug)]
struct TensorRecord {
  dtype: RecordType,
  shape: Vec<usize>,
  data: Vec<f64>,
}

#[derive(Deserialize, Debug)]
struct FrameRecord {
  image: PostImageInfo,
  tensors: Vec<TensorRecord>,
}

/// 文件内容可以是单帧，也可以是帧数组
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum FileRecord {
  Single(FrameRecord),
  Multiple(Vec<FrameRecord>),
}

impl TensorRecord {
  fn into_tensor(self, frame: usize, tensor: usize) -> Result<RawTensor, TensorFileInputError> {
    let expected: usize = self.shape.iter().product();
    if expected != self.data.len() {
      error!(
        "张量形状 {:?} 需要 {} 个元素, 实际 {} 个",
        self.shape,
        expected,
        self.data.len()
      );
      return Err(TensorFileInputError::ShapeMismatch {
        frame,
        tensor,
        shape: self.shape,
        len: self.data.len(),
      });
    }
    Ok(match self.dtype {
      RecordType::Float32 => RawTensor::from_f32(self.shape, self.data.iter().map(|&v| v as f32).collect::<Vec<_>>()),
      RecordType::Int64 => RawTensor::from_i64(self.shape, self.data.iter().map(|&v| v as i64).collect::<Vec<_>>()),
    })
  }
}

/// 从 JSON 文件读取的推理输出，按顺序逐帧产出
#[derive(Debug)]
pub struct TensorFileInput {
  frames: VecDeque<TensorFrame>,
}

impl TensorFileInput {
  pub fn parse(text: &str) -> Result<Self, TensorFileInputError> {
    let records = match serde_json::from_str::<FileRecord>(text)? {
      FileRecord::Single(frame) => vec![frame],
      FileRecord::Multiple(frames) => frames,
    };
    if records.is_empty() {
      return Err(TensorFileInputError::Empty);
    }

    let mut frames = VecDeque::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
      let tensors = record
        .tensors
        .into_iter()
        .enumerate()
        .map(|(j, t)| t.into_tensor(i, j))
        .collect::<Result<Vec<_>, _>>()?;
      frames.push_back(TensorFrame::new(tensors, record.image));
    }
    Ok(Self { frames })
  }

  /// 第一帧各输出张量的形状，用于构建阶段的模型检查
  pub fn output_shapes(&self) -> Vec<Vec<usize>> {
    self
      .frames
      .front()
      .map(TensorFrame::output_shapes)
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl FromUrlWithScheme for TensorFileInput {
  const SCHEME: &'static str = TENSOR_FILE_SCHEME;
}

impl FromUrl for TensorFileInput {
  type Error = TensorFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(TensorFileInputError::SchemeMismatch);
    }

    let text = std::fs::read_to_string(url.path())?;
    let input = Self::parse(&text)?;
    info!("从 {} 读取 {} 帧张量", url.path(), input.len());
    Ok(input)
  }
}

impl Iterator for TensorFileInput {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frames.pop_front()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::DataType;

  const SINGLE: &str = r#"{
    "image": { "width_resize": 416, "height_resize": 416, "width_original": 640, "height_original": 480 },
    "tensors": [
      { "dtype": "float32", "shape": [1, 2], "data": [0.5, 1.5] },
      { "dtype": "int64", "shape": [2], "data": [3, 4] }
    ]
  }"#;

  #[test]
  fn single_frame_is_parsed() {
    let mut input = TensorFileInput::parse(SINGLE).unwrap();
    assert_eq!(input.len(), 1);
    assert_eq!(input.output_shapes(), vec![vec![1, 2], vec![2]]);
    let frame = input.next().unwrap();
    assert_eq!(frame.tensors().len(), 2);
    assert_eq!(frame.tensors()[0].as_f32().unwrap(), &[0.5, 1.5]);
    assert_eq!(frame.tensors()[1].data_type(), DataType::Int64);
    assert_eq!(frame.image().height_original, 480);
    assert!(input.next().is_none());
  }

  #[test]
  fn frame_array_is_parsed_in_order() {
    let text = format!("[{}, {}]", SINGLE, SINGLE.replace("640", "320"));
    let input = TensorFileInput::parse(&text).unwrap();
    let widths: Vec<u32> = input.map(|f| f.image().width_original).collect();
    assert_eq!(widths, vec![640, 320]);
  }

  #[test]
  fn mismatched_shape_is_rejected() {
    let text = SINGLE.replace("\"shape\": [1, 2]", "\"shape\": [1, 3]");
    assert!(matches!(
      TensorFileInput::parse(&text),
      Err(TensorFileInputError::ShapeMismatch { frame: 0, tensor: 0, .. })
    ));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(matches!(
      TensorFileInput::from_url(&url),
      Err(TensorFileInputError::SchemeMismatch)
    ));
  }
}
