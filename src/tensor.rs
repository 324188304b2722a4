// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - 模型输出张量
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

use std::fmt;

use tracing::error;

use crate::error::{PostProcessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
  Float32,
  Int64,
}

impl fmt::Display for DataType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DataType::Float32 => write!(f, "float32"),
      DataType::Int64 => write!(f, "int64"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
enum TensorData {
  Float32(Box<[f32]>),
  Int64(Box<[i64]>),
}

/// 模型输出张量：扁平缓冲区加形状
///
/// 解码器只借用张量，所有下标在访问前都要与缓冲区长度比较。
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
  shape: Box<[usize]>,
  data: TensorData,
}

impl RawTensor {
  pub fn from_f32(shape: impl Into<Vec<usize>>, data: impl Into<Vec<f32>>) -> Self {
    Self {
      shape: shape.into().into_boxed_slice(),
      data: TensorData::Float32(data.into().into_boxed_slice()),
    }
  }

  pub fn from_i64(shape: impl Into<Vec<usize>>, data: impl Into<Vec<i64>>) -> Self {
    Self {
      shape: shape.into().into_boxed_slice(),
      data: TensorData::Int64(data.into().into_boxed_slice()),
    }
  }

  pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
    let shape = shape.into();
    let count = shape.iter().product();
    Self::from_f32(shape, vec![0.0f32; count])
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data_type(&self) -> DataType {
    match self.data {
      TensorData::Float32(_) => DataType::Float32,
      TensorData::Int64(_) => DataType::Int64,
    }
  }

  /// 形状所描述的元素个数
  pub fn element_count(&self) -> usize {
    self.shape.iter().product()
  }

  /// 缓冲区实际长度
  pub fn len(&self) -> usize {
    match &self.data {
      TensorData::Float32(d) => d.len(),
      TensorData::Int64(d) => d.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn as_f32(&self) -> Result<&[f32]> {
    match &self.data {
      TensorData::Float32(d) if !d.is_empty() => Ok(&d[..]),
      TensorData::Float32(_) => {
        error!("张量缓冲区为空");
        Err(PostProcessError::pointer("张量缓冲区为空"))
      }
      TensorData::Int64(_) => {
        error!("张量类型不匹配: 期望 float32, 实际 int64");
        Err(PostProcessError::pointer("期望 float32 张量"))
      }
    }
  }

  pub fn as_i64(&self) -> Result<&[i64]> {
    match &self.data {
      TensorData::Int64(d) if !d.is_empty() => Ok(&d[..]),
      TensorData::Int64(_) => {
        error!("张量缓冲区为空");
        Err(PostProcessError::pointer("张量缓冲区为空"))
      }
      TensorData::Float32(_) => {
        error!("张量类型不匹配: 期望 int64, 实际 float32");
        Err(PostProcessError::pointer("期望 int64 张量"))
      }
    }
  }

  /// 取 float32 缓冲区，并保证下标 `max_index` 可以安全访问
  pub fn f32_covering(&self, max_index: usize) -> Result<&[f32]> {
    let data = self.as_f32()?;
    check_covering(data.len(), max_index)?;
    Ok(data)
  }

  pub fn i64_covering(&self, max_index: usize) -> Result<&[i64]> {
    let data = self.as_i64()?;
    check_covering(data.len(), max_index)?;
    Ok(data)
  }
}

fn check_covering(len: usize, max_index: usize) -> Result<()> {
  if len <= max_index {
    error!("张量数据长度 {} 不足, 需要访问下标 {}", len, max_index);
    return Err(PostProcessError::invalid(format!(
      "张量数据长度 {} 不足, 需要访问下标 {}",
      len, max_index
    )));
  }
  Ok(())
}

/// 按下标取张量，越界时报错
pub fn tensor_at(tensors: &[RawTensor], index: usize) -> Result<&RawTensor> {
  tensors.get(index).ok_or_else(|| {
    error!("张量下标 {} 超出张量数量 {}", index, tensors.len());
    PostProcessError::invalid(format!(
      "张量下标 {} 超出张量数量 {}",
      index,
      tensors.len()
    ))
  })
}
