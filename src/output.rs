// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::LabelMap,
  frame::TensorFrame,
  model::PostProcessOutput,
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod record;

mod stdout_output;
pub use self::stdout_output::{StdoutOutput, StdoutOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("标准输出错误: {0}")]
  StdoutOutputError(#[from] StdoutOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 读取 `labels` 查询参数指定的类别名称文件
pub(crate) fn labels_from_query(url: &Url) -> std::io::Result<Option<LabelMap>> {
  let Some((_, path)) = url.query_pairs().find(|(k, _)| k == "labels") else {
    return Ok(None);
  };
  let text = std::fs::read_to_string(path.as_ref())?;
  let labels = LabelMap::parse(&text);
  info!("从 {} 加载 {} 个类别名称", path, labels.len());
  Ok(Some(labels))
}

pub enum OutputWrapper {
  Stdout(StdoutOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      StdoutOutput::SCHEME => {
        let output = StdoutOutput::from_url(url)?;
        Ok(OutputWrapper::Stdout(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecord(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<TensorFrame, PostProcessOutput> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &TensorFrame, result: &PostProcessOutput) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Stdout(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
