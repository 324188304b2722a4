// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  FromUrl, FromUrlWithScheme,
  config::LabelMap,
  frame::TensorFrame,
  model::PostProcessOutput,
  output::{Render, labels_from_query, record::Record},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期分目录保存每帧的 JSON 记录
///
/// 路径形如 `<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.json`，默认跳过空结果，
/// 查询参数 `always` 时空结果也会保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  labels: Option<LabelMap>,
  frame_counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        uri.scheme()
      );
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      labels: labels_from_query(uri)?,
      frame_counter: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counter
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<TensorFrame, PostProcessOutput> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &TensorFrame, result: &PostProcessOutput) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("结果为空, 跳过记录");
      return Ok(());
    }
    let path = self.frame_path(Utc::now())?;
    let json = Record::new(frame, result, self.labels.as_ref()).to_json(true)?;
    std::fs::write(&path, json)?;
    debug!("记录已保存: {}", path.display());
    Ok(())
  }
}
