// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/stdout_output.rs - 标准输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::Write;

use thiserror::Error;
use tracing::error;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::LabelMap,
  frame::TensorFrame,
  model::PostProcessOutput,
  output::{Render, labels_from_query, record::Record},
};

#[derive(Error, Debug)]
pub enum StdoutOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每帧输出一行 JSON（`pretty` 时为多行）
pub struct StdoutOutput {
  labels: Option<LabelMap>,
  pretty: bool,
}

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = StdoutOutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(StdoutOutputError::SchemeMismatch);
    }

    Ok(StdoutOutput {
      labels: labels_from_query(url)?,
      pretty: url.query_pairs().any(|(k, _)| k == "pretty"),
    })
  }
}

impl Render<TensorFrame, PostProcessOutput> for StdoutOutput {
  type Error = StdoutOutputError;

  fn render_result(&self, frame: &TensorFrame, result: &PostProcessOutput) -> Result<(), Self::Error> {
    let json = Record::new(frame, result, self.labels.as_ref()).to_json(self.pretty)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", json)?;
    Ok(())
  }
}
