// 该文件是 Shanan （山南西风） 项目的一部分。
// src/error.rs - 后处理错误定义
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

use thiserror::Error;

use crate::config::ConfigError;

/// 后处理错误
///
/// 所有检查都在访问缓冲区之前完成，一次调用失败时不会返回部分结果。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostProcessError {
  #[error("参数无效: {0}")]
  InvalidParam(String),
  #[error("数据缓冲区无效: {0}")]
  InvalidPointer(String),
  #[error("不支持的组合: {0}")]
  Unrealized(String),
}

impl PostProcessError {
  pub fn invalid(msg: impl Into<String>) -> Self {
    PostProcessError::InvalidParam(msg.into())
  }

  pub fn pointer(msg: impl Into<String>) -> Self {
    PostProcessError::InvalidPointer(msg.into())
  }

  pub fn unrealized(msg: impl Into<String>) -> Self {
    PostProcessError::Unrealized(msg.into())
  }
}

impl From<ConfigError> for PostProcessError {
  fn from(err: ConfigError) -> Self {
    PostProcessError::InvalidParam(err.to_string())
  }
}

pub type Result<T> = std::result::Result<T, PostProcessError>;
