// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 推理输出张量输入
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

use crate::{FromUrl, FromUrlWithScheme, frame::TensorFrame};

mod tensor_file;

pub use self::tensor_file::{TensorFileInput, TensorFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("张量文件输入错误: {0}")]
  TensorFileInputError(#[from] TensorFileInputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  TensorFile(TensorFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == TensorFileInput::SCHEME {
      let input = TensorFileInput::from_url(url)?;
      return Ok(InputWrapper::TensorFile(input));
    }
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::TensorFile(input) => input.next(),
    }
  }
}
