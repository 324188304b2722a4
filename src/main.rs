// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shanan_postprocess::{
  FromUrl,
  config::ConfigData,
  input::InputWrapper,
  model::PostProcessorWrapper,
  output::OutputWrapper,
  task::{OneShotTask, RepeatShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型类型: {}", args.model);
  info!("配置文件: {}", args.config);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = ConfigData::from_url(&args.config)?;
  let mut input = InputWrapper::from_url(&args.input)?;
  let first = input
    .next()
    .ok_or_else(|| anyhow::anyhow!("输入中没有任何帧"))?;
  let model = PostProcessorWrapper::build(args.model, &config, &first.output_shapes())?;
  let output = OutputWrapper::from_url(&args.output)?;

  let frames = std::iter::once(first).chain(input);
  match args.repeat {
    Some(times) => RepeatShotTask::new(times).run_task(frames, model, output)?,
    None => OneShotTask.run_task(frames, model, output)?,
  }

  Ok(())
}
