// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 后处理任务
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

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 逐帧处理直到输入耗尽
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut frame_count = 0usize;
    for frame in input {
      frame_count += 1;
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("第 {} 帧后处理完成，耗时: {:.2?}", frame_count, elapsed);
      output.render_result(&frame, &result)?;
    }
    if frame_count == 0 {
      return Err(anyhow::anyhow!("没有输入帧"));
    }
    info!("任务完成，共处理 {} 帧", frame_count);
    Ok(())
  }
}

/// 对第一帧重复后处理，用于测量耗时
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  pub const DEFAULT_TIMES: usize = 1000;
  const WARMUP: usize = 2;

  pub fn new(times: usize) -> Self {
    Self { times: times.max(1) }
  }
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self::new(Self::DEFAULT_TIMES)
  }
}

/// 去掉预热轮次后的平均耗时
pub fn average_time(times: &[Duration], warmup: usize) -> Option<Duration> {
  let measured = if times.len() > warmup { &times[warmup..] } else { times };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始后处理...");
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})后处理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    if let Some(average) = average_time(&times, Self::WARMUP) {
      warn!("平均后处理时间: {:.2?}", average);
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;

  #[derive(Debug, thiserror::Error)]
  #[error("测试错误")]
  struct TestError;

  struct Doubler;

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = TestError;

    fn infer(&self, input: &u32) -> Result<u32, TestError> {
      Ok(input * 2)
    }
  }

  #[derive(Default)]
  struct Collect {
    seen: Cell<u32>,
    calls: Cell<usize>,
  }

  impl Render<u32, u32> for &Collect {
    type Error = TestError;

    fn render_result(&self, _frame: &u32, result: &u32) -> Result<(), TestError> {
      self.seen.set(self.seen.get() + result);
      self.calls.set(self.calls.get() + 1);
      Ok(())
    }
  }

  #[test]
  fn one_shot_processes_every_frame() {
    let output = Collect::default();
    OneShotTask.run_task(vec![1, 2, 3].into_iter(), Doubler, &output).unwrap();
    assert_eq!(output.seen.get(), 12);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let output = Collect::default();
    assert!(OneShotTask.run_task(Vec::<u32>::new().into_iter(), Doubler, &output).is_err());
  }

  #[test]
  fn repeat_shot_reuses_first_frame() {
    let output = Collect::default();
    RepeatShotTask::new(5).run_task(vec![4, 100].into_iter(), Doubler, &output).unwrap();
    assert_eq!(output.calls.get(), 5);
    assert_eq!(output.seen.get(), 40);
  }

  #[test]
  fn average_skips_warmup() {
    let times = [
      Duration::from_millis(100),
      Duration::from_millis(100),
      Duration::from_millis(2),
      Duration::from_millis(4),
    ];
    assert_eq!(average_time(&times, 2), Some(Duration::from_millis(3)));
    assert_eq!(average_time(&times[..1], 2), Some(Duration::from_millis(100)));
    assert_eq!(average_time(&[], 2), None);
  }
}
