// 该文件是 Shanan （山南西风） 项目的一部分。
// src/utils.rs - 数学工具
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

use tracing::{debug, warn};

pub const FLOAT_EPSILON: f32 = 1e-6;
pub const DOUBLE_EPSILON: f64 = 1e-15;

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 分母是否接近零
pub fn is_denominator_zero(value: f32) -> bool {
  value.abs() < FLOAT_EPSILON
}

pub fn is_denominator_zero_f64(value: f64) -> bool {
  value.abs() < DOUBLE_EPSILON
}

/// 最小二乘直线拟合 `y = alpha * x + beta`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LineRegression {
  pub alpha: f64,
  pub beta: f64,
}

impl LineRegression {
  /// 空输入或长度不一致时返回 alpha = beta = 0；x 全部相同时退化为过均值的水平线
  pub fn fit(xs: &[f32], ys: &[f32]) -> Self {
    if xs.is_empty() || xs.len() != ys.len() {
      warn!("直线拟合输入无效: x 数量 {}, y 数量 {}", xs.len(), ys.len());
      return Self::default();
    }

    let n = xs.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in xs.iter().zip(ys) {
      let (x, y) = (x as f64, y as f64);
      sum_x += x;
      sum_y += y;
      sum_xy += x * y;
      sum_xx += x * x;
    }

    let divide = n * sum_xx - sum_x * sum_x;
    if is_denominator_zero_f64(divide) {
      debug!("直线拟合分母过小: {}", divide);
      return Self {
        alpha: 0.0,
        beta: sum_y / n,
      };
    }

    let alpha = (n * sum_xy - sum_x * sum_y) / divide;
    let beta = (sum_y - alpha * sum_x) / n;
    Self { alpha, beta }
  }

  pub fn predict(&self, x: f32) -> f32 {
    (self.alpha * x as f64 + self.beta) as f32
  }
}
