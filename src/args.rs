// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;
use url::Url;

use shanan_postprocess::model::ModelKind;

/// Shanan 后处理参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型类型: yolo, faster-rcnn, ctpn
  #[arg(long, value_name = "KIND")]
  pub model: ModelKind,

  /// 后处理配置文件，例如 file:///path/yolov3.cfg?format=json
  #[arg(long, value_name = "CONFIG")]
  pub config: Url,

  /// 推理输出张量文件，例如 tensor:///path/output.json
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 结果输出
  /// 支持格式:
  /// - stdout:?pretty&labels=/path/coco.names
  /// - folder:///path/records?always&labels=/path/coco.names
  #[arg(long, default_value = "stdout:", value_name = "OUTPUT")]
  pub output: Url,

  /// 对第一帧重复后处理的次数，不指定时逐帧处理全部输入
  #[arg(long, value_name = "COUNT")]
  pub repeat: Option<usize>,
}
