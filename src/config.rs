// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 后处理配置
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

use std::{collections::BTreeMap, fmt::Display, path::Path, str::FromStr};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, error::PostProcessError};

pub const DEFAULT_CLASS_NUM: usize = 80;
pub const DEFAULT_SCORE_THRESH: f32 = 0.3;
const MAX_CLASS_NUM: usize = 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("配置格式错误, 第 {0} 行: {1}")]
  SyntaxError(usize, String),
  #[error("配置项 {key} 无法解析: {value}")]
  ParseError { key: String, value: String },
  #[error("配置项 {key} 的值 {value} 超出范围 [{min}, {max}]")]
  OutOfRange {
    key: String,
    value: String,
    min: String,
    max: String,
  },
  #[error("不支持的配置值: {0}")]
  UnsupportedValue(String),
}

/// 键值对形式的配置
///
/// 支持两种来源：`KEY=VALUE` 文本（`#` 开头为注释）以及 JSON 对象。
#[derive(Debug, Clone, Default)]
pub struct ConfigData {
  values: BTreeMap<String, String>,
}

impl ConfigData {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn parse_text(text: &str) -> Result<Self, ConfigError> {
    let mut values = BTreeMap::new();
    for (line_no, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let (key, value) = line
        .split_once('=')
        .ok_or_else(|| ConfigError::SyntaxError(line_no + 1, line.to_string()))?;
      let key = key.trim();
      if key.is_empty() {
        return Err(ConfigError::SyntaxError(line_no + 1, line.to_string()));
      }
      values.insert(key.to_string(), value.trim().to_string());
    }
    Ok(Self { values })
  }

  pub fn parse_json(text: &str) -> Result<Self, ConfigError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    let object = json
      .as_object()
      .ok_or_else(|| ConfigError::UnsupportedValue("JSON 配置必须是对象".to_string()))?;

    let mut values = BTreeMap::new();
    for (key, value) in object {
      values.insert(key.clone(), json_to_string(key, value)?);
    }
    Ok(Self { values })
  }

  /// 根据扩展名选择格式，`.json` 为 JSON，其余按文本处理
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let is_json = path
      .extension()
      .map(|ext| ext.eq_ignore_ascii_case("json"))
      .unwrap_or(false);
    if is_json {
      Self::parse_json(&text)
    } else {
      Self::parse_text(&text)
    }
  }

  pub fn with(mut self, key: &str, value: impl ToString) -> Self {
    self.set(key, value);
    self
  }

  pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
    self.values.insert(key.to_string(), value.to_string());
    self
  }

  pub fn contains(&self, key: &str) -> bool {
    self.values.contains_key(key)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.values.get(key).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn get<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
    match self.values.get(key) {
      None => Ok(None),
      Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::ParseError {
        key: key.to_string(),
        value: raw.clone(),
      }),
    }
  }

  pub fn get_in_range<T>(&self, key: &str, min: T, max: T) -> Result<Option<T>, ConfigError>
  where
    T: FromStr + PartialOrd + Display + Copy,
  {
    match self.get::<T>(key)? {
      Some(value) if value < min || value > max => Err(ConfigError::OutOfRange {
        key: key.to_string(),
        value: value.to_string(),
        min: min.to_string(),
        max: max.to_string(),
      }),
      other => Ok(other),
    }
  }

  /// 读取失败（缺失、无法解析或越界）时给出警告并使用默认值
  pub fn get_or<T>(&self, key: &str, default: T, min: T, max: T) -> T
  where
    T: FromStr + PartialOrd + Display + Copy,
  {
    match self.get_in_range(key, min, max) {
      Ok(Some(value)) => value,
      Ok(None) => {
        warn!("配置中缺少 {}, 使用默认值 {}", key, default);
        default
      }
      Err(e) => {
        warn!("读取 {} 失败: {}, 使用默认值 {}", key, e, default);
        default
      }
    }
  }

  pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
    match self.values.get(key).map(|v| v.trim().to_ascii_lowercase()) {
      None => Ok(None),
      Some(v) if v == "true" || v == "1" => Ok(Some(true)),
      Some(v) if v == "false" || v == "0" => Ok(Some(false)),
      Some(v) => Err(ConfigError::ParseError {
        key: key.to_string(),
        value: v,
      }),
    }
  }

  pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
    match self.get_bool(key) {
      Ok(Some(value)) => value,
      Ok(None) => {
        debug!("配置中缺少 {}, 使用默认值 {}", key, default);
        default
      }
      Err(e) => {
        warn!("读取 {} 失败: {}, 使用默认值 {}", key, e, default);
        default
      }
    }
  }
}

fn json_to_string(key: &str, value: &serde_json::Value) -> Result<String, ConfigError> {
  use serde_json::Value;

  match value {
    Value::String(s) => Ok(s.clone()),
    Value::Number(n) => Ok(n.to_string()),
    Value::Bool(b) => Ok(b.to_string()),
    Value::Array(items) => {
      let parts = items
        .iter()
        .map(|item| match item {
          Value::Number(n) => Ok(n.to_string()),
          Value::String(s) => Ok(s.clone()),
          _ => Err(ConfigError::UnsupportedValue(format!("{} 中的数组元素", key))),
        })
        .collect::<Result<Vec<_>, _>>()?;
      Ok(parts.join(","))
    }
    _ => Err(ConfigError::UnsupportedValue(key.to_string())),
  }
}

const CONFIG_FILE_SCHEME: &str = "file";

impl FromUrlWithScheme for ConfigData {
  const SCHEME: &'static str = CONFIG_FILE_SCHEME;
}

impl FromUrl for ConfigData {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ConfigError::SchemeMismatch(url.scheme().to_string()));
    }

    let format = url
      .query_pairs()
      .find(|(k, _)| k == "format")
      .map(|(_, v)| v.to_string());

    match format.as_deref() {
      Some("json") => {
        let text = std::fs::read_to_string(url.path())?;
        Self::parse_json(&text)
      }
      Some("cfg") | Some("text") => {
        let text = std::fs::read_to_string(url.path())?;
        Self::parse_text(&text)
      }
      Some(other) => Err(ConfigError::UnsupportedValue(format!("format={}", other))),
      None => Self::load(Path::new(url.path())),
    }
  }
}

/// 解析逗号分隔的浮点数列表，例如 `BIASES` 与 `SEPARATE_SCORE_THRESH`
pub fn parse_float_list(key: &str, text: &str) -> Result<Vec<f32>, ConfigError> {
  text
    .split(',')
    .map(|token| {
      token.trim().parse::<f32>().map_err(|_| ConfigError::ParseError {
        key: key.to_string(),
        value: token.to_string(),
      })
    })
    .collect()
}

/// 目标检测类模型共享的配置
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectConfig {
  pub class_num: usize,
  pub score_thresh: f32,
  /// 每个类别的分数阈值，长度等于 `class_num`
  pub separate_score_thresh: Vec<f32>,
  pub check_model: bool,
}

impl ObjectConfig {
  pub fn from_config(config: &ConfigData) -> Result<Self, PostProcessError> {
    let class_num = config.get_or("CLASS_NUM", DEFAULT_CLASS_NUM, 0, MAX_CLASS_NUM);
    let score_thresh = config.get_or("SCORE_THRESH", DEFAULT_SCORE_THRESH, 0.0, 1.0);
    let check_model = config.get_bool_or("CHECK_MODEL", true);

    let separate_score_thresh = match config.get_str("SEPARATE_SCORE_THRESH") {
      None => {
        info!(
          "配置中缺少 SEPARATE_SCORE_THRESH, 所有类别使用 SCORE_THRESH ({})",
          score_thresh
        );
        vec![score_thresh; class_num]
      }
      Some(text) => {
        if class_num == 0 {
          error!("CLASS_NUM 为 0 时不能设置 SEPARATE_SCORE_THRESH");
          return Err(PostProcessError::invalid("CLASS_NUM 必须大于 0"));
        }
        let thresholds = parse_float_list("SEPARATE_SCORE_THRESH", text)?;
        if thresholds.len() != class_num {
          error!(
            "CLASS_NUM ({}) 与 SEPARATE_SCORE_THRESH 数量 ({}) 不一致",
            class_num,
            thresholds.len()
          );
          return Err(PostProcessError::invalid(format!(
            "SEPARATE_SCORE_THRESH 需要 {} 个值, 实际为 {}",
            class_num,
            thresholds.len()
          )));
        }
        thresholds
      }
    };

    Ok(Self {
      class_num,
      score_thresh,
      separate_score_thresh,
      check_model,
    })
  }

  /// 类别阈值，越界时回退到全局阈值
  pub fn threshold_of(&self, class_id: usize) -> f32 {
    self
      .separate_score_thresh
      .get(class_id)
      .copied()
      .unwrap_or(self.score_thresh)
  }
}

/// 类别名称表，每行一个名称
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
  names: Vec<String>,
}

impl LabelMap {
  pub fn parse(text: &str) -> Self {
    let names = text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .map(str::to_string)
      .collect();
    Self { names }
  }

  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl FromUrlWithScheme for LabelMap {
  const SCHEME: &'static str = CONFIG_FILE_SCHEME;
}

impl FromUrl for LabelMap {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch(url.scheme().to_string()));
    }
    let text = std::fs::read_to_string(url.path())?;
    let labels = Self::parse(&text);
    info!("加载 {} 个类别名称", labels.len());
    Ok(labels)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_text_config() {
    let text = "# yolo\nCLASS_NUM=20\n\n SCORE_THRESH = 0.4 \nBIASES=10,13,16,30\n";
    let config = ConfigData::parse_text(text).unwrap();
    assert_eq!(config.len(), 3);
    assert_eq!(config.get::<usize>("CLASS_NUM").unwrap(), Some(20));
    assert_eq!(config.get::<f32>("SCORE_THRESH").unwrap(), Some(0.4));
    assert_eq!(config.get_str("BIASES"), Some("10,13,16,30"));
  }

  #[test]
  fn parse_text_rejects_missing_equal_sign() {
    let err = ConfigData::parse_text("CLASS_NUM 20").unwrap_err();
    assert!(matches!(err, ConfigError::SyntaxError(1, _)));
  }

  #[test]
  fn parse_json_config() {
    let text = r#"{"CLASS_NUM": 2, "NMS_FINISHED": true, "BIASES": [1, 2.5], "FRAMEWORK": "Caffe"}"#;
    let config = ConfigData::parse_json(text).unwrap();
    assert_eq!(config.get::<usize>("CLASS_NUM").unwrap(), Some(2));
    assert_eq!(config.get_bool("NMS_FINISHED").unwrap(), Some(true));
    assert_eq!(config.get_str("BIASES"), Some("1,2.5"));
    assert_eq!(config.get_str("FRAMEWORK"), Some("Caffe"));
  }

  #[test]
  fn get_or_falls_back_when_out_of_range() {
    let config = ConfigData::new().with("IOU_THRESH", 3.0);
    assert_eq!(config.get_or("IOU_THRESH", 0.45f32, 0.0, 1.0), 0.45);
    assert!(config.get_in_range("IOU_THRESH", 0.0f32, 1.0).is_err());
    assert_eq!(config.get_or("MISSING", 7i32, 0, 10), 7);
  }

  #[test]
  fn separate_thresholds_default_to_score_thresh() {
    let config = ConfigData::new().with("CLASS_NUM", 3).with("SCORE_THRESH", 0.6);
    let object = ObjectConfig::from_config(&config).unwrap();
    assert_eq!(object.separate_score_thresh, vec![0.6, 0.6, 0.6]);
  }

  #[test]
  fn separate_thresholds_must_match_class_num() {
    let config = ConfigData::new()
      .with("CLASS_NUM", 3)
      .with("SEPARATE_SCORE_THRESH", "0.1,0.2");
    assert!(matches!(
      ObjectConfig::from_config(&config),
      Err(PostProcessError::InvalidParam(_))
    ));

    let config = ConfigData::new()
      .with("CLASS_NUM", 2)
      .with("SEPARATE_SCORE_THRESH", "0.1,0.2");
    let object = ObjectConfig::from_config(&config).unwrap();
    assert_eq!(object.threshold_of(1), 0.2);
    assert_eq!(object.threshold_of(5), object.score_thresh);
  }

  #[test]
  fn label_map_skips_comments() {
    let labels = LabelMap::parse("# coco\nperson\n\nbicycle\n");
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.name(1), Some("bicycle"));
    assert_eq!(labels.name(2), None);
  }
}
