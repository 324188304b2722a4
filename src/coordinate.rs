// 该文件是 Shanan （山南西风） 项目的一部分。
// src/coordinate.rs - 坐标还原
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

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
  error::{PostProcessError, Result},
  model::{ObjDetectInfo, TextObjDetectInfo},
  utils::is_denominator_zero,
};

pub const MAX_IMAGE_EDGE: u32 = 8192;

/// 图像缩放方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeType {
  /// 拉伸到模型输入尺寸
  #[default]
  Stretch,
  TfKeepAspectRatio,
  MsKeepAspectRatio,
  MsYolov4,
}

impl ResizeType {
  pub fn keeps_aspect_ratio(self) -> bool {
    matches!(
      self,
      ResizeType::TfKeepAspectRatio | ResizeType::MsKeepAspectRatio
    )
  }
}

/// 原图上的裁剪区域
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
  pub x0: u32,
  pub y0: u32,
  pub x1: u32,
  pub y1: u32,
}

/// 单次调用的图像描述
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostImageInfo {
  pub width_resize: u32,
  pub height_resize: u32,
  pub width_original: u32,
  pub height_original: u32,
  #[serde(default)]
  pub resize_type: ResizeType,
  #[serde(default = "default_scaling")]
  pub keep_aspect_ratio_scaling: f32,
  #[serde(default)]
  pub crop: Option<CropBox>,
}

fn default_scaling() -> f32 {
  1.0
}

/// 解码时使用的尺寸：模型输入尺寸与（裁剪后的）图像尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
  pub model_width: u32,
  pub model_height: u32,
  pub img_width: u32,
  pub img_height: u32,
}

impl PostImageInfo {
  pub fn new(width_resize: u32, height_resize: u32, width_original: u32, height_original: u32) -> Self {
    Self {
      width_resize,
      height_resize,
      width_original,
      height_original,
      resize_type: ResizeType::Stretch,
      keep_aspect_ratio_scaling: 1.0,
      crop: None,
    }
  }

  pub fn with_resize_type(mut self, resize_type: ResizeType, scaling: f32) -> Self {
    self.resize_type = resize_type;
    self.keep_aspect_ratio_scaling = scaling;
    self
  }

  pub fn with_crop(mut self, crop: CropBox) -> Self {
    self.crop = Some(crop);
    self
  }

  /// 所有尺寸与裁剪坐标都必须在 [0, 8192] 内
  pub fn validate(&self) -> Result<()> {
    if self.width_resize > MAX_IMAGE_EDGE || self.height_resize > MAX_IMAGE_EDGE {
      error!(
        "模型输入尺寸无效: {}x{}",
        self.width_resize, self.height_resize
      );
      return Err(PostProcessError::invalid("模型输入尺寸超出范围"));
    }
    if self.width_original > MAX_IMAGE_EDGE || self.height_original > MAX_IMAGE_EDGE {
      error!(
        "原图尺寸无效: {}x{}",
        self.width_original, self.height_original
      );
      return Err(PostProcessError::invalid("原图尺寸超出范围"));
    }
    if let Some(crop) = self.crop {
      if [crop.x0, crop.y0, crop.x1, crop.y1]
        .iter()
        .any(|&v| v > MAX_IMAGE_EDGE)
      {
        error!("裁剪坐标无效: {:?}", crop);
        return Err(PostProcessError::invalid("裁剪坐标超出范围"));
      }
      if crop.x1 < crop.x0 || crop.y1 < crop.y0 {
        error!("裁剪区域无效: {:?}", crop);
        return Err(PostProcessError::invalid("裁剪区域右下角小于左上角"));
      }
    }
    Ok(())
  }

  /// 有裁剪时图像尺寸取裁剪区域的尺寸
  pub fn image_info(&self) -> Result<ImageInfo> {
    self.validate()?;
    let (img_width, img_height) = match self.crop {
      Some(crop) => (crop.x1 - crop.x0, crop.y1 - crop.y0),
      None => (self.width_original, self.height_original),
    };
    Ok(ImageInfo {
      model_width: self.width_resize,
      model_height: self.height_resize,
      img_width,
      img_height,
    })
  }

  pub fn offset(&self) -> (f32, f32) {
    self
      .crop
      .map(|c| (c.x0 as f32, c.y0 as f32))
      .unwrap_or((0.0, 0.0))
  }
}

/// 按缩放方式把归一化（或模型空间）坐标还原到图像空间，不含裁剪偏移
///
/// 保持比例的缩放会丢弃左上角落在图像外的框，并把右下角截断到图像边界。
pub fn reduce_coordinates(
  objects: Vec<ObjDetectInfo>,
  image: &ImageInfo,
  resize_type: ResizeType,
  scaling: f32,
) -> Result<Vec<ObjDetectInfo>> {
  let img_w = image.img_width as f32;
  let img_h = image.img_height as f32;

  if !resize_type.keeps_aspect_ratio() {
    return Ok(
      objects
        .into_iter()
        .map(|mut obj| {
          obj.x0 *= img_w;
          obj.x1 *= img_w;
          obj.y0 *= img_h;
          obj.y1 *= img_h;
          obj
        })
        .collect(),
    );
  }

  if is_denominator_zero(scaling) {
    error!("保持比例缩放系数不能为 0: {}", scaling);
    return Err(PostProcessError::invalid("保持比例缩放系数为 0"));
  }
  let scale_x = image.model_width as f32 / scaling;
  let scale_y = image.model_height as f32 / scaling;

  let total = objects.len();
  let kept: Vec<_> = objects
    .into_iter()
    .filter_map(|mut obj| {
      obj.x0 = (obj.x0 * scale_x).max(0.0);
      obj.y0 = (obj.y0 * scale_y).max(0.0);
      obj.x1 = (obj.x1 * scale_x).max(0.0);
      obj.y1 = (obj.y1 * scale_y).max(0.0);
      if obj.x0 > img_w || obj.y0 > img_h {
        return None;
      }
      obj.x1 = obj.x1.min(img_w);
      obj.y1 = obj.y1.min(img_h);
      Some(obj)
    })
    .collect();
  if kept.len() != total {
    debug!("丢弃 {} 个位于图像外的框", total - kept.len());
  }
  Ok(kept)
}

/// 坐标还原并加上裁剪偏移
pub fn to_image_space(objects: Vec<ObjDetectInfo>, info: &PostImageInfo) -> Result<Vec<ObjDetectInfo>> {
  let image = info.image_info()?;
  let mut objects = reduce_coordinates(
    objects,
    &image,
    info.resize_type,
    info.keep_aspect_ratio_scaling,
  )?;
  let (dx, dy) = info.offset();
  for obj in objects.iter_mut() {
    obj.x0 += dx;
    obj.x1 += dx;
    obj.y0 += dy;
    obj.y1 += dy;
  }
  Ok(objects)
}

/// [`to_image_space`] 的逆变换（不恢复被截断的部分）
pub fn from_image_space(objects: Vec<ObjDetectInfo>, info: &PostImageInfo) -> Result<Vec<ObjDetectInfo>> {
  let image = info.image_info()?;
  let (dx, dy) = info.offset();
  let (scale_x, scale_y) = if info.resize_type.keeps_aspect_ratio() {
    if is_denominator_zero(info.keep_aspect_ratio_scaling) {
      return Err(PostProcessError::invalid("保持比例缩放系数为 0"));
    }
    (
      image.model_width as f32 / info.keep_aspect_ratio_scaling,
      image.model_height as f32 / info.keep_aspect_ratio_scaling,
    )
  } else {
    (image.img_width as f32, image.img_height as f32)
  };
  if is_denominator_zero(scale_x) || is_denominator_zero(scale_y) {
    error!("图像尺寸不能为 0: {}x{}", scale_x, scale_y);
    return Err(PostProcessError::invalid("图像尺寸为 0"));
  }

  Ok(
    objects
      .into_iter()
      .map(|mut obj| {
        obj.x0 = (obj.x0 - dx) / scale_x;
        obj.x1 = (obj.x1 - dx) / scale_x;
        obj.y0 = (obj.y0 - dy) / scale_y;
        obj.y1 = (obj.y1 - dy) / scale_y;
        obj
      })
      .collect(),
  )
}

/// 文本框从模型像素坐标缩放到图像坐标并加上裁剪偏移
pub fn text_to_image_space(
  texts: Vec<TextObjDetectInfo>,
  info: &PostImageInfo,
) -> Result<Vec<TextObjDetectInfo>> {
  let image = info.image_info()?;
  if image.model_width == 0 || image.model_height == 0 {
    error!(
      "模型输入尺寸不能为 0: {}x{}",
      image.model_width, image.model_height
    );
    return Err(PostProcessError::invalid("模型输入尺寸为 0"));
  }
  let scale_x = image.img_width as f32 / image.model_width as f32;
  let scale_y = image.img_height as f32 / image.model_height as f32;
  let (dx, dy) = info.offset();

  Ok(
    texts
      .into_iter()
      .map(|mut text| {
        for x in [&mut text.x0, &mut text.x1, &mut text.x2, &mut text.x3] {
          *x = *x * scale_x + dx;
        }
        for y in [&mut text.y0, &mut text.y1, &mut text.y2, &mut text.y3] {
          *y = *y * scale_y + dy;
        }
        text
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn obj(bbox: [f32; 4]) -> ObjDetectInfo {
    ObjDetectInfo::new(bbox, 0.9, 1)
  }

  #[test]
  fn stretch_scales_axes_independently() {
    let info = PostImageInfo::new(416, 416, 800, 600);
    let out = to_image_space(vec![obj([0.25, 0.5, 0.75, 1.0])], &info).unwrap();
    assert_eq!(out[0].bbox(), [200.0, 300.0, 600.0, 600.0]);
  }

  #[test]
  fn keep_aspect_drops_and_clamps() {
    // 800x600 缩放到 416x416, 比例 0.52
    let info = PostImageInfo::new(416, 416, 800, 600)
      .with_resize_type(ResizeType::TfKeepAspectRatio, 0.52);
    let inside = obj([0.1, 0.1, 0.9, 0.9]);
    let outside = obj([0.1, 0.8, 0.2, 0.95]);
    let out = to_image_space(vec![inside, outside], &info).unwrap();
    assert_eq!(out.len(), 1);
    assert!((out[0].x0 - 80.0).abs() < 1e-3);
    assert!((out[0].y0 - 80.0).abs() < 1e-3);
    assert!((out[0].x1 - 720.0).abs() < 1e-3);
    assert_eq!(out[0].y1, 600.0);
  }

  #[test]
  fn keep_aspect_rejects_zero_scaling() {
    let info =
      PostImageInfo::new(416, 416, 800, 600).with_resize_type(ResizeType::MsKeepAspectRatio, 0.0);
    assert!(matches!(
      to_image_space(vec![obj([0.1, 0.1, 0.2, 0.2])], &info),
      Err(PostProcessError::InvalidParam(_))
    ));
  }

  #[test]
  fn crop_uses_crop_size_and_offset() {
    let info = PostImageInfo::new(416, 416, 1920, 1080).with_crop(CropBox {
      x0: 100,
      y0: 50,
      x1: 500,
      y1: 250,
    });
    let out = to_image_space(vec![obj([0.5, 0.5, 1.0, 1.0])], &info).unwrap();
    assert_eq!(out[0].bbox(), [300.0, 150.0, 500.0, 250.0]);
  }

  #[test]
  fn oversized_image_is_invalid() {
    let info = PostImageInfo::new(416, 416, 9000, 600);
    assert!(info.validate().is_err());
    let info = PostImageInfo::new(416, 416, 800, 600).with_crop(CropBox {
      x0: 300,
      y0: 0,
      x1: 100,
      y1: 10,
    });
    assert!(info.image_info().is_err());
  }
}
