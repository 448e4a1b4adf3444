// 该文件是 Wuzhi （物识） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::{BufRead, Seek};
use std::path::Path;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbNhwcFrame;

#[derive(Error, Debug)]
pub enum ImageInputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像输入，解码后统一转换为 RGB8
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageInputError> {
    let path = path.as_ref();
    debug!("读取图像文件: {}", path.display());
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(Self::from(image.to_rgb8()))
  }

  /// 从任意可定位的读取器解码，格式由内容推断
  pub fn from_reader<R: BufRead + Seek>(reader: R) -> Result<Self, ImageInputError> {
    let image = ImageReader::new(reader).with_guessed_format()?.decode()?;
    Ok(Self::from(image.to_rgb8()))
  }

  pub fn dimensions(&self) -> Option<(u32, u32)> {
    self.image.as_ref().map(RgbImage::dimensions)
  }

  pub fn into_image(self) -> Option<RgbImage> {
    self.image
  }

  pub fn into_nhwc(self) -> ImageFileInputNhwc {
    ImageFileInputNhwc { inner: self }
  }
}

impl From<RgbImage> for ImageFileInput {
  fn from(image: RgbImage) -> Self {
    Self { image: Some(image) }
  }
}

pub struct ImageFileInputNhwc {
  inner: ImageFileInput,
}

impl Iterator for ImageFileInputNhwc {
  type Item = RgbNhwcFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.image.take().map(RgbNhwcFrame::from)
  }
}
