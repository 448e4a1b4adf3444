// 该文件是 Wuzhi （物识） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 单张 RGB 图像，按 NHWC 排布（N = 1）
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  height: usize,
  width: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let size = RGB_CHANNELS * height * width;
    Self {
      height,
      width,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  /// 由原始像素构建，长度必须为 `height * width * 3`
  pub fn from_raw(height: usize, width: usize, data: Vec<u8>) -> Option<Self> {
    if data.len() != RGB_CHANNELS * height * width {
      return None;
    }
    Some(Self {
      height,
      width,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 批大小为 1 的输入张量形状
  pub fn shape(&self) -> [usize; 4] {
    [1, self.height, self.width, RGB_CHANNELS]
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    // RgbImage 的内存布局本身就是 HWC
    Self {
      height: height as usize,
      width: width as usize,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl From<&RgbImage> for RgbNhwcFrame {
  fn from(image: &RgbImage) -> Self {
    Self::from(image.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rgb_image_keeps_hwc_order() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, image::Rgb([1, 2, 3]));
    image.put_pixel(1, 0, image::Rgb([4, 5, 6]));

    let frame = RgbNhwcFrame::from(image);
    assert_eq!(frame.shape(), [1, 1, 2, 3]);
    assert_eq!(frame.as_nhwc(), &[1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn from_raw_rejects_wrong_length() {
    assert!(RgbNhwcFrame::from_raw(2, 2, vec![0; 11]).is_none());
    assert!(RgbNhwcFrame::from_raw(2, 2, vec![0; 12]).is_some());
  }

  #[test]
  fn with_shape_is_zeroed() {
    let frame = RgbNhwcFrame::with_shape(3, 4);
    assert_eq!(frame.as_nhwc().len(), 36);
    assert!(frame.as_nhwc().iter().all(|&v| v == 0));
  }
}
