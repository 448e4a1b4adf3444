// 该文件是 Wuzhi （物识） 项目的一部分。
// src/graph/mask.rs - 实例掩码重映射
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

/// 图像坐标系下的二值掩码，每像素 0 或 1
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
  pub width: usize,
  pub height: usize,
  pub data: Box<[u8]>,
}

impl Mask {
  pub fn get(&self, x: usize, y: usize) -> u8 {
    self.data[y * self.width + x]
  }

  /// 前景像素数
  pub fn area(&self) -> usize {
    self.data.iter().filter(|&&v| v != 0).count()
  }
}

/// 将框内坐标系下的掩码双线性采样到整幅图像
///
/// `box_masks` 为连续存放的 `boxes.len()` 个 `mask_height x mask_width` 掩码，
/// 框为归一化的 `[y_min, x_min, y_max, x_max]`。框外像素为 0，
/// 框内采样值大于 `threshold` 的像素为 1。
pub fn reframe_box_masks_to_image_masks(
  box_masks: &[f32],
  mask_height: usize,
  mask_width: usize,
  boxes: &[[f32; 4]],
  image_height: usize,
  image_width: usize,
  threshold: f32,
) -> Vec<Mask> {
  let mask_size = mask_height * mask_width;
  boxes
    .iter()
    .enumerate()
    .map(|(i, bbox)| {
      let source = &box_masks[i * mask_size..(i + 1) * mask_size];
      reframe_one(
        source,
        mask_height,
        mask_width,
        bbox,
        image_height,
        image_width,
        threshold,
      )
    })
    .collect()
}

fn reframe_one(
  source: &[f32],
  mask_height: usize,
  mask_width: usize,
  bbox: &[f32; 4],
  image_height: usize,
  image_width: usize,
  threshold: f32,
) -> Mask {
  let mut data = vec![0u8; image_height * image_width].into_boxed_slice();
  let [y_min, x_min, y_max, x_max] = *bbox;
  let box_height = y_max - y_min;
  let box_width = x_max - x_min;

  if box_height > 0.0 && box_width > 0.0 && mask_height > 0 && mask_width > 0 {
    for py in 0..image_height {
      let ny = (py as f32 + 0.5) / image_height as f32;
      if ny < y_min || ny > y_max {
        continue;
      }
      let my = (ny - y_min) / box_height * mask_height as f32 - 0.5;
      for px in 0..image_width {
        let nx = (px as f32 + 0.5) / image_width as f32;
        if nx < x_min || nx > x_max {
          continue;
        }
        let mx = (nx - x_min) / box_width * mask_width as f32 - 0.5;
        if bilinear(source, mask_height, mask_width, my, mx) > threshold {
          data[py * image_width + px] = 1;
        }
      }
    }
  }

  Mask {
    width: image_width,
    height: image_height,
    data,
  }
}

fn bilinear(source: &[f32], height: usize, width: usize, y: f32, x: f32) -> f32 {
  let y = y.clamp(0.0, (height - 1) as f32);
  let x = x.clamp(0.0, (width - 1) as f32);
  let y0 = y.floor() as usize;
  let x0 = x.floor() as usize;
  let y1 = (y0 + 1).min(height - 1);
  let x1 = (x0 + 1).min(width - 1);
  let dy = y - y0 as f32;
  let dx = x - x0 as f32;

  let at = |yy: usize, xx: usize| source[yy * width + xx];
  let top = at(y0, x0) * (1.0 - dx) + at(y0, x1) * dx;
  let bottom = at(y1, x0) * (1.0 - dx) + at(y1, x1) * dx;
  top * (1.0 - dy) + bottom * dy
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn full_box_full_mask_covers_image() {
    let masks = reframe_box_masks_to_image_masks(&[1.0; 4], 2, 2, &[[0.0, 0.0, 1.0, 1.0]], 3, 5, 0.5);
    assert_eq!(masks.len(), 1);
    assert_eq!(masks[0].area(), 15);
  }

  #[test]
  fn left_column_maps_to_left_half() {
    // 2x2 掩码，左列为 1
    let source = [1.0, 0.0, 1.0, 0.0];
    let masks = reframe_box_masks_to_image_masks(&source, 2, 2, &[[0.0, 0.0, 1.0, 1.0]], 4, 4, 0.5);
    let mask = &masks[0];
    for y in 0..4 {
      assert_eq!(
        [mask.get(0, y), mask.get(1, y), mask.get(2, y), mask.get(3, y)],
        [1, 1, 0, 0]
      );
    }
  }

  #[test]
  fn pixels_outside_box_are_zero() {
    let masks = reframe_box_masks_to_image_masks(&[1.0; 4], 2, 2, &[[0.0, 0.0, 0.5, 0.5]], 4, 4, 0.5);
    let mask = &masks[0];
    assert_eq!(mask.area(), 4);
    assert_eq!(mask.get(0, 0), 1);
    assert_eq!(mask.get(1, 1), 1);
    assert_eq!(mask.get(2, 2), 0);
  }

  #[test]
  fn degenerate_box_yields_empty_mask() {
    let masks = reframe_box_masks_to_image_masks(&[1.0; 4], 2, 2, &[[0.3, 0.3, 0.3, 0.6]], 4, 4, 0.5);
    assert_eq!(masks[0].area(), 0);
    assert_eq!(masks[0].data.len(), 16);
  }

  #[test]
  fn one_mask_per_box() {
    let masks = reframe_box_masks_to_image_masks(
      &[1.0; 8],
      2,
      2,
      &[[0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 0.5, 1.0]],
      2,
      2,
      0.5,
    );
    assert_eq!(masks.len(), 2);
    assert_eq!(masks[1].area(), 2);
  }
}
