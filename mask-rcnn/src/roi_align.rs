//! Alignment-correct ROI cropping.
//!
//! A box `[x0, y0, x1, y1]` is in continuous coordinates where pixel `k`
//! covers `[k, k + 1)`. Output cell `j` of an `n`-cell crop samples at
//! `x0 + (j + 0.5) * (x1 - x0) / n - 0.5` in pixel-center coordinates.

use crate::{boxes::BoxArray, common::*};

/// One axis of bilinear sampling positions.
#[derive(Debug, Clone, Copy)]
struct Sample {
    low: usize,
    high: usize,
    lerp: f32,
}

/// Sampling positions along an axis of `size` pixels. Positions outside the
/// valid range are `None` and read as zero.
fn sample_positions(start: f32, end: f32, crop: usize, size: usize) -> Vec<Option<Sample>> {
    let spacing = (end - start) / crop as f32;
    let upper = (size - 1) as f32;

    (0..crop)
        .map(|index| {
            let coord = start + (index as f32 + 0.5) * spacing - 0.5;
            if !(0.0..=upper).contains(&coord) {
                return None;
            }
            let low = coord.floor();
            let high = coord.ceil();
            Some(Sample {
                low: low as usize,
                high: high as usize,
                lerp: coord - low,
            })
        })
        .collect()
}

/// Bilinearly crop every box out of a `[C, H, W]` map into `[n, C, crop, crop]`.
///
/// With `pad_border`, the map is extended by one replicated pixel on each
/// side before sampling, so boxes touching the edge do not fade to zero.
pub fn crop_and_resize(
    map: ArrayView3<'_, f32>,
    boxes: &BoxArray,
    crop: usize,
    pad_border: bool,
) -> Result<Array4<f32>> {
    ensure!(crop > 0, "crop size must be positive");
    let (channels, height, width) = map.dim();
    let num_boxes = boxes.len();
    let mut output = Array4::zeros((num_boxes, channels, crop, crop));

    if num_boxes == 0 {
        return Ok(output);
    }
    ensure!(
        height > 0 && width > 0,
        "cannot crop from an empty {}x{} feature map",
        height,
        width
    );

    let (pad, padded_h, padded_w) = if pad_border {
        (1.0, height + 2, width + 2)
    } else {
        (0.0, height, width)
    };

    // index into the unpadded map
    let read_y = |index: usize| -> usize {
        if pad_border {
            index.saturating_sub(1).min(height - 1)
        } else {
            index
        }
    };
    let read_x = |index: usize| -> usize {
        if pad_border {
            index.saturating_sub(1).min(width - 1)
        } else {
            index
        }
    };

    for (box_index, rect) in boxes.rects().enumerate() {
        let ys = sample_positions(rect.y1() + pad, rect.y2() + pad, crop, padded_h);
        let xs = sample_positions(rect.x1() + pad, rect.x2() + pad, crop, padded_w);
        let mut patch = output.slice_mut(s![box_index, .., .., ..]);

        for (row, ys) in ys.iter().enumerate() {
            let ys = match ys {
                Some(ys) => ys,
                None => continue,
            };
            let top = read_y(ys.low);
            let bottom = read_y(ys.high);

            for (col, xs) in xs.iter().enumerate() {
                let xs = match xs {
                    Some(xs) => xs,
                    None => continue,
                };
                let left = read_x(xs.low);
                let right = read_x(xs.high);

                for channel in 0..channels {
                    let top_left = map[(channel, top, left)];
                    let top_right = map[(channel, top, right)];
                    let bottom_left = map[(channel, bottom, left)];
                    let bottom_right = map[(channel, bottom, right)];

                    let upper = top_left + (top_right - top_left) * xs.lerp;
                    let lower = bottom_left + (bottom_right - bottom_left) * xs.lerp;
                    patch[(channel, row, col)] = upper + (lower - upper) * ys.lerp;
                }
            }
        }
    }

    Ok(output)
}

/// ROI Align: crop each box at twice the resolution, then average 2x2 blocks.
///
/// Returns `[n, C, resolution, resolution]` in box order.
pub fn roi_align(map: ArrayView3<'_, f32>, boxes: &BoxArray, resolution: usize) -> Result<Array4<f32>> {
    ensure!(resolution > 0, "resolution must be positive");
    let crops = crop_and_resize(map, boxes, resolution * 2, true)?;
    let (num_boxes, channels, _, _) = crops.dim();

    let pooled = Array4::from_shape_fn(
        (num_boxes, channels, resolution, resolution),
        |(index, channel, row, col)| {
            let block = crops.slice(s![
                index,
                channel,
                (row * 2)..(row * 2 + 2),
                (col * 2)..(col * 2 + 2)
            ]);
            block.sum() / 4.0
        },
    );
    Ok(pooled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid() -> Array3<f32> {
        Array3::from_shape_fn((1, 5, 5), |(_, y, x)| (y * 5 + x) as f32)
    }

    #[test]
    fn crop_matches_reference_grid() -> Result<()> {
        let boxes: BoxArray = (&[[1.0, 1.0, 3.0, 3.0]][..]).try_into()?;
        let expect = [
            [4.5, 5.0, 5.5, 6.0],
            [7.0, 7.5, 8.0, 8.5],
            [9.5, 10.0, 10.5, 11.0],
            [12.0, 12.5, 13.0, 13.5],
        ];

        for pad_border in [false, true] {
            let crops = crop_and_resize(grid().view(), &boxes, 4, pad_border)?;
            assert_eq!(crops.shape(), &[1, 1, 4, 4]);
            for row in 0..4 {
                for col in 0..4 {
                    assert_abs_diff_eq!(crops[(0, 0, row, col)], expect[row][col], epsilon = 1e-5);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn roi_align_pools_the_double_resolution_crop() -> Result<()> {
        let boxes: BoxArray = (&[[1.0, 1.0, 3.0, 3.0]][..]).try_into()?;
        let pooled = roi_align(grid().view(), &boxes, 2)?;
        let expect = [[6.0, 7.0], [11.0, 12.0]];
        for row in 0..2 {
            for col in 0..2 {
                assert_abs_diff_eq!(pooled[(0, 0, row, col)], expect[row][col], epsilon = 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn border_padding_replicates_edges() -> Result<()> {
        let map = Array3::from_elem((2, 4, 4), 3.0);
        let boxes: BoxArray = (&[[0.0, 0.0, 4.0, 4.0]][..]).try_into()?;

        // the outermost samples fall half a pixel outside the centers
        let padded = crop_and_resize(map.view(), &boxes, 8, true)?;
        assert!(padded.iter().all(|&value| (value - 3.0).abs() < 1e-6));

        let unpadded = crop_and_resize(map.view(), &boxes, 8, false)?;
        assert_eq!(unpadded[(0, 0, 0, 0)], 0.0);
        assert_abs_diff_eq!(unpadded[(0, 1, 4, 4)], 3.0);
        Ok(())
    }

    #[test]
    fn outputs_follow_box_order_and_leave_boxes_untouched() -> Result<()> {
        let boxes: BoxArray = (&[[2.0, 2.0, 3.0, 3.0], [0.0, 0.0, 1.0, 1.0]][..]).try_into()?;
        let before = boxes.clone();
        let pooled = roi_align(grid().view(), &boxes, 1)?;
        assert_eq!(boxes, before);
        assert_abs_diff_eq!(pooled[(0, 0, 0, 0)], 12.0, epsilon = 1e-5);
        // samples at -0.25 read the replicated border
        assert_abs_diff_eq!(pooled[(1, 0, 0, 0)], 0.75, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn empty_boxes_give_empty_output() -> Result<()> {
        let crops = roi_align(grid().view(), &BoxArray::empty(), 7)?;
        assert_eq!(crops.shape(), &[0, 1, 7, 7]);

        let boxes: BoxArray = (&[[0.0, 0.0, 1.0, 1.0]][..]).try_into()?;
        assert!(crop_and_resize(Array3::zeros((1, 0, 0)).view(), &boxes, 2, true).is_err());
        Ok(())
    }
}
