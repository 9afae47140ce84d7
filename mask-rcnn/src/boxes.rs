//! Ordered box arrays and the pairwise geometry on them.

use crate::common::*;

/// Checked array of boxes in shape `[n, 4]`, one `(x1, y1, x2, y2)` row per box.
///
/// Row order is meaningful: it is parallel to the score and label arrays
/// that travel alongside the boxes.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct BoxArray {
    #[get = "pub"]
    array: Array2<f32>,
}

impl BoxArray {
    pub fn empty() -> Self {
        Self {
            array: Array2::zeros((0, 4)),
        }
    }

    pub fn from_rects<I>(rects: I) -> Self
    where
        I: IntoIterator<Item = XYXY<f32>>,
    {
        let rows: Vec<[f32; 4]> = rects.into_iter().map(|rect| rect.xyxy()).collect();
        Self {
            array: Array2::from(rows),
        }
    }

    pub fn len(&self) -> usize {
        self.array.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rect(&self, index: usize) -> XYXY<f32> {
        let row = self.array.row(index);
        XYXY::from_xyxy([row[0], row[1], row[2], row[3]])
    }

    pub fn rects(&self) -> impl Iterator<Item = XYXY<f32>> + '_ {
        self.array
            .rows()
            .into_iter()
            .map(|row| XYXY::from_xyxy([row[0], row[1], row[2], row[3]]))
    }

    /// Gather rows by index. Indices may repeat.
    pub fn select(&self, indexes: &[usize]) -> Self {
        Self {
            array: self.array.select(Axis(0), indexes),
        }
    }

    /// Append the rows of `other` after the rows of `self`.
    pub fn concat(&self, other: &Self) -> Self {
        Self::from_rects(chain!(self.rects(), other.rects()))
    }

    pub fn widths(&self) -> Array1<f32> {
        self.rects().map(|rect| rect.w()).collect()
    }

    pub fn heights(&self) -> Array1<f32> {
        self.rects().map(|rect| rect.h()).collect()
    }

    pub fn areas(&self) -> Array1<f32> {
        self.rects().map(|rect| area(&rect)).collect()
    }

    /// Clamp every box into `[0, w - 1] x [0, h - 1]`.
    pub fn clip(&self, window: &HW<f32>) -> Self {
        Self::from_rects(self.rects().map(|rect| rect.clip_to(window)))
    }

    /// Multiply all coordinates by a positive factor.
    pub fn scale(&self, factor: f32) -> Result<Self> {
        ensure!(factor > 0.0, "scaling factor must be positive");
        let transform = Transform::scale(factor);
        Ok(Self::from_rects(self.rects().map(|rect| &transform * &rect)))
    }

    /// Indices of boxes lying entirely within `[0, w] x [0, h]`.
    pub fn indexes_inside(&self, window: &HW<f32>) -> Vec<usize> {
        self.rects()
            .enumerate()
            .filter(|(_, rect)| rect.is_inside(window))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn pairwise_iou(&self, other: &Self) -> Array2<f32> {
        pairwise_iou(self, other)
    }
}

impl TryFrom<Array2<f32>> for BoxArray {
    type Error = Error;

    fn try_from(array: Array2<f32>) -> Result<Self, Self::Error> {
        ensure!(
            array.ncols() == 4,
            "expect a [n, 4] box array, but get shape {:?}",
            array.shape()
        );
        let invalid = array
            .rows()
            .into_iter()
            .position(|row| !(row[2] >= row[0] && row[3] >= row[1]));
        if let Some(index) = invalid {
            bail!(
                "box {} violates x2 >= x1 and y2 >= y1: {:?}",
                index,
                array.row(index).to_vec()
            );
        }
        Ok(Self { array })
    }
}

impl TryFrom<ArrayView2<'_, f32>> for BoxArray {
    type Error = Error;

    fn try_from(view: ArrayView2<'_, f32>) -> Result<Self, Self::Error> {
        view.to_owned().try_into()
    }
}

impl TryFrom<&[[f32; 4]]> for BoxArray {
    type Error = Error;

    fn try_from(rows: &[[f32; 4]]) -> Result<Self, Self::Error> {
        let rects: Vec<XYXY<f32>> = rows
            .iter()
            .map(|&row| XYXY::try_from(row))
            .collect::<Result<_>>()?;
        Ok(Self::from_rects(rects))
    }
}

impl From<BoxArray> for Array2<f32> {
    fn from(from: BoxArray) -> Self {
        from.array
    }
}

/// Box area, `max(0, x2 - x1) * max(0, y2 - y1)`.
pub fn area<R>(rect: &R) -> f32
where
    R: Rect<Type = f32>,
{
    (rect.x2() - rect.x1()).max(0.0) * (rect.y2() - rect.y1()).max(0.0)
}

/// Compute the `[n, m]` IoU matrix between two box arrays.
///
/// Pairs with an empty intersection, degenerate boxes included, get zero.
pub fn pairwise_iou(lhs: &BoxArray, rhs: &BoxArray) -> Array2<f32> {
    let lhs: Vec<_> = lhs.rects().collect();
    let rhs: Vec<_> = rhs.rects().collect();
    Array2::from_shape_fn((lhs.len(), rhs.len()), |(i, j)| lhs[i].iou_with(&rhs[j]))
}
