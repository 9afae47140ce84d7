use super::XYXY;
use crate::common::*;

/// Axis-aligned affine transform `x' = x * sx + tx`, `y' = y * sy + ty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sx: T,
    pub sy: T,
    pub tx: T,
    pub ty: T,
}

impl<T> Transform<T>
where
    T: Copy + Num,
{
    /// Uniform scaling about the origin.
    pub fn scale(factor: T) -> Self {
        Self {
            sx: factor,
            sy: factor,
            tx: T::zero(),
            ty: T::zero(),
        }
    }
}

impl<T> Mul<&XYXY<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = XYXY<T>;

    fn mul(self, rhs: &XYXY<T>) -> Self::Output {
        rhs.transform(self)
    }
}
