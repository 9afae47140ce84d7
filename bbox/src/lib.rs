//! Safe bounding box types and functions.
//!
//! Boxes are axis-aligned and stored as `(x1, y1, x2, y2)` with `x2 >= x1`
//! and `y2 >= y1`. Zero-area boxes are valid.

mod common;

mod into_xyxy;

pub use transform::*;
mod transform;

pub use rect::*;
pub mod rect;

pub use xyxy::*;
pub mod xyxy;

pub use cxcywh::*;
pub mod cxcywh;

pub use hw::*;
pub mod hw;

pub use element::*;
pub mod element;

pub mod prelude {
    pub use crate::rect::{Rect, RectFloat, RectNum};
}
