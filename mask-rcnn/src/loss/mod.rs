//! Supervised losses and training metrics of the three heads.

mod fast_rcnn_loss;
mod mask_rcnn_loss;
mod misc;
mod rpn_loss;

pub use fast_rcnn_loss::*;
pub use mask_rcnn_loss::*;
pub use misc::*;
pub use rpn_loss::*;
