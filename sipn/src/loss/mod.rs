//! Loss function building blocks.

mod bce_with_logits_loss;
mod cross_entropy;
mod smooth_l1_loss;
mod triplet_loss;

pub use bce_with_logits_loss::*;
pub use cross_entropy::*;
pub use smooth_l1_loss::*;
pub use triplet_loss::*;

use crate::common::*;

/// Creates a zero scalar that does not require gradient.
pub(crate) fn zero_loss(device: Device) -> Tensor {
    Tensor::zeros(&[], (Kind::Float, device)).set_requires_grad(false)
}
