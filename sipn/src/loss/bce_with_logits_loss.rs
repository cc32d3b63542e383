use super::zero_loss;
use crate::common::*;

/// Binary cross entropy on logits, used by the objectness branch of the RPN.
#[derive(Debug)]
pub struct BceWithLogitsLoss {
    reduction: Reduction,
}

impl BceWithLogitsLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target tensors must have equal shape"
        );
        debug_assert!(
            bool::from(target.ge(0.0).logical_and(&target.le(1.0)).all()),
            "target values must be in range of [0.0, 1.0]"
        );

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.numel() == 0 && self.reduction == Reduction::Mean {
            return zero_loss(input.device());
        }

        input.binary_cross_entropy_with_logits::<Tensor>(
            &target.to_kind(input.kind()),
            None,
            None,
            self.reduction,
        )
    }
}
