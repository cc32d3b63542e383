use super::zero_loss;
use crate::common::*;

/// Smooth L1 loss for box regression.
///
/// The loss is quadratic below `beta` and linear above.
#[derive(Debug)]
pub struct SmoothL1Loss {
    beta: f64,
    reduction: Reduction,
}

impl SmoothL1Loss {
    pub fn new(beta: f64, reduction: Reduction) -> Self {
        Self { beta, reduction }
    }

    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.numel() == 0 && self.reduction == Reduction::Mean {
            return zero_loss(input.device());
        }

        let diff = (input - target).abs();
        let quadratic = &diff * &diff * (0.5 / self.beta);
        let linear = &diff - 0.5 * self.beta;
        let loss = quadratic.where_self(&diff.le(self.beta), &linear);

        match self.reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.sum(Kind::Float),
            Reduction::Mean => loss.mean(Kind::Float),
            Reduction::Other(_) => unimplemented!(),
        }
    }
}
