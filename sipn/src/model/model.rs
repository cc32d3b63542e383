use crate::{
    common::*,
    dataset::{GallerySample, QuerySample},
};

/// The four detection loss terms.
#[derive(Debug, TensorLike)]
pub struct DetectionLosses {
    /// Objectness loss of the region proposal network.
    pub rpn_cls: Tensor,
    /// Box regression loss of the region proposal network.
    pub rpn_box: Tensor,
    /// Person/background classification loss of the ROI head.
    pub cls: Tensor,
    /// Box regression loss of the ROI head.
    pub bbox: Tensor,
}

impl DetectionLosses {
    pub fn total(&self) -> Tensor {
        &self.rpn_cls + &self.rpn_box + &self.cls + &self.bbox
    }
}

/// The output of a detection-mode forward pass.
#[derive(Debug, TensorLike)]
pub struct DetectionOutput {
    pub losses: DetectionLosses,
    /// `[R]` identity labels of proposals. Proposals without a known
    /// identity carry the sentinel `num_pid`.
    pub pid_labels: Tensor,
    /// `[R, D]` re-identification embeddings of proposals.
    pub reid_features: Tensor,
}

impl DetectionOutput {
    /// Keeps the proposals whose label is not `sentinel`.
    pub fn drop_unlabeled(&self, sentinel: i64) -> (Tensor, Tensor) {
        let keep = self.pid_labels.ne(sentinel).nonzero().squeeze_dim(1);
        (
            self.pid_labels.index_select(0, &keep),
            self.reid_features.index_select(0, &keep),
        )
    }
}

/// The joint detection and re-identification model.
pub trait PersonSearchModel {
    /// The number of identity labels. It is also the label of proposals
    /// without a known identity.
    fn num_pid(&self) -> i64;

    /// Computes the `[1, D]` embedding of the query box.
    fn query_forward(&mut self, sample: &QuerySample) -> Result<Tensor>;

    /// Detects persons and computes losses against ground truth boxes.
    fn detection_forward(&mut self, sample: &GallerySample) -> Result<DetectionOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_unlabeled_proposals() {
        let zero = Tensor::zeros(&[], (Kind::Float, Device::Cpu));
        let output = DetectionOutput {
            losses: DetectionLosses {
                rpn_cls: zero.shallow_clone(),
                rpn_box: zero.shallow_clone(),
                cls: zero.shallow_clone(),
                bbox: zero,
            },
            pid_labels: Tensor::of_slice(&[4i64, 1, 4, 2]),
            reid_features: Tensor::of_slice(&[0f32, 1.0, 2.0, 3.0]).view([4, 1]),
        };

        let (labels, features) = output.drop_unlabeled(4);
        assert_eq!(Vec::<i64>::from(&labels), vec![1, 2]);
        assert_eq!(Vec::<f32>::from(&features.view([-1])), vec![1.0, 3.0]);
    }
}
