//! The region proposal network.

use super::{subsample, AnchorGenerator, RpnConfig};
use crate::{
    boxes,
    common::*,
    dataset::ImageInfo,
    loss::{BceWithLogitsLoss, SmoothL1Loss},
};

#[derive(Debug)]
pub struct RpnOutput {
    /// `[P, 4]` proposals without gradient.
    pub proposals: Tensor,
    pub cls_loss: Tensor,
    pub box_loss: Tensor,
}

/// Anchor labels and regression targets for one image.
#[derive(Debug)]
struct AnchorTargets {
    /// Indexes of sampled positive anchors.
    positives: Vec<i64>,
    /// Indexes of sampled negative anchors.
    negatives: Vec<i64>,
    /// The matched ground truth index of each sampled positive anchor.
    matched_gt: Vec<i64>,
}

#[derive(Debug)]
pub struct RegionProposalNetwork {
    conv: nn::Conv2D,
    cls_logits: nn::Conv2D,
    bbox_pred: nn::Conv2D,
    anchor_generator: AnchorGenerator,
    feature_stride: usize,
    config: RpnConfig,
    bce_loss: BceWithLogitsLoss,
    box_loss: SmoothL1Loss,
}

impl RegionProposalNetwork {
    pub fn new<'p>(
        path: impl Borrow<nn::Path<'p>>,
        in_c: usize,
        feature_stride: usize,
        config: &RpnConfig,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.borrow();

        let ratios: Vec<f64> = config.anchor_ratios.iter().map(|ratio| ratio.raw()).collect();
        let scales: Vec<f64> = config.anchor_scales.iter().map(|scale| scale.raw()).collect();
        let anchor_generator = AnchorGenerator::new(feature_stride, &ratios, &scales);
        let num_anchors = anchor_generator.num_anchors();

        let hidden_c = config.hidden_channels as i64;
        let conv = nn::conv2d(
            path / "conv",
            in_c as i64,
            hidden_c,
            3,
            nn::ConvConfig {
                padding: 1,
                ..Default::default()
            },
        );
        let cls_logits = nn::conv2d(
            path / "cls_logits",
            hidden_c,
            num_anchors,
            1,
            Default::default(),
        );
        let bbox_pred = nn::conv2d(
            path / "bbox_pred",
            hidden_c,
            num_anchors * 4,
            1,
            Default::default(),
        );

        Ok(Self {
            conv,
            cls_logits,
            bbox_pred,
            anchor_generator,
            feature_stride,
            config: config.clone(),
            bce_loss: BceWithLogitsLoss::new(Reduction::Mean),
            box_loss: SmoothL1Loss::new(config.box_loss_beta.raw(), Reduction::Sum),
        })
    }

    /// Predicts proposals on `[1, C, H, W]` features and computes the RPN
    /// losses against `[G, 4]` ground truth boxes.
    pub fn forward(
        &self,
        features: &Tensor,
        info: &ImageInfo,
        gt_boxes: &Tensor,
        rng: &mut StdRng,
    ) -> Result<RpnOutput> {
        let device = features.device();
        let (_b, _c, feature_h, feature_w) = features.size4()?;

        let hidden = features.apply(&self.conv).relu();
        let logits = hidden
            .apply(&self.cls_logits)
            .permute(&[0, 2, 3, 1])
            .reshape(&[-1]);
        let deltas = hidden
            .apply(&self.bbox_pred)
            .permute(&[0, 2, 3, 1])
            .reshape(&[-1, 4]);
        let anchors = self
            .anchor_generator
            .grid_anchors(feature_h, feature_w, device);

        let proposals = tch::no_grad(|| self.propose(&anchors, &logits, &deltas, info));

        let AnchorTargets {
            positives,
            negatives,
            matched_gt,
        } = tch::no_grad(|| self.anchor_targets(&anchors, gt_boxes, info, rng));

        let num_sampled = positives.len() + negatives.len();
        let (cls_loss, box_loss) = if num_sampled == 0 {
            let zero = Tensor::zeros(&[], (Kind::Float, device));
            (zero.shallow_clone(), zero)
        } else {
            let sampled = Tensor::of_slice(&[positives.as_slice(), negatives.as_slice()].concat())
                .to_device(device);
            let cls_target = Tensor::cat(
                &[
                    Tensor::ones(&[positives.len() as i64], (Kind::Float, device)),
                    Tensor::zeros(&[negatives.len() as i64], (Kind::Float, device)),
                ],
                0,
            );
            let cls_loss = self
                .bce_loss
                .forward(&logits.index_select(0, &sampled), &cls_target);

            let box_loss = if positives.is_empty() {
                Tensor::zeros(&[], (Kind::Float, device))
            } else {
                let positives = Tensor::of_slice(&positives).to_device(device);
                let matched_gt = Tensor::of_slice(&matched_gt).to_device(device);
                let box_target = boxes::encode_deltas(
                    &anchors.index_select(0, &positives),
                    &gt_boxes.index_select(0, &matched_gt),
                );
                self.box_loss
                    .forward(&deltas.index_select(0, &positives), &box_target)
                    / num_sampled as f64
            };

            (cls_loss, box_loss)
        };

        Ok(RpnOutput {
            proposals,
            cls_loss,
            box_loss,
        })
    }

    fn propose(&self, anchors: &Tensor, logits: &Tensor, deltas: &Tensor, info: &ImageInfo) -> Tensor {
        let RpnConfig {
            pre_nms_top_n,
            post_nms_top_n,
            nms_iou,
            min_size,
            ..
        } = self.config;

        let proposals = boxes::clip_boxes(
            &boxes::decode_deltas(anchors, &deltas.detach()),
            info.height as f64,
            info.width as f64,
        );
        let scores = logits.detach();

        // drop tiny boxes
        let min_size = min_size.raw() * info.scale;
        let widths = proposals.select(1, 2) - proposals.select(1, 0);
        let heights = proposals.select(1, 3) - proposals.select(1, 1);
        let keep = widths
            .ge(min_size)
            .logical_and(&heights.ge(min_size))
            .nonzero()
            .squeeze_dim(1);
        let proposals = proposals.index_select(0, &keep);
        let scores = scores.index_select(0, &keep);

        let num_candidates = scores.size()[0];
        if num_candidates == 0 {
            return proposals;
        }

        let (scores, order) =
            scores.topk(num_candidates.min(pre_nms_top_n as i64), 0, true, true);
        let proposals = proposals.index_select(0, &order);

        let mut keep = boxes::nms(&proposals, &scores, nms_iou.raw());
        keep.truncate(post_nms_top_n);
        let keep = Tensor::of_slice(&keep).to_device(proposals.device());
        proposals.index_select(0, &keep)
    }

    fn anchor_targets(
        &self,
        anchors: &Tensor,
        gt_boxes: &Tensor,
        info: &ImageInfo,
        rng: &mut StdRng,
    ) -> AnchorTargets {
        let RpnConfig {
            positive_iou,
            negative_iou,
            batch_size,
            positive_fraction,
            ..
        } = self.config;

        // consider anchors inside the image only
        let height = info.height as f64;
        let width = info.width as f64;
        let inside = anchors
            .select(1, 0)
            .ge(0.0)
            .logical_and(&anchors.select(1, 1).ge(0.0))
            .logical_and(&anchors.select(1, 2).le(width))
            .logical_and(&anchors.select(1, 3).le(height))
            .nonzero()
            .squeeze_dim(1);
        let inside_indexes = Vec::<i64>::from(&inside.to_device(Device::Cpu));

        let num_gt = gt_boxes.size()[0];
        let (labels, argmax): (Vec<i64>, Vec<i64>) = if inside_indexes.is_empty() {
            (vec![], vec![])
        } else if num_gt == 0 {
            (vec![0; inside_indexes.len()], vec![0; inside_indexes.len()])
        } else {
            let iou = boxes::box_iou(&anchors.index_select(0, &inside), gt_boxes);
            let (max_iou, argmax) = iou.max_dim(1, false);
            let (gt_max_iou, _) = iou.max_dim(0, false);

            // the best anchors of each ground truth box are positive
            let is_best = iou
                .eq_tensor(&gt_max_iou.unsqueeze(0))
                .logical_and(&gt_max_iou.gt(0.0).unsqueeze(0))
                .any_dim(1, false);

            let max_iou = Vec::<f32>::from(&max_iou.to_device(Device::Cpu));
            let is_best = Vec::<i64>::from(&is_best.to_kind(Kind::Int64).to_device(Device::Cpu));
            let argmax = Vec::<i64>::from(&argmax.to_device(Device::Cpu));

            let labels = izip!(max_iou, is_best)
                .map(|(max_iou, is_best)| {
                    let max_iou = max_iou as f64;
                    if is_best != 0 || max_iou >= positive_iou.raw() {
                        1
                    } else if max_iou < negative_iou.raw() {
                        0
                    } else {
                        -1
                    }
                })
                .collect();

            (labels, argmax)
        };

        let positives: Vec<usize> = labels
            .iter()
            .positions(|&label| label == 1)
            .collect();
        let negatives: Vec<usize> = labels
            .iter()
            .positions(|&label| label == 0)
            .collect();

        let max_positives = (batch_size as f64 * positive_fraction.raw()) as usize;
        let positives = subsample(positives, max_positives, rng);
        let negatives = subsample(negatives, batch_size - positives.len(), rng);

        AnchorTargets {
            matched_gt: positives.iter().map(|&index| argmax[index]).collect(),
            positives: positives
                .iter()
                .map(|&index| inside_indexes[index])
                .collect(),
            negatives: negatives
                .iter()
                .map(|&index| inside_indexes[index])
                .collect(),
        }
    }

    /// The stride of input feature maps.
    pub fn feature_stride(&self) -> usize {
        self.feature_stride
    }
}
