//! The spatial invariant person search network.

use super::{
    module::ResNet, roi_pool, DetectionLosses, DetectionOutput, PersonSearchModel,
    ProposalTargetSampler, ProposalTargets, RegionProposalNetwork, ResNetKind, RpnOutput,
    SipnConfig,
};
use crate::{
    common::*,
    dataset::{GallerySample, QuerySample},
    loss::{CrossEntropyLoss, SmoothL1Loss},
};

const FEATURE_STRIDE: usize = 16;

/// A Faster R-CNN style detector with a re-identification embedding head.
///
/// The ResNet trunk feeds both the region proposal network and the ROI head.
/// The ROI head runs `layer4` on pooled regions and predicts person scores,
/// box refinements and L2-normalized embeddings.
#[derive(Debug)]
pub struct Sipn {
    backbone: ResNet,
    rpn: RegionProposalNetwork,
    proposal_sampler: ProposalTargetSampler,
    cls_score: nn::Linear,
    bbox_pred: nn::Linear,
    reid_embed: nn::Linear,
    cross_entropy: CrossEntropyLoss,
    box_loss: SmoothL1Loss,
    num_pid: i64,
    pool_size: i64,
    bn_train: bool,
    rng: StdRng,
}

impl Sipn {
    pub fn new<'p>(
        path: impl Borrow<nn::Path<'p>>,
        kind: ResNetKind,
        num_pid: i64,
        config: &SipnConfig,
        seed: u64,
    ) -> Result<Self> {
        ensure!(num_pid > 0, "num_pid must be positive");
        ensure!(config.feature_dim > 0, "feature_dim must be positive");
        let path = path.borrow();

        let backbone = ResNet::new(path, kind);
        let rpn = RegionProposalNetwork::new(
            path / "rpn",
            backbone.trunk_channels(),
            FEATURE_STRIDE,
            &config.rpn,
        )?;
        let proposal_sampler = ProposalTargetSampler::new(&config.roi)?;

        let head_c = backbone.head_channels() as i64;
        let cls_score = nn::linear(path / "cls_score", head_c, 2, Default::default());
        let bbox_pred = nn::linear(path / "bbox_pred", head_c, 4, Default::default());
        let reid_embed = nn::linear(
            path / "reid_embed",
            head_c,
            config.feature_dim as i64,
            Default::default(),
        );

        Ok(Self {
            backbone,
            rpn,
            proposal_sampler,
            cls_score,
            bbox_pred,
            reid_embed,
            cross_entropy: CrossEntropyLoss::new(Reduction::Mean),
            box_loss: SmoothL1Loss::new(config.roi.box_loss_beta.raw(), Reduction::Sum),
            num_pid,
            pool_size: config.roi.pool_size as i64,
            bn_train: config.bn_train,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn pooled_features(&self, features: &Tensor, rois: &Tensor) -> Tensor {
        let pooled = roi_pool(
            features,
            rois,
            1.0 / FEATURE_STRIDE as f64,
            self.pool_size,
        );
        self.backbone.forward_head(&pooled, self.bn_train)
    }

    fn embed(&self, pooled: &Tensor) -> Tensor {
        let embedding = pooled.apply(&self.reid_embed);
        let norm = (&embedding * &embedding)
            .sum_dim_intlist(&[1], true, Kind::Float)
            .clamp_min(1e-12)
            .sqrt();
        embedding / norm
    }
}

impl PersonSearchModel for Sipn {
    fn num_pid(&self) -> i64 {
        self.num_pid
    }

    fn query_forward(&mut self, sample: &QuerySample) -> Result<Tensor> {
        let QuerySample { image, roi, .. } = sample;
        ensure!(
            roi.size() == [1, 4],
            "expect a [1, 4] query box, but get {:?}",
            roi.size()
        );

        let features = self.backbone.forward_trunk(image, self.bn_train);
        let pooled = self.pooled_features(&features, roi);
        Ok(self.embed(&pooled))
    }

    fn detection_forward(&mut self, sample: &GallerySample) -> Result<DetectionOutput> {
        let GallerySample {
            image,
            gt_boxes,
            gt_pids,
            info,
        } = sample;

        let features = self.backbone.forward_trunk(image, self.bn_train);

        let RpnOutput {
            proposals,
            cls_loss: rpn_cls,
            box_loss: rpn_box,
        } = self.rpn.forward(&features, info, gt_boxes, &mut self.rng)?;

        let ProposalTargets {
            rois,
            labels,
            pid_labels,
            bbox_targets,
            num_fg,
        } = self.proposal_sampler.sample(
            &proposals,
            gt_boxes,
            gt_pids,
            self.num_pid,
            &mut self.rng,
        );
        let num_rois = rois.size()[0];

        let pooled = self.pooled_features(&features, &rois);
        let cls_logits = pooled.apply(&self.cls_score);
        let box_deltas = pooled.apply(&self.bbox_pred);

        let cls = self.cross_entropy.forward(&cls_logits, &labels);
        let bbox = if num_fg == 0 {
            Tensor::zeros(&[], (Kind::Float, image.device()))
        } else {
            self.box_loss
                .forward(&box_deltas.narrow(0, 0, num_fg), &bbox_targets)
                / num_rois as f64
        };

        Ok(DetectionOutput {
            losses: DetectionLosses {
                rpn_cls,
                rpn_box,
                cls,
                bbox,
            },
            pid_labels,
            reid_features: self.embed(&pooled),
        })
    }
}
