use super::{subsample, RoiConfig};
use crate::{boxes, common::*};

/// Sampled regions of interest and their training targets.
#[derive(Debug, TensorLike)]
pub struct ProposalTargets {
    /// `[R, 4]` sampled boxes. Foreground boxes come first.
    pub rois: Tensor,
    /// `[R]` class labels, 1 for person and 0 for background.
    pub labels: Tensor,
    /// `[R]` identity labels. Background and unlabeled persons carry the sentinel.
    pub pid_labels: Tensor,
    /// `[num_fg, 4]` normalized regression targets of foreground boxes.
    pub bbox_targets: Tensor,
    #[tensor_like(clone)]
    pub num_fg: i64,
}

/// Matches proposals to ground truth boxes and samples a fixed-size set of ROIs.
#[derive(Debug)]
pub struct ProposalTargetSampler {
    config: RoiConfig,
}

impl ProposalTargetSampler {
    pub fn new(config: &RoiConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    /// Samples ROIs from `[P, 4]` proposals and `[G, 4]` ground truth boxes
    /// labeled by `[G]` identities. Ground truth boxes are added to the candidates.
    pub fn sample(
        &self,
        proposals: &Tensor,
        gt_boxes: &Tensor,
        gt_pids: &Tensor,
        sentinel: i64,
        rng: &mut StdRng,
    ) -> ProposalTargets {
        tch::no_grad(|| {
            let RoiConfig {
                batch_size,
                fg_fraction,
                fg_iou,
                bg_iou_hi,
                bg_iou_lo,
                bbox_stds,
                ..
            } = self.config;
            let device = proposals.device();

            let candidates = Tensor::cat(&[proposals, &gt_boxes.to_kind(proposals.kind())], 0);
            let num_candidates = candidates.size()[0] as usize;
            let num_gt = gt_boxes.size()[0];

            let (max_iou, argmax): (Vec<f32>, Vec<i64>) = if num_gt == 0 {
                (vec![0.0; num_candidates], vec![0; num_candidates])
            } else {
                let (max_iou, argmax) = boxes::box_iou(&candidates, gt_boxes).max_dim(1, false);
                (
                    Vec::<f32>::from(&max_iou.to_device(Device::Cpu)),
                    Vec::<i64>::from(&argmax.to_device(Device::Cpu)),
                )
            };
            let gt_pids = Vec::<i64>::from(&gt_pids.to_device(Device::Cpu));

            let fg: Vec<usize> = max_iou
                .iter()
                .positions(|&iou| iou as f64 >= fg_iou.raw())
                .collect();
            let bg: Vec<usize> = max_iou
                .iter()
                .positions(|&iou| {
                    let iou = iou as f64;
                    iou < bg_iou_hi.raw() && iou >= bg_iou_lo.raw()
                })
                .collect();

            let max_fg = (batch_size as f64 * fg_fraction.raw()) as usize;
            let fg = subsample(fg, max_fg, rng);
            let bg = subsample(bg, batch_size - fg.len(), rng);
            let num_fg = fg.len() as i64;

            let keep: Vec<i64> = fg.iter().chain(&bg).map(|&index| index as i64).collect();
            let keep = Tensor::of_slice(&keep).to_device(device);
            let rois = candidates.index_select(0, &keep);

            let labels: Vec<i64> = iter_labels(fg.len(), bg.len(), 1, 0).collect();
            let pid_labels: Vec<i64> = fg
                .iter()
                .map(|&index| gt_pids[argmax[index] as usize])
                .chain(std::iter::repeat(sentinel).take(bg.len()))
                .collect();

            let bbox_targets = if num_fg == 0 {
                Tensor::zeros(&[0, 4], (Kind::Float, device))
            } else {
                let matched: Vec<i64> = fg.iter().map(|&index| argmax[index]).collect();
                let matched = Tensor::of_slice(&matched).to_device(device);
                let stds = Tensor::of_slice(&bbox_stds.map(|std| std.raw() as f32))
                    .to_device(device)
                    .view([1, 4]);
                boxes::encode_deltas(
                    &rois.narrow(0, 0, num_fg),
                    &gt_boxes.index_select(0, &matched),
                ) / stds
            };

            ProposalTargets {
                rois,
                labels: Tensor::of_slice(&labels).to_device(device),
                pid_labels: Tensor::of_slice(&pid_labels).to_device(device),
                bbox_targets,
                num_fg,
            }
        })
    }
}

fn iter_labels(num_fg: usize, num_bg: usize, fg: i64, bg: i64) -> impl Iterator<Item = i64> {
    std::iter::repeat(fg)
        .take(num_fg)
        .chain(std::iter::repeat(bg).take(num_bg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_rois_inherit_identities() -> Result<()> {
        let sampler = ProposalTargetSampler::new(&RoiConfig {
            batch_size: 8,
            ..Default::default()
        })?;
        let mut rng = StdRng::seed_from_u64(1);

        let proposals = Tensor::of_slice(&[
            0f32, 0.0, 20.0, 40.0, // overlaps the first person
            100.0, 100.0, 120.0, 140.0, // background
            60.0, 0.0, 80.0, 40.0, // overlaps the unlabeled person
        ])
        .view([3, 4]);
        let gt_boxes = Tensor::of_slice(&[1f32, 1.0, 21.0, 41.0, 60.0, 0.0, 80.0, 40.0]).view([2, 4]);
        let gt_pids = Tensor::of_slice(&[3i64, 9]);

        let targets = sampler.sample(&proposals, &gt_boxes, &gt_pids, 9, &mut rng);
        let num_fg = targets.num_fg as usize;
        assert_eq!(num_fg, 4);
        assert_eq!(targets.rois.size(), [5, 4]);
        assert_eq!(targets.bbox_targets.size(), [4, 4]);

        let labels = Vec::<i64>::from(&targets.labels);
        assert_eq!(labels, vec![1, 1, 1, 1, 0]);

        let mut fg_pids = Vec::<i64>::from(&targets.pid_labels)[..num_fg].to_vec();
        fg_pids.sort_unstable();
        assert_eq!(fg_pids, vec![3, 3, 9, 9]);
        assert_eq!(Vec::<i64>::from(&targets.pid_labels)[num_fg], 9);

        Ok(())
    }

    #[test]
    fn images_without_boxes_yield_background() -> Result<()> {
        let sampler = ProposalTargetSampler::new(&RoiConfig::default())?;
        let mut rng = StdRng::seed_from_u64(1);

        let proposals = Tensor::of_slice(&[0f32, 0.0, 20.0, 40.0]).view([1, 4]);
        let gt_boxes = Tensor::zeros(&[0, 4], (Kind::Float, Device::Cpu));
        let gt_pids = Tensor::zeros(&[0], (Kind::Int64, Device::Cpu));

        let targets = sampler.sample(&proposals, &gt_boxes, &gt_pids, 5, &mut rng);
        assert_eq!(targets.num_fg, 0);
        assert_eq!(Vec::<i64>::from(&targets.pid_labels), vec![5]);

        Ok(())
    }
}
