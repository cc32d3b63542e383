use crate::common::*;

/// Crops each region of interest from `[1, C, H, W]` features and
/// max-pools it to `[C, output_size, output_size]`.
///
/// Boxes are given in image pixel units and mapped onto the feature map
/// by `spatial_scale`. The output has shape `[R, C, output_size, output_size]`.
pub fn roi_pool(features: &Tensor, rois: &Tensor, spatial_scale: f64, output_size: i64) -> Tensor {
    let size = features.size();
    let (channels, feature_h, feature_w) = (size[1], size[2], size[3]);
    let coords = Vec::<f32>::from(&rois.detach().to_device(Device::Cpu).to_kind(Kind::Float).view([-1]));

    if coords.is_empty() {
        return Tensor::zeros(
            &[0, channels, output_size, output_size],
            (features.kind(), features.device()),
        );
    }

    let to_cell = |value: f32, upper: i64| {
        ((value as f64 * spatial_scale).round() as i64).clamp(0, upper - 1)
    };

    let pooled: Vec<Tensor> = coords
        .chunks(4)
        .map(|roi| {
            let x1 = to_cell(roi[0], feature_w);
            let y1 = to_cell(roi[1], feature_h);
            let x2 = to_cell(roi[2], feature_w).max(x1);
            let y2 = to_cell(roi[3], feature_h).max(y1);

            let (pooled, _indexes) = features
                .narrow(2, y1, y2 - y1 + 1)
                .narrow(3, x1, x2 - x1 + 1)
                .adaptive_max_pool2d(&[output_size, output_size]);
            pooled
        })
        .collect();

    Tensor::cat(&pooled, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_picks_region_maximum() {
        // a 1x1x4x4 map whose value is 10 * row + column
        let features = (Tensor::arange(4, (Kind::Float, Device::Cpu)).view([4, 1]) * 10.0
            + Tensor::arange(4, (Kind::Float, Device::Cpu)).view([1, 4]))
        .view([1, 1, 4, 4]);
        let rois = Tensor::of_slice(&[0f32, 0.0, 16.0, 16.0, 32.0, 32.0, 48.0, 48.0]).view([2, 4]);

        let pooled = roi_pool(&features, &rois, 1.0 / 16.0, 1);
        assert_eq!(pooled.size(), [2, 1, 1, 1]);
        assert_eq!(Vec::<f32>::from(&pooled.view([-1])), vec![11.0, 33.0]);
    }

    #[test]
    fn empty_rois() {
        let features = Tensor::zeros(&[1, 8, 4, 4], (Kind::Float, Device::Cpu));
        let rois = Tensor::zeros(&[0, 4], (Kind::Float, Device::Cpu));
        assert_eq!(roi_pool(&features, &rois, 1.0 / 16.0, 7).size(), [0, 8, 7, 7]);
    }
}
