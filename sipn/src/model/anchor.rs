use crate::common::*;

/// Generates anchor boxes laid on a feature map grid.
#[derive(Debug)]
pub struct AnchorGenerator {
    /// `[A, 4]` anchors centered at the first grid cell.
    base_anchors: Tensor,
    stride: i64,
}

impl AnchorGenerator {
    pub fn new(stride: usize, ratios: &[f64], scales: &[f64]) -> Self {
        let base_size = stride as f64;
        let center = base_size / 2.0;

        let coords: Vec<f32> = ratios
            .iter()
            .flat_map(|&ratio| scales.iter().map(move |&scale| (ratio, scale)))
            .flat_map(|(ratio, scale)| {
                let area = base_size * base_size;
                let w = (area / ratio).sqrt() * scale;
                let h = w * ratio;
                [
                    center - w / 2.0,
                    center - h / 2.0,
                    center + w / 2.0,
                    center + h / 2.0,
                ]
            })
            .map(|value| value as f32)
            .collect();
        let base_anchors = Tensor::of_slice(&coords).view([-1, 4]);

        Self {
            base_anchors,
            stride: stride as i64,
        }
    }

    /// The number of anchors per grid cell.
    pub fn num_anchors(&self) -> i64 {
        self.base_anchors.size()[0]
    }

    /// Produces `[H * W * A, 4]` anchors ordered by row, column and anchor index.
    pub fn grid_anchors(&self, feature_h: i64, feature_w: i64, device: Device) -> Tensor {
        let shift_x = Tensor::arange(feature_w, (Kind::Float, device)) * self.stride as f64;
        let shift_y = Tensor::arange(feature_h, (Kind::Float, device)) * self.stride as f64;

        let shift_x = shift_x
            .view([1, feature_w])
            .expand(&[feature_h, feature_w], false)
            .reshape(&[-1]);
        let shift_y = shift_y
            .view([feature_h, 1])
            .expand(&[feature_h, feature_w], false)
            .reshape(&[-1]);
        let shifts = Tensor::stack(&[&shift_x, &shift_y, &shift_x, &shift_y], 1);

        (shifts.unsqueeze(1) + self.base_anchors.to_device(device).unsqueeze(0)).view([-1, 4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn base_anchor_sizes() {
        let generator = AnchorGenerator::new(16, &[0.5, 1.0, 2.0], &[8.0, 16.0, 32.0]);
        assert_eq!(generator.num_anchors(), 9);

        let anchors = generator.grid_anchors(1, 1, Device::Cpu);
        let coords = Vec::<f32>::from(&anchors.view([-1]));

        // ratio 1, scale 8: a 128x128 box centered at (8, 8)
        let square = &coords[3 * 4..4 * 4];
        assert_abs_diff_eq!(square[0], -56.0, epsilon = 1e-4);
        assert_abs_diff_eq!(square[1], -56.0, epsilon = 1e-4);
        assert_abs_diff_eq!(square[2], 72.0, epsilon = 1e-4);
        assert_abs_diff_eq!(square[3], 72.0, epsilon = 1e-4);

        // ratio 2 boxes are twice as tall as wide
        let tall = &coords[6 * 4..7 * 4];
        assert_abs_diff_eq!(
            (tall[3] - tall[1]) / (tall[2] - tall[0]),
            2.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn grid_anchors_are_shifted_by_stride() {
        let generator = AnchorGenerator::new(16, &[1.0], &[1.0]);
        let anchors = generator.grid_anchors(2, 3, Device::Cpu);
        assert_eq!(anchors.size(), [6, 4]);

        let coords = Vec::<f32>::from(&anchors.view([-1]));
        // the cell at row 1, column 2
        assert_eq!(&coords[5 * 4..6 * 4], &[32.0, 16.0, 48.0, 32.0]);
    }
}
