//! Bounding box operations on `[N, 4]` tensors in `(x1, y1, x2, y2)` pixel units.

use crate::common::*;

/// The upper bound of log-scale size deltas, which is `ln(1000 / 16)`.
const MAX_LOG_SCALE: f64 = 4.135_166_556_742_356;

/// Computes the area of each box.
pub fn box_area(boxes: &Tensor) -> Tensor {
    let w = (boxes.select(1, 2) - boxes.select(1, 0)).clamp_min(0.0);
    let h = (boxes.select(1, 3) - boxes.select(1, 1)).clamp_min(0.0);
    w * h
}

/// Computes pairwise IoU of `[N, 4]` and `[M, 4]` boxes, producing a `[N, M]` tensor.
pub fn box_iou(lhs: &Tensor, rhs: &Tensor) -> Tensor {
    let lhs_area = box_area(lhs);
    let rhs_area = box_area(rhs);

    let lt = lhs
        .i((.., 0..2))
        .unsqueeze(1)
        .maximum(&rhs.i((.., 0..2)).unsqueeze(0));
    let rb = lhs
        .i((.., 2..4))
        .unsqueeze(1)
        .minimum(&rhs.i((.., 2..4)).unsqueeze(0));
    let wh = (rb - lt).clamp_min(0.0);
    let inter = wh.select(2, 0) * wh.select(2, 1);
    let union = lhs_area.unsqueeze(1) + rhs_area.unsqueeze(0) - &inter;

    inter / union.clamp_min(1e-8)
}

/// Splits boxes into `(cx, cy, w, h)` columns.
fn center_size(boxes: &Tensor) -> (Tensor, Tensor, Tensor, Tensor) {
    let x1 = boxes.select(1, 0);
    let y1 = boxes.select(1, 1);
    let w = (boxes.select(1, 2) - &x1).clamp_min(1e-3);
    let h = (boxes.select(1, 3) - &y1).clamp_min(1e-3);
    let cx = x1 + &w * 0.5;
    let cy = y1 + &h * 0.5;
    (cx, cy, w, h)
}

/// Computes the `(dx, dy, dw, dh)` regression deltas that move `src` boxes onto `dst` boxes.
pub fn encode_deltas(src: &Tensor, dst: &Tensor) -> Tensor {
    let (src_cx, src_cy, src_w, src_h) = center_size(src);
    let (dst_cx, dst_cy, dst_w, dst_h) = center_size(dst);

    let dx = (dst_cx - src_cx) / &src_w;
    let dy = (dst_cy - src_cy) / &src_h;
    let dw = (dst_w / src_w).log();
    let dh = (dst_h / src_h).log();

    Tensor::stack(&[dx, dy, dw, dh], 1)
}

/// Applies `(dx, dy, dw, dh)` deltas on boxes. It is the inverse of [encode_deltas].
pub fn decode_deltas(boxes: &Tensor, deltas: &Tensor) -> Tensor {
    let (cx, cy, w, h) = center_size(boxes);

    let dx = deltas.select(1, 0);
    let dy = deltas.select(1, 1);
    let dw = deltas.select(1, 2).clamp_max(MAX_LOG_SCALE);
    let dh = deltas.select(1, 3).clamp_max(MAX_LOG_SCALE);

    let pred_cx = dx * &w + cx;
    let pred_cy = dy * &h + cy;
    let pred_w = dw.exp() * w;
    let pred_h = dh.exp() * h;

    Tensor::stack(
        &[
            &pred_cx - &pred_w * 0.5,
            &pred_cy - &pred_h * 0.5,
            &pred_cx + &pred_w * 0.5,
            &pred_cy + &pred_h * 0.5,
        ],
        1,
    )
}

/// Clamps boxes into the `[0, width] x [0, height]` image region.
pub fn clip_boxes(boxes: &Tensor, height: f64, width: f64) -> Tensor {
    Tensor::stack(
        &[
            boxes.select(1, 0).clamp(0.0, width),
            boxes.select(1, 1).clamp(0.0, height),
            boxes.select(1, 2).clamp(0.0, width),
            boxes.select(1, 3).clamp(0.0, height),
        ],
        1,
    )
}

/// Greedy non-maximum suppression.
///
/// It returns the indexes of kept boxes ordered by descending score.
/// The computation runs on CPU.
pub fn nms(boxes: &Tensor, scores: &Tensor, iou_threshold: f64) -> Vec<i64> {
    let coords = Vec::<f32>::from(&boxes.to_device(Device::Cpu).to_kind(Kind::Float).view([-1]));
    let scores = Vec::<f32>::from(&scores.to_device(Device::Cpu).to_kind(Kind::Float).view([-1]));
    let iou_threshold = iou_threshold as f32;

    let area = |index: usize| {
        let [x1, y1, x2, y2] = [
            coords[index * 4],
            coords[index * 4 + 1],
            coords[index * 4 + 2],
            coords[index * 4 + 3],
        ];
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    };
    let iou = |lhs: usize, rhs: usize| {
        let l = coords[lhs * 4].max(coords[rhs * 4]);
        let t = coords[lhs * 4 + 1].max(coords[rhs * 4 + 1]);
        let r = coords[lhs * 4 + 2].min(coords[rhs * 4 + 2]);
        let b = coords[lhs * 4 + 3].min(coords[rhs * 4 + 3]);
        let inter = (r - l).max(0.0) * (b - t).max(0.0);
        inter / (area(lhs) + area(rhs) - inter + 1e-8)
    };

    let order: Vec<usize> = (0..scores.len())
        .sorted_by(|&lhs, &rhs| scores[rhs].total_cmp(&scores[lhs]))
        .collect();
    let mut suppressed = vec![false; scores.len()];
    let mut keep = vec![];

    for (nth, &index) in order.iter().enumerate() {
        if suppressed[index] {
            continue;
        }
        keep.push(index as i64);

        for &other in &order[(nth + 1)..] {
            if !suppressed[other] && iou(index, other) > iou_threshold {
                suppressed[other] = true;
            }
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn iou_of_overlapping_boxes() {
        let lhs = Tensor::of_slice(&[0f32, 0.0, 10.0, 10.0, 0.0, 0.0, 2.0, 2.0]).view([2, 4]);
        let rhs = Tensor::of_slice(&[5f32, 0.0, 15.0, 10.0, 0.0, 0.0, 10.0, 10.0]).view([2, 4]);
        let iou = Vec::<f32>::from(&box_iou(&lhs, &rhs).view([-1]));

        assert_abs_diff_eq!(iou[0], 50.0 / 150.0, epsilon = 1e-6);
        assert_abs_diff_eq!(iou[1], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(iou[2], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(iou[3], 0.04, epsilon = 1e-6);
    }

    #[test]
    fn decoding_inverts_encoding() {
        let anchors = Tensor::of_slice(&[10f32, 20.0, 50.0, 80.0, 0.0, 0.0, 16.0, 16.0]).view([2, 4]);
        let targets = Tensor::of_slice(&[12f32, 18.0, 60.0, 70.0, 4.0, 2.0, 10.0, 30.0]).view([2, 4]);

        let deltas = encode_deltas(&anchors, &targets);
        let decoded = decode_deltas(&anchors, &deltas);
        let diff = f64::from(&(decoded - targets).abs().max());

        assert!(diff < 1e-3, "decoded boxes differ by {}", diff);
    }

    #[test]
    fn clip_boxes_to_image() {
        let boxes = Tensor::of_slice(&[-5f32, -1.0, 120.0, 40.0]).view([1, 4]);
        let clipped = Vec::<f32>::from(&clip_boxes(&boxes, 30.0, 100.0).view([-1]));
        assert_eq!(clipped, vec![0.0, 0.0, 100.0, 30.0]);
    }

    #[test]
    fn nms_suppresses_overlaps() {
        let boxes = Tensor::of_slice(&[
            0f32, 0.0, 10.0, 10.0, //
            1.0, 1.0, 11.0, 11.0, //
            20.0, 20.0, 30.0, 30.0, //
            0.0, 0.0, 9.0, 10.0,
        ])
        .view([4, 4]);
        let scores = Tensor::of_slice(&[0.5f32, 0.9, 0.3, 0.1]);

        let keep = nms(&boxes, &scores, 0.5);
        assert_eq!(keep, vec![1, 2]);
    }
}
