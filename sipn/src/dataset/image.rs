use super::ImageInfo;
use crate::common::*;
use tch::vision;

const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Computes the resizing scale so that the shorter side equals `target_size`,
/// unless the longer side would exceed `max_size`.
pub fn resize_scale(height: i64, width: i64, target_size: usize, max_size: usize) -> f64 {
    let short = height.min(width) as f64;
    let long = height.max(width) as f64;
    let scale = target_size as f64 / short;

    if (long * scale).round() > max_size as f64 {
        max_size as f64 / long
    } else {
        scale
    }
}

/// Loads an RGB image as a `[1, 3, H, W]` normalized float tensor.
pub fn load_image(
    path: &Path,
    target_size: usize,
    max_size: usize,
    flipped: bool,
) -> Result<(Tensor, ImageInfo)> {
    let image = vision::image::load(path)
        .with_context(|| format!("failed to load image '{}'", path.display()))?;
    let (_c, orig_h, orig_w) = image.size3()?;

    let scale = resize_scale(orig_h, orig_w, target_size, max_size);
    let height = ((orig_h as f64 * scale).round() as i64).max(1);
    let width = ((orig_w as f64 * scale).round() as i64).max(1);
    let image = vision::image::resize(&image, width, height)?;

    let image = normalize(&image);
    let image = if flipped { image.flip(&[2]) } else { image };

    Ok((
        image.unsqueeze(0),
        ImageInfo {
            height,
            width,
            scale,
        },
    ))
}

/// Converts a `[3, H, W]` uint8 image to floats normalized by ImageNet statistics.
fn normalize(image: &Tensor) -> Tensor {
    let device = image.device();
    let mean = Tensor::of_slice(&IMAGENET_MEAN)
        .to_kind(Kind::Float)
        .to_device(device)
        .view([3, 1, 1]);
    let std = Tensor::of_slice(&IMAGENET_STD)
        .to_kind(Kind::Float)
        .to_device(device)
        .view([3, 1, 1]);
    (image.to_kind(Kind::Float) / 255.0 - mean) / std
}
