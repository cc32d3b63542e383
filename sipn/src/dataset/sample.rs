use crate::common::*;

/// The geometry of a loaded image after resizing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub height: i64,
    pub width: i64,
    /// The ratio from original pixel units to resized pixel units.
    pub scale: f64,
}

/// A query image with the box of the searched identity.
#[derive(Debug, TensorLike)]
pub struct QuerySample {
    /// `[1, 3, H, W]` normalized image.
    pub image: Tensor,
    /// `[1, 4]` box in `(x1, y1, x2, y2)` resized pixel units.
    pub roi: Tensor,
    #[tensor_like(clone)]
    pub info: ImageInfo,
}

/// A gallery image with all annotated boxes.
#[derive(Debug, TensorLike)]
pub struct GallerySample {
    /// `[1, 3, H, W]` normalized image.
    pub image: Tensor,
    /// `[G, 4]` boxes in `(x1, y1, x2, y2)` resized pixel units.
    pub gt_boxes: Tensor,
    /// `[G]` identity labels. Unlabeled persons carry the sentinel `num_pid`.
    pub gt_pids: Tensor,
    #[tensor_like(clone)]
    pub info: ImageInfo,
}
