//! Model configuration format.

use crate::common::*;
use strum::{AsRefStr, EnumString};

/// The ResNet variant of the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
pub enum ResNetKind {
    #[strum(serialize = "res18")]
    #[serde(rename = "res18")]
    Res18,
    #[strum(serialize = "res34")]
    #[serde(rename = "res34")]
    Res34,
    #[strum(serialize = "res50")]
    #[serde(rename = "res50")]
    Res50,
    #[strum(serialize = "res101")]
    #[serde(rename = "res101")]
    Res101,
}

/// The SIPN model options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SipnConfig {
    /// The dimension of re-identification embeddings.
    pub feature_dim: usize,
    /// If set, batch norm layers update running statistics during training.
    pub bn_train: bool,
    pub rpn: RpnConfig,
    pub roi: RoiConfig,
}

impl Default for SipnConfig {
    fn default() -> Self {
        Self {
            feature_dim: 256,
            bn_train: false,
            rpn: Default::default(),
            roi: Default::default(),
        }
    }
}

/// Region proposal network options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpnConfig {
    /// Anchor sizes in multiples of the feature stride.
    pub anchor_scales: Vec<R64>,
    /// Anchor height/width ratios.
    pub anchor_ratios: Vec<R64>,
    pub hidden_channels: usize,
    /// Anchors above this IoU are positive.
    pub positive_iou: R64,
    /// Anchors below this IoU are negative.
    pub negative_iou: R64,
    /// The number of sampled anchors per image.
    pub batch_size: usize,
    /// The maximum ratio of positives among sampled anchors.
    pub positive_fraction: R64,
    pub pre_nms_top_n: usize,
    pub post_nms_top_n: usize,
    pub nms_iou: R64,
    /// The minimum proposal size in pixels of the original image.
    pub min_size: R64,
    pub box_loss_beta: R64,
}

impl Default for RpnConfig {
    fn default() -> Self {
        Self {
            anchor_scales: vec![r64(8.0), r64(16.0), r64(32.0)],
            anchor_ratios: vec![r64(0.5), r64(1.0), r64(2.0)],
            hidden_channels: 512,
            positive_iou: r64(0.7),
            negative_iou: r64(0.3),
            batch_size: 256,
            positive_fraction: r64(0.5),
            pre_nms_top_n: 6000,
            post_nms_top_n: 2000,
            nms_iou: r64(0.7),
            min_size: r64(16.0),
            box_loss_beta: r64(1.0 / 9.0),
        }
    }
}

/// Options of the ROI head.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    /// The output size of ROI pooling.
    pub pool_size: usize,
    /// The number of sampled ROIs per image.
    pub batch_size: usize,
    /// The maximum ratio of foreground ROIs.
    pub fg_fraction: R64,
    /// ROIs above this IoU are foreground.
    pub fg_iou: R64,
    /// ROIs within `[bg_iou_lo, bg_iou_hi)` are background.
    pub bg_iou_hi: R64,
    pub bg_iou_lo: R64,
    /// Normalizing factors of regression targets.
    pub bbox_stds: [R64; 4],
    pub box_loss_beta: R64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            pool_size: 14,
            batch_size: 128,
            fg_fraction: r64(0.5),
            fg_iou: r64(0.5),
            bg_iou_hi: r64(0.5),
            bg_iou_lo: r64(0.0),
            bbox_stds: [r64(0.1), r64(0.1), r64(0.2), r64(0.2)],
            box_loss_beta: r64(1.0),
        }
    }
}

impl RpnConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            !self.anchor_scales.is_empty() && !self.anchor_ratios.is_empty(),
            "anchor_scales and anchor_ratios must not be empty"
        );
        ensure!(
            self.anchor_scales.iter().chain(&self.anchor_ratios).all(|&v| v > 0.0),
            "anchor scales and ratios must be positive"
        );
        ensure!(
            self.negative_iou <= self.positive_iou,
            "negative_iou must not exceed positive_iou"
        );
        ensure!(
            (0.0..=1.0).contains(&self.positive_fraction.raw()),
            "positive_fraction must be in range [0, 1]"
        );
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.post_nms_top_n > 0, "post_nms_top_n must be positive");
        Ok(())
    }
}

impl RoiConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(self.pool_size > 0, "pool_size must be positive");
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.fg_fraction.raw()),
            "fg_fraction must be in range [0, 1]"
        );
        ensure!(
            self.bg_iou_lo <= self.bg_iou_hi,
            "bg_iou_lo must not exceed bg_iou_hi"
        );
        ensure!(
            self.bbox_stds.iter().all(|&std| std > 0.0),
            "bbox_stds must be positive"
        );
        Ok(())
    }
}
