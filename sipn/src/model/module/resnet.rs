use super::{ConvBn2D, ConvBn2DInit};
use crate::{common::*, model::ResNetKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Basic,
    Bottleneck,
}

impl BlockKind {
    fn expansion(&self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Bottleneck => 4,
        }
    }
}

impl ResNetKind {
    fn layout(&self) -> (BlockKind, [usize; 4]) {
        match self {
            Self::Res18 => (BlockKind::Basic, [2, 2, 2, 2]),
            Self::Res34 => (BlockKind::Basic, [3, 4, 6, 3]),
            Self::Res50 => (BlockKind::Bottleneck, [3, 4, 6, 3]),
            Self::Res101 => (BlockKind::Bottleneck, [3, 4, 23, 3]),
        }
    }
}

/// A residual block.
#[derive(Debug)]
struct ResBlock {
    convs: Vec<ConvBn2D>,
    downsample: Option<ConvBn2D>,
}

impl ResBlock {
    fn new(
        path: &nn::Path,
        kind: BlockKind,
        in_c: usize,
        width: usize,
        stride: usize,
    ) -> (Self, usize) {
        let out_c = width * kind.expansion();

        let convs = match kind {
            BlockKind::Basic => vec![
                ConvBn2DInit {
                    s: stride,
                    ..ConvBn2DInit::new(in_c, width, 3)
                }
                .build(path / "conv1", path / "bn1"),
                ConvBn2DInit {
                    relu: false,
                    ..ConvBn2DInit::new(width, out_c, 3)
                }
                .build(path / "conv2", path / "bn2"),
            ],
            BlockKind::Bottleneck => vec![
                ConvBn2DInit::new(in_c, width, 1).build(path / "conv1", path / "bn1"),
                ConvBn2DInit {
                    s: stride,
                    ..ConvBn2DInit::new(width, width, 3)
                }
                .build(path / "conv2", path / "bn2"),
                ConvBn2DInit {
                    relu: false,
                    ..ConvBn2DInit::new(width, out_c, 1)
                }
                .build(path / "conv3", path / "bn3"),
            ],
        };

        let downsample = (stride != 1 || in_c != out_c).then(|| {
            let downsample = path / "downsample";
            ConvBn2DInit {
                s: stride,
                p: 0,
                relu: false,
                ..ConvBn2DInit::new(in_c, out_c, 1)
            }
            .build(&downsample / 0, &downsample / 1)
        });

        (Self { convs, downsample }, out_c)
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let shortcut = match &self.downsample {
            Some(downsample) => downsample.forward_t(xs, train),
            None => xs.shallow_clone(),
        };
        let ys = self
            .convs
            .iter()
            .fold(xs.shallow_clone(), |ys, conv| conv.forward_t(&ys, train));
        (ys + shortcut).relu()
    }
}

#[derive(Debug)]
struct ResLayer {
    blocks: Vec<ResBlock>,
}

impl ResLayer {
    fn new(
        path: &nn::Path,
        kind: BlockKind,
        in_c: usize,
        width: usize,
        num_blocks: usize,
        stride: usize,
    ) -> (Self, usize) {
        let mut in_c = in_c;
        let blocks = (0..num_blocks)
            .map(|index| {
                let stride = if index == 0 { stride } else { 1 };
                let (block, out_c) = ResBlock::new(&(path / index), kind, in_c, width, stride);
                in_c = out_c;
                block
            })
            .collect();
        (Self { blocks }, in_c)
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.blocks
            .iter()
            .fold(xs.shallow_clone(), |xs, block| block.forward_t(&xs, train))
    }
}

/// The ResNet backbone split into a trunk (stem to `layer3`, stride 16)
/// and a head (`layer4` with global average pooling) applied on pooled regions.
///
/// Weights are named after the torchvision layout, so that converted
/// ImageNet checkpoints can be loaded partially.
#[derive(Debug)]
pub struct ResNet {
    stem: ConvBn2D,
    trunk: Vec<ResLayer>,
    head: ResLayer,
    trunk_channels: usize,
    head_channels: usize,
}

impl ResNet {
    pub fn new<'p>(path: impl Borrow<nn::Path<'p>>, kind: ResNetKind) -> Self {
        let path = path.borrow();
        let (block_kind, [n1, n2, n3, n4]) = kind.layout();

        let stem = ConvBn2DInit {
            s: 2,
            ..ConvBn2DInit::new(3, 64, 7)
        }
        .build(path / "conv1", path / "bn1");

        let (layer1, c1) = ResLayer::new(&(path / "layer1"), block_kind, 64, 64, n1, 1);
        let (layer2, c2) = ResLayer::new(&(path / "layer2"), block_kind, c1, 128, n2, 2);
        let (layer3, c3) = ResLayer::new(&(path / "layer3"), block_kind, c2, 256, n3, 2);
        let (layer4, c4) = ResLayer::new(&(path / "layer4"), block_kind, c3, 512, n4, 2);

        Self {
            stem,
            trunk: vec![layer1, layer2, layer3],
            head: layer4,
            trunk_channels: c3,
            head_channels: c4,
        }
    }

    /// The number of channels of trunk feature maps.
    pub fn trunk_channels(&self) -> usize {
        self.trunk_channels
    }

    /// The length of head output vectors.
    pub fn head_channels(&self) -> usize {
        self.head_channels
    }

    /// Maps `[B, 3, H, W]` images to `[B, C, H/16, W/16]` feature maps.
    pub fn forward_trunk(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = self
            .stem
            .forward_t(xs, train)
            .max_pool2d(&[3, 3], &[2, 2], &[1, 1], &[1, 1], false);
        self.trunk
            .iter()
            .fold(xs, |xs, layer| layer.forward_t(&xs, train))
    }

    /// Maps `[R, C, P, P]` pooled regions to `[R, C']` vectors.
    pub fn forward_head(&self, xs: &Tensor, train: bool) -> Tensor {
        self.head
            .forward_t(xs, train)
            .adaptive_avg_pool2d(&[1, 1])
            .flatten(1, -1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resnet18_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let resnet = ResNet::new(&vs.root(), ResNetKind::Res18);
        assert_eq!(resnet.trunk_channels(), 256);
        assert_eq!(resnet.head_channels(), 512);

        let image = Tensor::rand(&[1, 3, 64, 96], (Kind::Float, Device::Cpu));
        let features = resnet.forward_trunk(&image, false);
        assert_eq!(features.size(), [1, 256, 4, 6]);

        let pooled = Tensor::rand(&[3, 256, 14, 14], (Kind::Float, Device::Cpu));
        assert_eq!(resnet.forward_head(&pooled, false).size(), [3, 512]);
    }

    #[test]
    fn torchvision_variable_names() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _resnet = ResNet::new(&vs.root(), ResNetKind::Res50);
        let variables = vs.variables();

        for name in [
            "conv1.weight",
            "bn1.running_mean",
            "layer1.0.conv3.weight",
            "layer1.0.downsample.0.weight",
            "layer3.5.bn2.bias",
            "layer4.2.conv1.weight",
        ] {
            assert!(variables.contains_key(name), "missing variable {}", name);
        }
    }
}
