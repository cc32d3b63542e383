use crate::common::*;

#[derive(Debug, Clone)]
pub struct ConvBn2DInit {
    pub in_c: usize,
    pub out_c: usize,
    pub k: usize,
    pub s: usize,
    pub p: usize,
    pub relu: bool,
}

impl ConvBn2DInit {
    pub fn new(in_c: usize, out_c: usize, k: usize) -> Self {
        Self {
            in_c,
            out_c,
            k,
            s: 1,
            p: k / 2,
            relu: true,
        }
    }

    /// Builds the layer with convolution and batch norm weights placed at
    /// separate paths, following the torchvision naming of ResNet weights.
    pub fn build<'p, P1, P2>(self, conv_path: P1, bn_path: P2) -> ConvBn2D
    where
        P1: Borrow<nn::Path<'p>>,
        P2: Borrow<nn::Path<'p>>,
    {
        let Self {
            in_c,
            out_c,
            k,
            s,
            p,
            relu,
        } = self;

        let conv = nn::conv2d(
            conv_path.borrow(),
            in_c as i64,
            out_c as i64,
            k as i64,
            nn::ConvConfig {
                stride: s as i64,
                padding: p as i64,
                bias: false,
                ..Default::default()
            },
        );
        let bn = nn::batch_norm2d(bn_path.borrow(), out_c as i64, Default::default());

        ConvBn2D { conv, bn, relu }
    }
}

/// Convolution followed by batch norm and an optional ReLU.
#[derive(Debug)]
pub struct ConvBn2D {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
    relu: bool,
}

impl nn::ModuleT for ConvBn2D {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs.apply(&self.conv).apply_t(&self.bn, train);
        if self.relu {
            xs.relu()
        } else {
            xs
        }
    }
}
