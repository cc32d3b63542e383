//! Model components.

mod conv_bn_2d;
mod resnet;

pub use conv_bn_2d::*;
pub use resnet::*;
