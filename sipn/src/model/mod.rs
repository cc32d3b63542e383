//! The person search model and its building blocks.

mod anchor;
mod config;
mod model;
pub mod module;
mod proposal_target;
mod roi_pool;
mod rpn;
mod sampling;
mod sipn;

pub use self::sipn::*;
pub use anchor::*;
pub use config::*;
pub use model::*;
pub use proposal_target::*;
pub use roi_pool::*;
pub use rpn::*;
pub(crate) use sampling::*;
