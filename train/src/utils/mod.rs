//! Misc utilities.

mod checkpoint;
mod device;
mod lr_scheduler;
mod optimizer;

pub use checkpoint::*;
pub use device::*;
pub use lr_scheduler::*;
pub use optimizer::*;
