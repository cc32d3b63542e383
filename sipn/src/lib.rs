//! The building blocks of the person search network.

mod common;
pub mod boxes;
pub mod dataset;
pub mod loss;
pub mod model;
