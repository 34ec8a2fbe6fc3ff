//! # Neural Network Layer Modules

pub mod linear;
pub use linear::Linear;

pub mod activation;
pub use activation::ReLU;
