//! # Utility Functions (`utils`)
//!
//! Checkpoint serialization and seeded randomness.

pub mod seed;
pub mod serialization;

pub use seed::Seeder;
pub use serialization::{load, save, SerializationError};
