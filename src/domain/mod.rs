//! Domain layer types and invariants.

pub mod cart;
pub mod delivery;
pub mod entities;
pub mod error;
pub mod types;
