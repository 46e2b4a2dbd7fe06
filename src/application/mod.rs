//! Application services over the hosted store.

pub mod cart;
pub mod delivery;
pub mod error;
pub mod favorites;
pub mod messaging;
pub mod orders;
pub mod products;
pub mod repos;
pub mod session;
pub mod stock_cap;
