//! Replacement policies.

pub mod cart;
