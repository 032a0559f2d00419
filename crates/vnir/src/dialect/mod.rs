//! Dialect definitions shipped with the substrate.

pub mod core;
