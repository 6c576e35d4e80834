//! Umbrella crate for wplacer.
//!
//! Re-exports the engine and protocol crates so downstream code can depend on a
//! single crate name (`wplacer`).

pub use wplacer_engine as engine;
pub use wplacer_protocol as protocol;
