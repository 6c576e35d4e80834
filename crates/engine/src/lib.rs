//! Template diffing, pixel scheduling and charge arithmetic.
//!
//! Everything here is synchronous and I/O-free: callers fetch live chunks and
//! charge snapshots, this crate decides what to place and when.

pub mod charges;
pub mod diff;
pub mod ledger;
pub mod palette;
pub mod scheduler;
pub mod template;

pub use diff::{ChunkCache, DiffEngine, DiffOptions, DiffResult, WrongPixel};
pub use ledger::{PixelKey, PlacedLedger};
pub use palette::{classify, owned_colors, ColorCache, ColorId};
pub use scheduler::{schedule, ChunkBatch, Schedule};
pub use template::{Template, TileKey, CHUNK_SIZE, STRIDE};

#[cfg(test)]
mod tests;
