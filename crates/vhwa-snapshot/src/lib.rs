//! Checkpoint stream primitives shared by the VHWA image and the command queue.
//!
//! Records are flat little-endian fields with no framing; each writer documents its own layout
//! and readers must consume exactly the same sequence.

#![forbid(unsafe_code)]

pub mod error;
pub mod io;

pub use error::{Result, SnapshotError};
pub use io::{ReadLeExt, WriteLeExt};
