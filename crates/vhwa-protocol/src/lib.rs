//! Guest/host contract for video hardware acceleration (VHWA) commands.
//!
//! Commands live in guest VRAM as a fixed [`vhwa_cmd::VhwaCmdHdr`] followed by a type-specific
//! body. Everything here is packed little-endian; host code decodes a body once at the transport
//! boundary into an owned [`VhwaCommand`] and writes outputs back with [`VhwaReply`].

#![forbid(unsafe_code)]

mod le;

pub mod fourcc;
pub mod status;
pub mod vhwa_cmd;
pub mod vhwa_flags;

pub use status::{VhwaError, VhwaResult};
pub use vhwa_cmd::{VhwaCmdHdr, VhwaCmdType, VhwaCommand, VhwaReply};
