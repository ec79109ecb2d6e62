//! Host-side surface model and GL compositor for VHWA overlays.
//!
//! The crate is split in two layers:
//! - the surface model: [`VhwaImage`] owns every guest surface, grouped by [`display::Display`]
//!   into the primary list and overlay lists, and executes decoded VHWA commands against it.
//! - the renderer: surfaces upload their memory into textures and draw through a [`GlBackend`],
//!   using per-format shader programs for color conversion and color keying.
//!
//! Nothing here touches a real GL context. The embedder supplies a [`GlBackend`] bound to the
//! current context; [`RecordingGl`] records calls instead and backs the tests.

#![forbid(unsafe_code)]

pub mod color;
pub mod dirty_rect;
pub mod display;
pub mod gl;
pub mod handle_table;
pub mod program;
pub mod rect;
pub mod saved_state;
pub mod settings;
mod shaders;
pub mod support_info;
pub mod surface;
pub mod texture;
pub mod texture_image;
pub mod vhwa_image;
pub mod vram;

pub use color::{ColorFormat, ColorKey};
pub use dirty_rect::DirtyRect;
pub use gl::{GlBackend, GlError, RecordingGl};
pub use rect::Rect;
pub use saved_state::{load_state, STATE_VERSION};
pub use settings::VhwaSettings;
pub use support_info::{GlCaps, VhwaInfo};
pub use vhwa_image::{FramebufferFormat, FramebufferInfo, VhwaImage};
pub use vram::{SharedVram, VecVram, Vram, VramError};
