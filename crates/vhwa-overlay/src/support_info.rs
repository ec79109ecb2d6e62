//! GL capability probe results and what they allow the overlay to offer.
//!
//! The hosting application probes its GL context once at startup and hands the resulting
//! [`GlCaps`] to the image; nothing here talks to GL.

use serde::{Deserialize, Serialize};
use vhwa_protocol::fourcc::{FOURCC_AYUV, FOURCC_UYVY, FOURCC_YUY2, FOURCC_YV12};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlCaps {
    /// `major << 16 | minor << 8 | release`; 0 if the probe failed.
    pub gl_version: u32,
    pub fragment_shader: bool,
    pub texture_rectangle: bool,
    pub texture_np2: bool,
    pub max_texture_units: u32,
    pub pbo: bool,
    /// Whether pixel-unpack buffers accept non-zero offsets.
    pub pbo_offset: bool,
    pub fbo: bool,
}

impl GlCaps {
    /// A context with every extension the overlay can use.
    pub fn full() -> Self {
        Self {
            gl_version: 2 << 16 | 1 << 8,
            fragment_shader: true,
            texture_rectangle: true,
            texture_np2: true,
            max_texture_units: 8,
            pbo: true,
            pbo_offset: true,
            fbo: true,
        }
    }
}

/// Capability probe plus the FOURCCs the shaders can convert on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VhwaInfo {
    caps: GlCaps,
    fourcc_supported: Vec<u32>,
}

impl VhwaInfo {
    pub fn new(caps: GlCaps) -> Self {
        let mut fourcc_supported = Vec::new();
        if caps.fragment_shader && caps.texture_rectangle {
            fourcc_supported.extend([FOURCC_AYUV, FOURCC_UYVY, FOURCC_YUY2]);
            // One unit per YV12 plane plus the destination for keying.
            if caps.max_texture_units >= 4 {
                fourcc_supported.push(FOURCC_YV12);
            }
        }
        Self {
            caps,
            fourcc_supported,
        }
    }

    pub fn gl(&self) -> &GlCaps {
        &self.caps
    }

    pub fn fourcc_supported(&self) -> &[u32] {
        &self.fourcc_supported
    }

    /// Whether acceleration can be offered at all: destination keying needs shaders and two
    /// texture units, and color conversion needs rectangle textures.
    pub fn is_vhwa_supported(&self) -> bool {
        let caps = &self.caps;
        if caps.gl_version == 0 {
            tracing::info!("2D not supported: GL version not probed");
            return false;
        }
        if !caps.fragment_shader {
            tracing::info!("2D not supported: fragment shaders unavailable");
            return false;
        }
        if caps.max_texture_units < 2 {
            tracing::info!("2D not supported: multitexturing unavailable");
            return false;
        }
        if !caps.texture_rectangle {
            tracing::info!("2D not supported: rectangle textures unavailable");
            return false;
        }
        true
    }
}
