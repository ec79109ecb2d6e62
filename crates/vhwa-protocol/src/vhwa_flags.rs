//! Capability, surface and overlay flag sets.
//!
//! Values are the DirectDraw-derived bits the guest driver was compiled against. Decoders use
//! `from_bits_retain` so bits the host does not model survive a decode/encode pass untouched.

use bitflags::bitflags;

/// Protocol version the guest must report in `QUERY_INFO1` for acceleration to be enabled.
pub const VHWA_VERSION_MAJ: u32 = 0;
pub const VHWA_VERSION_MIN: u32 = 0;
pub const VHWA_VERSION_BLD: u32 = 1;
pub const VHWA_VERSION_RSV: u32 = 0;

pub const VHWA_CFG_ENABLED: u32 = 0x0000_0001;

/// Offset value meaning "not backed by VRAM".
pub const VHWA_OFFSET64_VOID: u64 = u64::MAX;
pub const VHWA_SURFHANDLE_INVALID: u64 = 0;

/// Largest width or height of any surface.
pub const VHWA_MAX_SURFACE_DIM: u32 = 4096;
/// Handle table capacity; also the bound on back buffers per overlay.
pub const VHWA_MAX_SURFACES: u32 = 128;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Caps: u32 {
        const BLT = 0x0000_0040;
        const BLTQUEUE = 0x0000_0080;
        const BLTFOURCC = 0x0000_0100;
        const BLTSTRETCH = 0x0000_0200;
        const OVERLAY = 0x0000_0800;
        const OVERLAYCANTCLIP = 0x0000_1000;
        const OVERLAYFOURCC = 0x0000_2000;
        const OVERLAYSTRETCH = 0x0000_4000;
        const COLORKEY = 0x0040_0000;
        const COLORKEYHWASSIST = 0x0100_0000;
        const BLTCOLORFILL = 0x0400_0000;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Caps2: u32 {
        const WIDESURFACES = 0x0000_1000;
        const COPYFOURCC = 0x0000_8000;
        const CANRENDERWINDOWED = 0x0008_0000;
    }
}

bitflags! {
    /// `SCAPS_*`: what a surface is.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SurfCaps: u32 {
        const BACKBUFFER = 0x0000_0004;
        const COMPLEX = 0x0000_0008;
        const FLIP = 0x0000_0010;
        const FRONTBUFFER = 0x0000_0020;
        const OFFSCREENPLAIN = 0x0000_0040;
        const OVERLAY = 0x0000_0080;
        const PRIMARYSURFACE = 0x0000_0200;
        const VIDEOMEMORY = 0x0000_4000;
        const VISIBLE = 0x0000_8000;
        const LOCALVIDMEM = 0x1000_0000;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PixelFormatFlags: u32 {
        const FOURCC = 0x0000_0004;
        const RGB = 0x0000_0040;
        const RGBTOYUV = 0x0000_0100;
        const YUV = 0x0000_0200;
    }
}

bitflags! {
    /// `SD_*`: which fields of a surface description are meaningful.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SurfDescFlags: u32 {
        const CAPS = 0x0000_0001;
        const HEIGHT = 0x0000_0002;
        const WIDTH = 0x0000_0004;
        const PITCH = 0x0000_0008;
        const BACKBUFFERCOUNT = 0x0000_0020;
        const PIXELFORMAT = 0x0000_1000;
        const CKDESTOVERLAY = 0x0000_2000;
        const CKDESTBLT = 0x0000_4000;
        const CKSRCOVERLAY = 0x0000_8000;
        const CKSRCBLT = 0x0001_0000;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ColorKeyCaps: u32 {
        const DESTBLT = 0x0000_0001;
        const DESTBLTCLRSPACE = 0x0000_0002;
        const DESTBLTCLRSPACEYUV = 0x0000_0004;
        const DESTBLTYUV = 0x0000_0008;
        const DESTOVERLAY = 0x0000_0010;
        const DESTOVERLAYCLRSPACE = 0x0000_0020;
        const DESTOVERLAYCLRSPACEYUV = 0x0000_0040;
        const DESTOVERLAYONEACTIVE = 0x0000_0080;
        const DESTOVERLAYYUV = 0x0000_0100;
        const SRCBLT = 0x0000_0200;
    }
}

bitflags! {
    /// `CKEY_*`: which key a `SURF_COLORKEY_SET` updates.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ColorKeyFlags: u32 {
        const COLORSPACE = 0x0000_0001;
        const DESTBLT = 0x0000_0002;
        const DESTOVERLAY = 0x0000_0004;
        const SRCBLT = 0x0000_0008;
        const SRCOVERLAY = 0x0000_0010;
    }
}

bitflags! {
    /// `OVER_*`: overlay update flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct OverlayFlags: u32 {
        const HIDE = 0x0000_0200;
        const KEYDEST = 0x0000_0400;
        const KEYDESTOVERRIDE = 0x0000_0800;
        const KEYSRC = 0x0000_1000;
        const KEYSRCOVERRIDE = 0x0000_2000;
        const SHOW = 0x0000_4000;
    }
}
