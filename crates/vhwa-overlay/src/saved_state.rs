//! Checkpointing of the surface topology.
//!
//! The image is not serialized directly. Saving writes enough to regenerate the commands that
//! built it; loading turns the stream back into `SURF_CREATE` and `SURF_OVERLAY_UPDATE`
//! commands that the caller replays once the framebuffer exists again.
//!
//! Layout, all fields little-endian:
//!
//! ```text
//! u32 primary_count
//! primary_count x surface
//! if primary_count != 0:
//!     u32 overlay_count
//!     overlay_count x { u32 surface_count, surface_count x surface, overlay }
//!
//! surface: u32 handle, u64 offset, u32 width, u32 height, u32 caps, u32 key_flags,
//!          { u32 lower, u32 upper } per key present (dst blt, src blt, dst overlay, src overlay),
//!          u32 pf_flags, then u32 fourcc or { u32 bpp, u32 r, u32 g, u32 b, u32 a }
//! overlay: u32 flags, u32 primary_handle, u32 overlay_handle,
//!          optional dst key pair, optional src key pair,
//!          i32 left, right, top, bottom of the target, then of the source
//! ```

use std::io::{Read, Write};

use vhwa_protocol::vhwa_cmd::{ColorKeyDesc, OverlayFx, PixelFormatDesc, RectL};
use vhwa_protocol::vhwa_cmd::{SurfOverlayUpdate, SurfaceDesc};
use vhwa_protocol::vhwa_flags::{
    OverlayFlags, PixelFormatFlags, SurfCaps, SurfDescFlags, VHWA_OFFSET64_VOID,
};
use vhwa_protocol::VhwaCommand;
use vhwa_snapshot::{ReadLeExt, Result, SnapshotError, WriteLeExt};

use crate::color::ColorKey;
use crate::display::SurfaceId;
use crate::gl::GlBackend;
use crate::rect::Rect;
use crate::surface::VhwaSurface;
use crate::vhwa_image::VhwaImage;

/// Newest layout this crate writes.
pub const STATE_VERSION: u32 = 3;

/// Version 1 streams wrote `u32::MAX` for "no primaries".
const V1_EMPTY_PRIMARY_COUNT: u32 = u32::MAX;

fn write_key<W: Write>(w: &mut W, key: ColorKey) -> Result<()> {
    w.write_u32_le(key.lower)?;
    w.write_u32_le(key.upper)
}

fn read_key<R: Read>(r: &mut R) -> Result<ColorKeyDesc> {
    Ok(ColorKeyDesc {
        low: r.read_u32_le()?,
        high: r.read_u32_le()?,
    })
}

fn write_rect<W: Write>(w: &mut W, rect: Rect) -> Result<()> {
    let r = rect.to_rectl();
    w.write_i32_le(r.left)?;
    w.write_i32_le(r.right)?;
    w.write_i32_le(r.top)?;
    w.write_i32_le(r.bottom)
}

fn read_rect<R: Read>(r: &mut R) -> Result<RectL> {
    let left = r.read_i32_le()?;
    let right = r.read_i32_le()?;
    let top = r.read_i32_le()?;
    let bottom = r.read_i32_le()?;
    Ok(RectL::new(left, top, right, bottom))
}

impl<G: GlBackend> VhwaImage<G> {
    /// Writes the topology of every guest-visible surface.
    pub fn save_state<W: Write>(&self, w: &mut W) -> Result<()> {
        let display = self.display();
        let primaries = display.primaries().surfaces();
        let vga_owned = display
            .vga()
            .and_then(|v| display.surface(v))
            .is_some_and(|s| s.handle() != 0);
        let mut primary_count = primaries.len() as u32;
        if primary_count != 0 && !vga_owned {
            primary_count -= 1;
        }
        w.write_u32_le(primary_count)?;
        if primary_count == 0 {
            return Ok(());
        }

        let visible = display.primary();
        for &id in primaries {
            let Some(surface) = display.surface(id) else {
                continue;
            };
            if surface.handle() == 0 {
                continue;
            }
            let mut caps = SurfCaps::PRIMARYSURFACE;
            if visible == Some(id) {
                caps |= SurfCaps::VISIBLE;
            }
            self.save_surface(w, id, surface, caps)?;
        }

        w.write_u32_le(display.overlays().len() as u32)?;
        for &list in display.overlays() {
            let Some(list) = display.list(list) else {
                return Err(SnapshotError::Corrupt("overlay list vanished"));
            };
            let count = list.len() as u32;
            let mut caps = SurfCaps::OVERLAY;
            if count > 1 {
                caps |= SurfCaps::COMPLEX;
            }
            w.write_u32_le(count)?;
            for &id in list.surfaces() {
                if let Some(surface) = display.surface(id) {
                    self.save_surface(w, id, surface, caps)?;
                }
            }

            let (shown, visible) = match list.current() {
                Some(current) => (Some(current), true),
                None => (list.first(), false),
            };
            let Some(surface) = shown.and_then(|id| display.surface(id)) else {
                return Err(SnapshotError::Corrupt("empty overlay list"));
            };
            self.save_overlay(w, surface, visible)?;
        }
        Ok(())
    }

    fn save_surface<W: Write>(
        &self,
        w: &mut W,
        id: SurfaceId,
        surface: &VhwaSurface,
        caps: SurfCaps,
    ) -> Result<()> {
        w.write_u32_le(surface.handle())?;
        w.write_u64_le(self.vram_offset(id))?;
        w.write_u32_le(surface.width() as u32)?;
        w.write_u32_le(surface.height() as u32)?;
        w.write_u32_le(caps.bits())?;

        let keys = [
            (SurfDescFlags::CKDESTBLT, surface.dst_blt_key()),
            (SurfDescFlags::CKSRCBLT, surface.src_blt_key()),
            (SurfDescFlags::CKDESTOVERLAY, surface.dst_overlay_key().current()),
            (SurfDescFlags::CKSRCOVERLAY, surface.src_overlay_key().current()),
        ];
        let flags = keys
            .iter()
            .filter(|(_, key)| key.is_some())
            .fold(SurfDescFlags::empty(), |acc, (flag, _)| acc | *flag);
        w.write_u32_le(flags.bits())?;
        for key in keys.iter().filter_map(|(_, key)| *key) {
            write_key(w, key)?;
        }

        let format = surface.format();
        if format.fourcc_code() != 0 {
            w.write_u32_le(PixelFormatFlags::FOURCC.bits())?;
            w.write_u32_le(format.fourcc_code())
        } else {
            w.write_u32_le(PixelFormatFlags::RGB.bits())?;
            w.write_u32_le(format.bits_per_pixel())?;
            w.write_u32_le(format.r().mask())?;
            w.write_u32_le(format.g().mask())?;
            w.write_u32_le(format.b().mask())?;
            w.write_u32_le(format.a().mask())
        }
    }

    fn save_overlay<W: Write>(
        &self,
        w: &mut W,
        surface: &VhwaSurface,
        visible: bool,
    ) -> Result<()> {
        let mut flags = if visible {
            OverlayFlags::SHOW
        } else {
            OverlayFlags::HIDE
        };

        let dst_key = surface.dst_overlay_key();
        let mut saved_dst = None;
        match dst_key.current() {
            None => flags |= OverlayFlags::KEYDEST,
            Some(key) if dst_key.default_key().is_some() => {
                flags |= OverlayFlags::KEYDESTOVERRIDE;
                saved_dst = Some(key);
            }
            Some(_) => {}
        }

        let src_key = surface.src_overlay_key();
        let mut saved_src = None;
        if src_key.is_default() {
            flags |= OverlayFlags::KEYSRC;
        } else if let Some(key) = src_key.current() {
            flags |= OverlayFlags::KEYSRCOVERRIDE;
            saved_src = Some(key);
        }

        let primary_handle = self
            .display()
            .primary()
            .and_then(|p| self.display().surface(p))
            .map_or(0, VhwaSurface::handle);
        w.write_u32_le(flags.bits())?;
        w.write_u32_le(primary_handle)?;
        w.write_u32_le(surface.handle())?;
        for key in [saved_dst, saved_src].into_iter().flatten() {
            write_key(w, key)?;
        }
        write_rect(w, surface.targ_rect())?;
        write_rect(w, surface.src_rect())
    }
}

/// Reads a stream written by [`VhwaImage::save_state`] at `version` and returns the commands
/// that rebuild it, starting with `Enable`.
pub fn load_state<R: Read>(r: &mut R, version: u32) -> Result<Vec<VhwaCommand>> {
    if version > STATE_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: version,
            newest: STATE_VERSION,
        });
    }

    let mut cmds = vec![VhwaCommand::Enable];
    let mut primary_count = r.read_u32_le()?;
    if version == 1 && primary_count == V1_EMPTY_PRIMARY_COUNT {
        primary_count = 0;
    }
    if primary_count == 0 {
        return Ok(cmds);
    }

    for _ in 0..primary_count {
        cmds.push(VhwaCommand::SurfCreate(load_surface(r, 0)?));
    }
    let overlay_count = r.read_u32_le()?;
    for _ in 0..overlay_count {
        let surface_count = r.read_u32_le()?;
        if surface_count == 0 {
            return Err(SnapshotError::Corrupt("overlay without surfaces"));
        }
        for _ in 0..surface_count {
            cmds.push(VhwaCommand::SurfCreate(load_surface(r, surface_count - 1)?));
        }
        cmds.push(VhwaCommand::SurfOverlayUpdate(load_overlay(r)?));
    }
    tracing::debug!(version, commands = cmds.len(), "vhwa state loaded");
    Ok(cmds)
}

fn load_surface<R: Read>(r: &mut R, back_buffers: u32) -> Result<SurfaceDesc> {
    let mut desc = SurfaceDesc {
        handle: u64::from(r.read_u32_le()?),
        offset: r.read_u64_le()?,
        width: r.read_u32_le()?,
        height: r.read_u32_le()?,
        surf_caps: SurfCaps::from_bits_retain(r.read_u32_le()?),
        flags: SurfDescFlags::from_bits_retain(r.read_u32_le()?),
        ..SurfaceDesc::default()
    };
    if desc.flags.contains(SurfDescFlags::CKDESTBLT) {
        desc.dst_blt_ck = read_key(r)?;
    }
    if desc.flags.contains(SurfDescFlags::CKSRCBLT) {
        desc.src_blt_ck = read_key(r)?;
    }
    if desc.flags.contains(SurfDescFlags::CKDESTOVERLAY) {
        desc.dst_overlay_ck = read_key(r)?;
    }
    if desc.flags.contains(SurfDescFlags::CKSRCOVERLAY) {
        desc.src_overlay_ck = read_key(r)?;
    }

    let pf_flags = PixelFormatFlags::from_bits_retain(r.read_u32_le()?);
    desc.pixel_format = if pf_flags.contains(PixelFormatFlags::RGB) {
        PixelFormatDesc {
            flags: pf_flags,
            fourcc: 0,
            bit_count: r.read_u32_le()?,
            r_mask: r.read_u32_le()?,
            g_mask: r.read_u32_le()?,
            b_mask: r.read_u32_le()?,
            a_mask: r.read_u32_le()?,
        }
    } else if pf_flags.contains(PixelFormatFlags::FOURCC) {
        PixelFormatDesc {
            flags: pf_flags,
            ..PixelFormatDesc::fourcc(r.read_u32_le()?)
        }
    } else {
        return Err(SnapshotError::Corrupt("surface pixel format"));
    };

    if back_buffers != 0 {
        desc.back_buffers = back_buffers;
        desc.surf_caps |= SurfCaps::COMPLEX;
    }
    Ok(desc)
}

fn load_overlay<R: Read>(r: &mut R) -> Result<SurfOverlayUpdate> {
    let flags = OverlayFlags::from_bits_retain(r.read_u32_le()?);
    let dst_handle = u64::from(r.read_u32_le()?);
    let src_handle = u64::from(r.read_u32_le()?);
    let mut fx = OverlayFx::default();
    if flags.contains(OverlayFlags::KEYDESTOVERRIDE) {
        fx.dst_ck = read_key(r)?;
    }
    if flags.contains(OverlayFlags::KEYSRCOVERRIDE) {
        fx.src_ck = read_key(r)?;
    }
    let dst_rect = read_rect(r)?;
    let src_rect = read_rect(r)?;
    Ok(SurfOverlayUpdate {
        dst_handle,
        dst_offset: VHWA_OFFSET64_VOID,
        dst_rect,
        src_handle,
        src_offset: VHWA_OFFSET64_VOID,
        src_rect,
        flags,
        updated_src_mem: None,
        fx,
    })
}
