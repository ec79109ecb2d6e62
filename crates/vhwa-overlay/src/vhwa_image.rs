//! The VHWA image: every surface the guest created, the GL objects behind them, and the
//! command handlers that mutate both.
//!
//! A [`VhwaImage`] lives on the render thread. Commands reach it already decoded; each handler
//! returns the reply the guest will see or the status code to report.

use vhwa_protocol::fourcc::fourcc_name;
use vhwa_protocol::vhwa_cmd::{
    ColorKeyDesc, QueryInfo1, QueryInfo1Out, QueryInfo2, SurfCanCreate, SurfColorkeySet,
    SurfDestroy, SurfFlip, SurfLock, SurfOverlaySetPosition, SurfOverlayUpdate, SurfUnlock,
    SurfaceDesc, VhwaVersion,
};
use vhwa_protocol::vhwa_flags::{
    Caps, Caps2, ColorKeyCaps, ColorKeyFlags, OverlayFlags, PixelFormatFlags, SurfCaps,
    SurfDescFlags, VHWA_CFG_ENABLED, VHWA_MAX_SURFACES, VHWA_MAX_SURFACE_DIM, VHWA_OFFSET64_VOID,
};
use vhwa_protocol::{VhwaCommand, VhwaError, VhwaReply, VhwaResult};

use crate::color::{ColorFormat, ColorKey};
use crate::dirty_rect::DirtyRect;
use crate::display::{Display, ListId, SurfaceId};
use crate::gl::GlBackend;
use crate::handle_table::HandleTable;
use crate::program::ProgramManager;
use crate::rect::Rect;
use crate::settings::VhwaSettings;
use crate::support_info::VhwaInfo;
use crate::surface::{SurfaceMemory, SurfaceParams, VhwaSurface};
use crate::texture::ImageFlags;
use crate::texture_image::{calc_bytes_per_line, calc_mem_size};
use crate::vram::SharedVram;

/// Pixel layout of the host framebuffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramebufferFormat {
    #[default]
    Bgr,
    /// Anything the overlay cannot read directly; a host buffer is used instead.
    Other,
}

/// Host framebuffer geometry handed to [`VhwaImage::resize`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramebufferInfo {
    pub format: FramebufferFormat,
    pub bits_per_pixel: u32,
    pub bytes_per_line: u32,
    pub width: u32,
    pub height: u32,
    /// Where the framebuffer starts in guest VRAM, if it lives there.
    pub vram_offset: Option<u64>,
}

impl FramebufferInfo {
    /// Framebuffer of `width`x`height` 32bpp BGR pixels at `vram_offset`.
    pub fn bgr32(width: u32, height: u32, vram_offset: Option<u64>) -> Self {
        Self {
            format: FramebufferFormat::Bgr,
            bits_per_pixel: 32,
            bytes_per_line: width * 4,
            width,
            height,
            vram_offset,
        }
    }
}

/// Layout the VGA surface ends up with for a given framebuffer.
struct VgaLayout {
    format: ColorFormat,
    width: i32,
    height: i32,
    uses_vram: bool,
}

fn vga_layout(fb: &FramebufferInfo) -> VgaLayout {
    let (mut r, mut g, mut b) = (0x00ff_0000, 0x0000_ff00, 0x0000_00ff);
    let mut bits_per_pixel = fb.bits_per_pixel;
    let mut bytes_per_line = fb.bytes_per_line;
    let mut fallback = fb.format != FramebufferFormat::Bgr;
    if !fallback {
        match bits_per_pixel {
            32 | 24 => {}
            8 => {
                g = 0;
                b = 0;
            }
            1 => {
                r = 1;
                g = 0;
                b = 0;
            }
            _ => fallback = true,
        }
    }
    if !fallback {
        let bits_per_line = u64::from(bytes_per_line) * 8;
        fallback = bytes_per_line & 3 != 0 || bits_per_line % u64::from(bits_per_pixel) != 0;
    }
    let format = if fallback {
        None
    } else {
        ColorFormat::rgb(bits_per_pixel, r, g, b)
    };
    let (format, uses_vram) = match format {
        Some(format) => (format, fb.vram_offset.is_some()),
        None => {
            tracing::warn!(
                bpp = fb.bits_per_pixel,
                bpl = fb.bytes_per_line,
                format = ?fb.format,
                "unsupported framebuffer layout, using a host buffer"
            );
            bits_per_pixel = 32;
            bytes_per_line = fb.width * 4;
            (ColorFormat::rgb32(), false)
        }
    };
    // 1bpp lines are counted in whole bytes of eight pixels.
    let width = if bits_per_pixel >= 8 {
        bytes_per_line / (bits_per_pixel / 8)
    } else {
        bytes_per_line * 8 / bits_per_pixel.max(1)
    };
    VgaLayout {
        format,
        width: width as i32,
        height: fb.height as i32,
        uses_vram,
    }
}

/// Error value `CanCreate` reports for any surface the host cannot create.
pub const CAN_CREATE_REJECTED: i32 = -1;

pub struct VhwaImage<G: GlBackend> {
    gl: G,
    programs: ProgramManager,
    info: VhwaInfo,
    settings: VhwaSettings,
    display: Display,
    handles: HandleTable<SurfaceId>,
    vram: Option<SharedVram>,
    viewport: Rect,
    /// Overlay list still waiting for back buffers, and how many.
    constructing: Option<ListId>,
    remaining_to_construct: u32,
    repaint_needed: bool,
}

impl<G: GlBackend> VhwaImage<G> {
    pub fn new(gl: G, info: VhwaInfo, settings: VhwaSettings) -> Self {
        Self {
            gl,
            programs: ProgramManager::new(),
            info,
            settings,
            display: Display::new(),
            handles: HandleTable::new(VHWA_MAX_SURFACES),
            vram: None,
            viewport: Rect::default(),
            constructing: None,
            remaining_to_construct: 0,
            repaint_needed: false,
        }
    }

    pub fn gl(&self) -> &G {
        &self.gl
    }

    pub fn gl_mut(&mut self) -> &mut G {
        &mut self.gl
    }

    pub fn info(&self) -> &VhwaInfo {
        &self.info
    }

    pub fn settings(&self) -> &VhwaSettings {
        &self.settings
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn repaint_needed(&self) -> bool {
        self.repaint_needed
    }

    pub fn vram(&self) -> Option<&SharedVram> {
        self.vram.as_ref()
    }

    /// Attaches guest VRAM; surface offsets are resolved against it from now on.
    pub fn construct(&mut self, vram: SharedVram) {
        tracing::debug!(size = vram.size(), "vram attached");
        self.vram = Some(vram);
    }

    /// Surface currently registered under guest handle `handle`.
    pub fn surface_id(&self, handle: u32) -> Option<SurfaceId> {
        self.handles.get(handle)
    }

    pub fn surface_by_handle(&self, handle: u32) -> Option<&VhwaSurface> {
        self.display.surface(self.handles.get(handle)?)
    }

    /// VRAM offset of a surface's memory, or the void offset for host buffers.
    pub fn vram_offset(&self, id: SurfaceId) -> u64 {
        self.display
            .surface(id)
            .and_then(VhwaSurface::memory)
            .and_then(SurfaceMemory::vram_offset)
            .unwrap_or(VHWA_OFFSET64_VOID)
    }

    fn lookup(&self, handle: u64) -> VhwaResult<SurfaceId> {
        u32::try_from(handle)
            .ok()
            .and_then(|h| self.handles.get(h))
            .ok_or(VhwaError::InvalidParameter)
    }

    fn vram_at(&self, offset: u64, len: usize) -> Option<&SharedVram> {
        if offset == VHWA_OFFSET64_VOID {
            return None;
        }
        self.vram.as_ref().filter(|v| v.contains(offset, len))
    }

    /// Rebinds `id` to `offset` when the guest moved it inside VRAM.
    fn check_update_address(&mut self, id: SurfaceId, offset: u64) {
        let Some(len) = self.display.surface(id).map(VhwaSurface::mem_size) else {
            return;
        };
        let Some(vram) = self.vram_at(offset, len).cloned() else {
            return;
        };
        if let Some(surface) = self.display.surface_mut(id) {
            if surface.set_vram_offset(&vram, offset) {
                tracing::debug!(handle = surface.handle(), offset, "surface moved in vram");
            }
        }
    }

    fn delete_surface(&mut self, id: SurfaceId) {
        if let Some(mut surface) = self.display.take_surface(id) {
            surface.delete(&mut self.gl);
        }
    }

    /// Runs one guest or host command against the surface model.
    pub fn execute(&mut self, cmd: &VhwaCommand) -> VhwaResult<VhwaReply> {
        tracing::trace!(cmd = ?cmd.cmd_type(), "vhwa command");
        match cmd {
            VhwaCommand::SurfCanCreate(c) => Ok(VhwaReply::CanCreate {
                err_info: self.surface_can_create(c),
            }),
            VhwaCommand::SurfCreate(desc) => self.surface_create(desc),
            VhwaCommand::SurfGetInfo(desc) => self.surface_get_info(desc),
            VhwaCommand::SurfDestroy(c) => self.surface_destroy(c).map(|()| VhwaReply::None),
            VhwaCommand::SurfLock(c) => self.surface_lock(c).map(|()| VhwaReply::None),
            VhwaCommand::SurfUnlock(c) => self.surface_unlock(c).map(|()| VhwaReply::None),
            VhwaCommand::SurfFlip(c) => self.surface_flip(c).map(|()| VhwaReply::None),
            VhwaCommand::SurfOverlayUpdate(c) => {
                self.surface_overlay_update(c).map(|()| VhwaReply::None)
            }
            VhwaCommand::SurfOverlaySetPosition(c) => {
                self.surface_overlay_set_position(c).map(|()| VhwaReply::None)
            }
            VhwaCommand::SurfColorkeySet(c) => {
                self.surface_colorkey_set(c).map(|()| VhwaReply::None)
            }
            VhwaCommand::QueryInfo1(q) => Ok(VhwaReply::QueryInfo1(self.query_info1(q))),
            VhwaCommand::QueryInfo2(q) => self.query_info2(q),
            VhwaCommand::SurfBlt(_) | VhwaCommand::SurfColorFill(_) => {
                Err(VhwaError::NotImplemented)
            }
            VhwaCommand::Enable | VhwaCommand::Disable => Ok(VhwaReply::None),
            VhwaCommand::HhConstruct(_)
            | VhwaCommand::HhReset
            | VhwaCommand::HhDisable
            | VhwaCommand::HhEnable
            | VhwaCommand::HhSaveStateSaveBegin
            | VhwaCommand::HhSaveStateSaveEnd
            | VhwaCommand::HhSaveStateSavePerform
            | VhwaCommand::HhSaveStateLoadPerform => {
                tracing::debug!(cmd = ?cmd.cmd_type(), "admin command reached the image");
                Err(VhwaError::NotImplemented)
            }
        }
    }

    /// Feasibility check; the answer travels in the error-info field, never the status.
    pub fn surface_can_create(&self, cmd: &SurfCanCreate) -> i32 {
        let desc = &cmd.desc;
        if desc.width > VHWA_MAX_SURFACE_DIM || desc.height > VHWA_MAX_SURFACE_DIM {
            tracing::debug!(desc.width, desc.height, "surface too large");
            return CAN_CREATE_REJECTED;
        }
        if !desc.flags.contains(SurfDescFlags::CAPS) {
            return CAN_CREATE_REJECTED;
        }
        if desc.surf_caps.contains(SurfCaps::PRIMARYSURFACE) {
            return if desc.surf_caps.contains(SurfCaps::COMPLEX) {
                CAN_CREATE_REJECTED
            } else {
                0
            };
        }
        if cmd.is_different_pf {
            if !desc.flags.contains(SurfDescFlags::PIXELFORMAT) {
                return CAN_CREATE_REJECTED;
            }
            let pf = &desc.pixel_format;
            if pf.flags.contains(PixelFormatFlags::RGB) {
                if pf.bit_count != 32 && pf.bit_count != 24 {
                    return CAN_CREATE_REJECTED;
                }
            } else if pf.flags.contains(PixelFormatFlags::FOURCC) {
                if !self.settings.is_supported(&self.info, pf.fourcc) {
                    tracing::debug!(fourcc = %fourcc_name(pf.fourcc), "unsupported fourcc");
                    return CAN_CREATE_REJECTED;
                }
            } else {
                return CAN_CREATE_REJECTED;
            }
        }
        0
    }

    fn desc_format(desc: &SurfaceDesc) -> Option<ColorFormat> {
        let pf = &desc.pixel_format;
        if pf.flags.contains(PixelFormatFlags::RGB) {
            ColorFormat::rgb(pf.bit_count, pf.r_mask, pf.g_mask, pf.b_mask)
        } else if pf.flags.contains(PixelFormatFlags::FOURCC) {
            ColorFormat::fourcc(pf.fourcc)
        } else {
            None
        }
    }

    pub fn surface_create(&mut self, desc: &SurfaceDesc) -> VhwaResult<VhwaReply> {
        let requested = u32::try_from(desc.handle).map_err(|_| VhwaError::GeneralFailure)?;
        if requested != 0 {
            if requested >= VHWA_MAX_SURFACES || self.handles.get(requested).is_some() {
                tracing::warn!(handle = requested, "surface handle unusable");
                return Err(VhwaError::GeneralFailure);
            }
        } else if self.handles.usage() + 1 >= self.handles.capacity() {
            return Err(VhwaError::GeneralFailure);
        }

        let key = |flag: SurfDescFlags, ck: ColorKeyDesc| {
            desc.flags.contains(flag).then(|| ColorKey::from(ck))
        };
        let dst_blt_key = key(SurfDescFlags::CKDESTBLT, desc.dst_blt_ck);
        let src_blt_key = key(SurfDescFlags::CKSRCBLT, desc.src_blt_ck);
        let dst_overlay_key = key(SurfDescFlags::CKDESTOVERLAY, desc.dst_overlay_ck);
        let src_overlay_key = key(SurfDescFlags::CKSRCOVERLAY, desc.src_overlay_ck);

        let caps = desc.surf_caps;
        let is_primary = caps.contains(SurfCaps::PRIMARYSURFACE);
        let mut no_pbo = false;
        let mut reported_format = None;
        let mut reused = None;

        if is_primary {
            no_pbo = true;
            let vga = self.display.vga().ok_or(VhwaError::InvalidState)?;
            if desc.offset != VHWA_OFFSET64_VOID {
                let len = self.display.surface(vga).map_or(0, VhwaSurface::mem_size);
                if self.vram_at(desc.offset, len).is_none() {
                    return Err(VhwaError::GeneralFailure);
                }
                self.check_update_address(vga, desc.offset);
            }
            let pf = &desc.pixel_format;
            reported_format = ColorFormat::rgb(pf.bit_count, pf.r_mask, pf.g_mask, pf.b_mask);

            let vga_free = self.display.surface(vga).is_some_and(|s| s.handle() == 0);
            if vga_free && !caps.contains(SurfCaps::OFFSCREENPLAIN) {
                if let Some(surface) = self.display.surface_mut(vga) {
                    surface.set_dst_blt_key(dst_blt_key);
                    surface.set_src_blt_key(src_blt_key);
                    surface.dst_overlay_key_mut().set_default(dst_overlay_key);
                    surface.dst_overlay_key_mut().reset_default();
                    surface.src_overlay_key_mut().set_default(src_overlay_key);
                    surface.src_overlay_key_mut().reset_default();
                }
                reused = Some(vga);
            }
        } else if caps.contains(SurfCaps::OFFSCREENPLAIN) {
            no_pbo = true;
        }

        let id = match reused {
            Some(id) => id,
            None => self.create_new_surface(
                desc,
                is_primary,
                no_pbo,
                SurfaceParamsKeys {
                    dst_blt_key,
                    src_blt_key,
                    dst_overlay_key,
                    src_overlay_key,
                },
            )?,
        };

        let surface = self.display.surface(id).ok_or(VhwaError::InvalidState)?;
        let (pitch, size_x) = match reported_format {
            Some(format) => {
                let pitch = (format.bits_per_pixel() * surface.width() as u32 + 7) / 8;
                (pitch, pitch * surface.height() as u32)
            }
            None => (surface.bytes_per_line(), surface.mem_size() as u32),
        };

        let (handle, assigned) = if requested != 0 {
            if !self.handles.map_put(requested, id) {
                return Err(VhwaError::GeneralFailure);
            }
            (requested, None)
        } else {
            let handle = self.handles.put(id).ok_or(VhwaError::GeneralFailure)?;
            (handle, Some(u64::from(handle)))
        };
        if let Some(surface) = self.display.surface_mut(id) {
            surface.set_handle(handle);
        }
        tracing::debug!(
            handle,
            width = desc.width,
            height = desc.height,
            ?caps,
            "surface created"
        );

        Ok(VhwaReply::SurfaceInfo {
            pitch,
            size_x,
            size_y: 1,
            handle: assigned,
        })
    }

    fn create_new_surface(
        &mut self,
        desc: &SurfaceDesc,
        is_primary: bool,
        no_pbo: bool,
        keys: SurfaceParamsKeys,
    ) -> VhwaResult<SurfaceId> {
        if desc.width > VHWA_MAX_SURFACE_DIM
            || desc.height > VHWA_MAX_SURFACE_DIM
            || desc.back_buffers >= VHWA_MAX_SURFACES
        {
            return Err(VhwaError::GeneralFailure);
        }

        let mut flags = ImageFlags::empty();
        if !no_pbo {
            flags |= ImageFlags::PBO | ImageFlags::PBOIMG | ImageFlags::LINEAR;
            if self.settings.stretch_linear {
                flags |= ImageFlags::FBO;
            }
        }

        let primary = self.display.primary();
        let primary_rect = primary
            .and_then(|p| self.display.surface(p))
            .map(VhwaSurface::rect)
            .ok_or(VhwaError::InvalidState)?;
        let format = if is_primary {
            self.display
                .vga()
                .and_then(|v| self.display.surface(v))
                .map(|s| *s.format())
        } else {
            Self::desc_format(desc)
        };
        let Some(format) = format else {
            tracing::warn!(pf = ?desc.pixel_format, "surface format not supported");
            return Err(VhwaError::GeneralFailure);
        };

        let (width, height) = (desc.width as i32, desc.height as i32);
        let mut surface = VhwaSurface::new(
            SurfaceParams {
                width,
                height,
                targ_rect: primary_rect,
                src_rect: Rect::from_size(width, height),
                visible_rect: self.viewport,
                format,
                dst_blt_key: keys.dst_blt_key,
                src_blt_key: keys.src_blt_key,
                dst_overlay_key: keys.dst_overlay_key,
                src_overlay_key: keys.src_overlay_key,
                flags,
            },
            self.info.gl(),
        );

        let memory = if desc.offset == VHWA_OFFSET64_VOID {
            SurfaceMemory::host(surface.mem_size())
        } else {
            let Some(vram) = self.vram_at(desc.offset, surface.mem_size()) else {
                tracing::warn!(offset = desc.offset, "surface offset outside vram");
                return Err(VhwaError::GeneralFailure);
            };
            SurfaceMemory::Vram {
                vram: vram.clone(),
                offset: desc.offset,
            }
        };
        if let Err(err) = surface.init(&mut self.gl, memory) {
            tracing::warn!(%err, "surface textures could not be created");
            surface.delete(&mut self.gl);
            return Err(VhwaError::NoMemory);
        }
        surface.set_primary(primary);
        let id = self.display.insert_surface(surface);

        if desc.surf_caps.contains(SurfCaps::OVERLAY) {
            let list = match self.constructing {
                Some(list) => list,
                None => {
                    let list = self.display.create_list();
                    self.remaining_to_construct = desc.back_buffers + 1;
                    self.display.add_overlay(list);
                    self.constructing = Some(list);
                    list
                }
            };
            self.display.add_to_list(list, id);
            self.remaining_to_construct = self.remaining_to_construct.saturating_sub(1);
            if self.remaining_to_construct == 0 {
                self.constructing = None;
            }
        } else {
            let list = self.display.primary_list();
            self.display.add_to_list(list, id);
            if is_primary {
                if let Some(l) = self.display.list_mut(list) {
                    l.set_current(Some(id));
                }
                self.display.update_vga(id);
            }
        }
        Ok(id)
    }

    pub fn surface_get_info(&self, desc: &SurfaceDesc) -> VhwaResult<VhwaReply> {
        if desc.width > VHWA_MAX_SURFACE_DIM || desc.height > VHWA_MAX_SURFACE_DIM {
            return Err(VhwaError::InvalidParameter);
        }
        let format = Self::desc_format(desc).ok_or(VhwaError::InvalidParameter)?;
        let (width, height) = (desc.width as i32, desc.height as i32);
        Ok(VhwaReply::SurfaceInfo {
            pitch: calc_bytes_per_line(&format, width),
            size_x: calc_mem_size(&format, width, height),
            size_y: 1,
            handle: None,
        })
    }

    pub fn surface_destroy(&mut self, cmd: &SurfDestroy) -> VhwaResult<()> {
        let id = self.lookup(cmd.handle)?;
        let list = self.display.list_of(id);
        let vga_list = self.display.vga().and_then(|v| self.display.list_of(v));

        match list {
            Some(list) if Some(list) == vga_list => {
                let members = self
                    .display
                    .list(list)
                    .map(|l| l.surfaces().to_vec())
                    .unwrap_or_default();
                if members.len() > 1 {
                    if self.display.vga() == Some(id) {
                        if let Some(&next) = members.iter().find(|s| **s != id) {
                            self.display.update_vga(next);
                            if let Some(l) = self.display.list_mut(list) {
                                l.set_current(Some(next));
                            }
                        }
                    }
                    self.delete_surface(id);
                } else if let Some(surface) = self.display.surface_mut(id) {
                    // The VGA surface outlives its guest handle.
                    surface.set_handle(0);
                }
            }
            list => {
                self.display.remove_from_list(id);
                if let Some(list) = list {
                    if self.display.list(list).is_some_and(|l| l.is_empty()) {
                        self.display.remove_overlay(list);
                        if self.constructing == Some(list) {
                            self.constructing = None;
                            self.remaining_to_construct = 0;
                        }
                        self.display.delete_list(list);
                    }
                }
                self.delete_surface(id);
            }
        }

        self.repaint_needed = true;
        if let Ok(handle) = u32::try_from(cmd.handle) {
            self.handles.remove(handle);
        }
        tracing::debug!(handle = cmd.handle, "surface destroyed");
        Ok(())
    }

    pub fn surface_lock(&mut self, cmd: &SurfLock) -> VhwaResult<()> {
        let id = self.lookup(cmd.handle)?;
        self.check_update_address(id, cmd.offset);
        let rect = cmd.rect.as_ref().map(Rect::from_rectl);
        self.display
            .surface_mut(id)
            .ok_or(VhwaError::InvalidState)?
            .lock(rect)
    }

    pub fn surface_unlock(&mut self, cmd: &SurfUnlock) -> VhwaResult<()> {
        let id = self.lookup(cmd.handle)?;
        self.check_update_address(id, cmd.offset);
        let surface = self.display.surface_mut(id).ok_or(VhwaError::InvalidState)?;
        if let Some(r) = cmd.updated_mem.as_ref() {
            surface.updated_mem(Rect::from_rectl(r));
        }
        surface.unlock();
        Ok(())
    }

    pub fn surface_flip(&mut self, cmd: &SurfFlip) -> VhwaResult<()> {
        let targ = self.lookup(cmd.targ_handle)?;
        let curr = self.lookup(cmd.curr_handle)?;
        self.check_update_address(curr, cmd.curr_offset);
        self.check_update_address(targ, cmd.targ_offset);

        if let Some(r) = cmd.updated_targ_mem.as_ref() {
            if let Some(surface) = self.display.surface_mut(targ) {
                surface.updated_mem(Rect::from_rectl(r));
            }
        }
        let list = self.display.list_of(targ).ok_or(VhwaError::InvalidState)?;
        if let Some(l) = self.display.list_mut(list) {
            l.set_current(Some(targ));
        }
        self.repaint_needed = true;
        Ok(())
    }

    /// Points `dst` at the VGA role and makes it the visible primary.
    fn promote_primary(&mut self, dst: SurfaceId) {
        if self.display.primary() == Some(dst) {
            return;
        }
        self.display.update_vga(dst);
        if let Some(list) = self.display.list_of(dst) {
            if let Some(l) = self.display.list_mut(list) {
                l.set_current(Some(dst));
            }
        }
    }

    fn apply_overlay_update(
        surface: &mut VhwaSurface,
        dst: Option<SurfaceId>,
        cmd: &SurfOverlayUpdate,
    ) {
        let flags = cmd.flags;
        // The overlay carries the override of its primary's destination key; a present
        // overridden value with no default means keying is off.
        if flags.contains(OverlayFlags::KEYDEST) {
            surface.dst_overlay_key_mut().set_overridden(None);
        } else if flags.contains(OverlayFlags::KEYDESTOVERRIDE) {
            let key = ColorKey::from(cmd.fx.dst_ck);
            surface.dst_overlay_key_mut().set_overridden(Some(key));
            surface.dst_overlay_key_mut().set_default(Some(key));
        } else {
            surface
                .dst_overlay_key_mut()
                .set_overridden(Some(ColorKey::new(0, 0)));
            surface.dst_overlay_key_mut().set_default(None);
        }

        if flags.contains(OverlayFlags::KEYSRC) {
            surface.src_overlay_key_mut().reset_default();
        } else if flags.contains(OverlayFlags::KEYSRCOVERRIDE) {
            surface
                .src_overlay_key_mut()
                .set_overridden(Some(ColorKey::from(cmd.fx.src_ck)));
        } else {
            surface.src_overlay_key_mut().set_overridden(None);
        }

        if let Some(dst) = dst {
            surface.set_primary(Some(dst));
            surface.set_rects(Rect::from_rectl(&cmd.dst_rect), Rect::from_rectl(&cmd.src_rect));
        }
    }

    pub fn surface_overlay_update(&mut self, cmd: &SurfOverlayUpdate) -> VhwaResult<()> {
        let src = self.lookup(cmd.src_handle)?;
        let list = self.display.list_of(src).ok_or(VhwaError::InvalidState)?;
        self.check_update_address(src, cmd.src_offset);

        let dst = if cmd.dst_handle != 0 {
            let dst = self.lookup(cmd.dst_handle)?;
            self.check_update_address(dst, cmd.dst_offset);
            if cmd.flags.contains(OverlayFlags::SHOW) {
                self.promote_primary(dst);
            }
            Some(dst)
        } else {
            None
        };

        if let Some(r) = cmd.updated_src_mem.as_ref() {
            if let Some(surface) = self.display.surface_mut(src) {
                surface.updated_mem(Rect::from_rectl(r));
            }
        }

        let members = self
            .display
            .list(list)
            .map(|l| l.surfaces().to_vec())
            .unwrap_or_default();
        for id in members {
            if let Some(surface) = self.display.surface_mut(id) {
                Self::apply_overlay_update(surface, dst, cmd);
            }
        }

        if let Some(l) = self.display.list_mut(list) {
            if cmd.flags.contains(OverlayFlags::HIDE) {
                l.set_current(None);
            } else if cmd.flags.contains(OverlayFlags::SHOW) {
                l.set_current(Some(src));
            }
        }
        self.repaint_needed = true;
        tracing::debug!(
            src = cmd.src_handle,
            dst = cmd.dst_handle,
            flags = ?cmd.flags,
            "overlay updated"
        );
        Ok(())
    }

    pub fn surface_overlay_set_position(&mut self, cmd: &SurfOverlaySetPosition) -> VhwaResult<()> {
        let dst = self.lookup(cmd.dst_handle)?;
        let src = self.lookup(cmd.src_handle)?;
        self.check_update_address(src, cmd.src_offset);
        self.check_update_address(dst, cmd.dst_offset);

        let list = self.display.list_of(src).ok_or(VhwaError::InvalidState)?;
        if self.display.list(list).and_then(|l| l.current()).is_some() {
            self.promote_primary(dst);
        }
        self.repaint_needed = true;

        let members = self
            .display
            .list(list)
            .map(|l| l.surfaces().to_vec())
            .unwrap_or_default();
        for id in members {
            if let Some(surface) = self.display.surface_mut(id) {
                surface.set_targ_position(cmd.x as i32, cmd.y as i32);
            }
        }
        Ok(())
    }

    pub fn surface_colorkey_set(&mut self, cmd: &SurfColorkeySet) -> VhwaResult<()> {
        let id = self.lookup(cmd.handle)?;
        self.check_update_address(id, cmd.offset);
        self.repaint_needed = true;

        let surface = self.display.surface_mut(id).ok_or(VhwaError::InvalidState)?;
        let key = ColorKey::from(cmd.key);
        if cmd.flags.contains(ColorKeyFlags::DESTBLT) {
            surface.set_dst_blt_key(Some(key));
        }
        if cmd.flags.contains(ColorKeyFlags::DESTOVERLAY) {
            surface.dst_overlay_key_mut().set_default(Some(key));
        }
        if cmd.flags.contains(ColorKeyFlags::SRCBLT) {
            surface.set_src_blt_key(Some(key));
        }
        if cmd.flags.contains(ColorKeyFlags::SRCOVERLAY) {
            surface.src_overlay_key_mut().set_default(Some(key));
        }
        Ok(())
    }

    /// Capabilities offered to a guest built against `q.guest_version`. Any version mismatch or
    /// an unusable GL context reports everything as zero.
    pub fn query_info1(&self, q: &QueryInfo1) -> QueryInfo1Out {
        let enabled = self.info.is_vhwa_supported() && q.guest_version == VhwaVersion::CURRENT;
        if !enabled {
            tracing::info!(version = ?q.guest_version, "vhwa not offered to guest");
            return QueryInfo1Out::default();
        }

        let gl = self.info.gl();
        let mut out = QueryInfo1Out {
            cfg_flags: VHWA_CFG_ENABLED,
            caps: Caps::OVERLAY | Caps::OVERLAYSTRETCH | Caps::OVERLAYCANTCLIP,
            caps2: Caps2::CANRENDERWINDOWED | Caps2::WIDESURFACES,
            stretch_caps: 0,
            num_overlays: 1,
            cur_overlays: 0,
            surface_caps: SurfCaps::PRIMARYSURFACE
                | SurfCaps::OFFSCREENPLAIN
                | SurfCaps::FLIP
                | SurfCaps::LOCALVIDMEM
                | SurfCaps::OVERLAY,
            ..QueryInfo1Out::default()
        };
        if gl.fragment_shader && gl.max_texture_units >= 2 {
            out.caps |= Caps::COLORKEY | Caps::COLORKEYHWASSIST;
            out.color_key_caps = ColorKeyCaps::DESTOVERLAY | ColorKeyCaps::DESTOVERLAYONEACTIVE;
            if gl.texture_rectangle {
                out.caps |= Caps::OVERLAYFOURCC;
                out.color_key_caps |= ColorKeyCaps::DESTOVERLAYYUV;
                out.num_fourcc = self.settings.intersection(&self.info).len() as u32;
            }
        }
        out
    }

    pub fn query_info2(&self, q: &QueryInfo2) -> VhwaResult<VhwaReply> {
        let fourccs = self.settings.intersection(&self.info);
        if (q.num_fourcc as usize) < fourccs.len() {
            tracing::warn!(
                capacity = q.num_fourcc,
                needed = fourccs.len(),
                "fourcc array too small"
            );
            return Err(VhwaError::GeneralFailure);
        }
        Ok(VhwaReply::QueryInfo2 { fourccs })
    }

    /// Host commands that take every guest surface down: hide visible overlays, destroy overlay
    /// surfaces, then destroy primaries that still carry a guest handle.
    pub fn reset(&self) -> Vec<VhwaCommand> {
        let handle_of = |id: SurfaceId| {
            self.display
                .surface(id)
                .map_or(0, |s| u64::from(s.handle()))
        };
        let mut cmds = Vec::new();
        for &list in self.display.overlays() {
            let Some(l) = self.display.list(list) else {
                continue;
            };
            if let Some(current) = l.current() {
                cmds.push(VhwaCommand::SurfOverlayUpdate(SurfOverlayUpdate {
                    dst_handle: 0,
                    dst_offset: 0,
                    dst_rect: Default::default(),
                    src_handle: handle_of(current),
                    src_offset: 0,
                    src_rect: Default::default(),
                    flags: OverlayFlags::HIDE,
                    updated_src_mem: None,
                    fx: Default::default(),
                }));
            }
            for &id in l.surfaces() {
                cmds.push(VhwaCommand::SurfDestroy(SurfDestroy {
                    handle: handle_of(id),
                }));
            }
        }
        for &id in self.display.primaries().surfaces() {
            let handle = handle_of(id);
            if handle != 0 {
                cmds.push(VhwaCommand::SurfDestroy(SurfDestroy { handle }));
            }
        }
        cmds
    }

    /// Whether the guest owns anything beyond the plain VGA surface.
    pub fn has_surfaces(&self) -> bool {
        if !self.display.overlays().is_empty() || self.display.primaries().len() > 1 {
            return true;
        }
        self.display
            .vga()
            .and_then(|v| self.display.surface(v))
            .is_some_and(|s| s.handle() != 0)
    }

    pub fn has_visible_overlays(&self) -> bool {
        self.display.visible_overlays().next().is_some()
    }

    /// Bounding rect of every visible overlay's target.
    pub fn overlays_rect_union(&self) -> Rect {
        let mut union = DirtyRect::new();
        for id in self.display.visible_overlays() {
            if let Some(s) = self.display.surface(id) {
                union.add(s.targ_rect());
            }
        }
        union.to_rect()
    }

    /// Area covered by every visible overlay at once.
    pub fn overlays_rect_intersection(&self) -> Rect {
        let mut rect: Option<Rect> = None;
        for id in self.display.visible_overlays() {
            let Some(targ) = self.display.surface(id).map(VhwaSurface::targ_rect) else {
                continue;
            };
            let next = match rect {
                None => targ,
                Some(r) => r.intersected(&targ),
            };
            rect = Some(next);
            if next.is_empty() {
                break;
            }
        }
        rect.unwrap_or_default()
    }

    /// Marks `rect` of the visible primary as written by the guest.
    pub fn update_rect(&mut self, rect: Rect) {
        if let Some(surface) = self.display.primary().and_then(|p| self.display.surface_mut(p)) {
            surface.updated_mem(rect);
        }
    }

    fn adjust_viewport(&mut self, display: Rect, viewport: Rect) {
        self.gl.set_viewport(
            -viewport.x,
            viewport.h + viewport.y - display.h,
            display.w,
            display.h,
        );
    }

    /// Reclips every surface against `rect` and decides whether the primary still shows.
    pub fn update_viewport(&mut self, rect: Rect) {
        if let Some(display) = self.display.primary().and_then(|p| self.display.surface(p)) {
            let display = display.rect();
            self.adjust_viewport(display, rect);
        }
        self.viewport = rect;

        let primaries = self.display.primaries().surfaces().to_vec();
        for id in primaries {
            self.display.update_visibility(
                &mut self.gl,
                &mut self.programs,
                id,
                None,
                rect,
                false,
                false,
            );
        }

        let over_inter = self.overlays_rect_intersection().intersected(&rect);
        let primary = self.display.primary();
        let mut display_primary = true;
        let overlays = self.display.overlays().to_vec();
        for list in overlays {
            let members = self
                .display
                .list(list)
                .map(|l| l.surfaces().to_vec())
                .unwrap_or_default();
            let Some(front) = members.first().and_then(|f| self.display.surface(*f)) else {
                continue;
            };
            let not_intersected =
                !over_inter.is_empty() && front.targ_rect().contains_rect(&over_inter);
            display_primary &= !not_intersected;
            for id in members {
                self.display.update_visibility(
                    &mut self.gl,
                    &mut self.programs,
                    id,
                    primary,
                    rect,
                    not_intersected,
                    false,
                );
            }
        }
        self.display.set_display_primary(display_primary);
    }

    /// Paints the frame; returns whether anything was drawn.
    pub fn perform_display(&mut self, force: bool) -> bool {
        let drawn = self.display.perform_display(
            &mut self.gl,
            &mut self.programs,
            force | self.repaint_needed,
        );
        self.repaint_needed = false;
        drawn
    }

    /// Recreates the VGA surface for a new host framebuffer.
    pub fn resize(&mut self, fb: &FramebufferInfo) {
        let layout = vga_layout(fb);
        tracing::debug!(
            width = layout.width,
            height = layout.height,
            bpp = layout.format.bits_per_pixel(),
            uses_vram = layout.uses_vram,
            "resizing vga surface"
        );

        if let Some(old) = self.display.set_vga(None) {
            self.delete_surface(old);
        }

        let rect = Rect::from_size(layout.width, layout.height);
        let mut surface = VhwaSurface::new(
            SurfaceParams {
                width: layout.width,
                height: layout.height,
                targ_rect: rect,
                src_rect: rect,
                visible_rect: rect,
                format: layout.format,
                dst_blt_key: None,
                src_blt_key: None,
                dst_overlay_key: None,
                src_overlay_key: None,
                flags: ImageFlags::empty(),
            },
            self.info.gl(),
        );
        let vram = match (layout.uses_vram, fb.vram_offset) {
            (true, Some(offset)) => self
                .vram_at(offset, surface.mem_size())
                .cloned()
                .map(|vram| SurfaceMemory::Vram { vram, offset }),
            _ => None,
        };
        let memory = vram.unwrap_or_else(|| SurfaceMemory::host(surface.mem_size()));
        if let Err(err) = surface.init(&mut self.gl, memory) {
            tracing::warn!(%err, "vga textures could not be created");
        }
        let id = self.display.insert_surface(surface);
        self.display.set_vga(Some(id));

        self.viewport = rect;
        self.adjust_viewport(rect, rect);
        self.gl.setup_matrix(rect.w, rect.h, true);
        self.repaint_needed = true;
    }

    /// Whether the VGA surface already matches `fb`.
    pub fn vga_matches(&self, fb: &FramebufferInfo) -> bool {
        let layout = vga_layout(fb);
        let Some(vga) = self.display.vga().and_then(|v| self.display.surface(v)) else {
            return false;
        };
        let backing = vga.memory().and_then(SurfaceMemory::vram_offset);
        let wanted = if layout.uses_vram { fb.vram_offset } else { None };
        vga.rect() == Rect::from_size(layout.width, layout.height)
            && vga.format().equals(&layout.format)
            && backing == wanted
    }

    /// Drops every surface and GL object. The image is unusable for guest commands until the
    /// next [`VhwaImage::resize`].
    pub fn clear(&mut self) {
        let ids: Vec<SurfaceId> = self.display.surface_ids().collect();
        for id in ids {
            self.delete_surface(id);
        }
        self.display = Display::new();
        self.handles = HandleTable::new(VHWA_MAX_SURFACES);
        self.constructing = None;
        self.remaining_to_construct = 0;
        self.programs.delete_all(&mut self.gl);
    }
}

struct SurfaceParamsKeys {
    dst_blt_key: Option<ColorKey>,
    src_blt_key: Option<ColorKey>,
    dst_overlay_key: Option<ColorKey>,
    src_overlay_key: Option<ColorKey>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::RecordingGl;
    use crate::support_info::GlCaps;
    use crate::vram::VecVram;
    use pretty_assertions::assert_eq;
    use vhwa_protocol::fourcc::{FOURCC_UYVY, FOURCC_YV12};
    use vhwa_protocol::vhwa_cmd::{OverlayFx, PixelFormatDesc, RectL};

    fn image() -> VhwaImage<RecordingGl> {
        let mut image = VhwaImage::new(
            RecordingGl::new(),
            VhwaInfo::new(GlCaps::full()),
            VhwaSettings::default(),
        );
        image.construct(VecVram::shared(8 << 20));
        image.resize(&FramebufferInfo::bgr32(640, 480, Some(0)));
        image
    }

    fn primary_desc() -> SurfaceDesc {
        SurfaceDesc {
            flags: SurfDescFlags::CAPS | SurfDescFlags::WIDTH | SurfDescFlags::HEIGHT,
            width: 640,
            height: 480,
            pixel_format: PixelFormatDesc::rgb(32, 0xff0000, 0xff00, 0xff),
            surf_caps: SurfCaps::PRIMARYSURFACE | SurfCaps::VISIBLE,
            offset: 0,
            ..Default::default()
        }
    }

    fn overlay_desc(fourcc: u32, back_buffers: u32) -> SurfaceDesc {
        SurfaceDesc {
            flags: SurfDescFlags::CAPS
                | SurfDescFlags::WIDTH
                | SurfDescFlags::HEIGHT
                | SurfDescFlags::PIXELFORMAT,
            width: 64,
            height: 64,
            back_buffers,
            pixel_format: PixelFormatDesc::fourcc(fourcc),
            surf_caps: SurfCaps::OVERLAY | SurfCaps::FLIP,
            offset: VHWA_OFFSET64_VOID,
            ..Default::default()
        }
    }

    fn create(image: &mut VhwaImage<RecordingGl>, desc: SurfaceDesc) -> u32 {
        match image.surface_create(&desc).unwrap() {
            VhwaReply::SurfaceInfo {
                handle: Some(h), ..
            } => h as u32,
            VhwaReply::SurfaceInfo { handle: None, .. } => desc.handle as u32,
            other => panic!("unexpected reply {other:?}"),
        }
    }

    fn show(image: &mut VhwaImage<RecordingGl>, src: u32, dst: u32, rect: RectL) {
        image
            .surface_overlay_update(&SurfOverlayUpdate {
                dst_handle: u64::from(dst),
                dst_offset: VHWA_OFFSET64_VOID,
                dst_rect: rect,
                src_handle: u64::from(src),
                src_offset: VHWA_OFFSET64_VOID,
                src_rect: RectL::new(0, 0, 64, 64),
                flags: OverlayFlags::SHOW | OverlayFlags::KEYDEST,
                updated_src_mem: None,
                fx: OverlayFx::default(),
            })
            .unwrap();
    }

    #[test]
    fn can_create_rejects_with_error_info_only() {
        let image = image();
        let mut desc = overlay_desc(FOURCC_YV12, 0);
        let check = |desc: SurfaceDesc, different| {
            image.surface_can_create(&SurfCanCreate {
                desc,
                is_different_pf: different,
            })
        };
        assert_eq!(check(desc, true), 0);

        desc.width = 4097;
        assert_eq!(check(desc, true), CAN_CREATE_REJECTED);

        let mut no_caps = overlay_desc(FOURCC_YV12, 0);
        no_caps.flags.remove(SurfDescFlags::CAPS);
        assert_eq!(check(no_caps, false), CAN_CREATE_REJECTED);

        let mut complex_primary = primary_desc();
        complex_primary.surf_caps |= SurfCaps::COMPLEX;
        assert_eq!(check(complex_primary, false), CAN_CREATE_REJECTED);

        assert_eq!(check(overlay_desc(0x3232_4950, 0), true), CAN_CREATE_REJECTED);

        let mut rgb16 = overlay_desc(0, 0);
        rgb16.pixel_format = PixelFormatDesc::rgb(16, 0xf800, 0x7e0, 0x1f);
        assert_eq!(check(rgb16, true), CAN_CREATE_REJECTED);
        assert_eq!(check(rgb16, false), 0);
    }

    #[test]
    fn primary_create_reuses_vga_and_reports_guest_pitch() {
        let mut image = image();
        let vga = image.display().vga();
        let reply = image.surface_create(&primary_desc()).unwrap();
        assert_eq!(
            reply,
            VhwaReply::SurfaceInfo {
                pitch: 640 * 4,
                size_x: 640 * 4 * 480,
                size_y: 1,
                handle: Some(1),
            }
        );
        assert_eq!(image.surface_id(1), vga);
        assert!(image.has_surfaces());
    }

    #[test]
    fn explicit_handles_must_be_free_and_in_range() {
        let mut image = image();
        let mut desc = overlay_desc(FOURCC_UYVY, 0);
        desc.handle = 7;
        assert_eq!(create(&mut image, desc), 7);
        assert_eq!(image.surface_create(&desc), Err(VhwaError::GeneralFailure));
        desc.handle = 128;
        assert_eq!(image.surface_create(&desc), Err(VhwaError::GeneralFailure));
    }

    #[test]
    fn yv12_overlay_lifecycle() {
        let mut image = image();
        let primary = create(&mut image, primary_desc());
        let reply = image.surface_create(&overlay_desc(FOURCC_YV12, 1)).unwrap();
        let VhwaReply::SurfaceInfo {
            pitch,
            size_x,
            handle: Some(overlay),
            ..
        } = reply
        else {
            panic!("unexpected reply {reply:?}");
        };
        assert_ne!(overlay, 0);
        assert_eq!(size_x, 3 * pitch * 64 / 2);
        let overlay = overlay as u32;

        let list = image.display().list_of(image.surface_id(overlay).unwrap()).unwrap();
        show(&mut image, overlay, primary, RectL::new(0, 0, 640, 480));
        assert_eq!(
            image.display().list(list).unwrap().current(),
            image.surface_id(overlay)
        );
        image.update_viewport(Rect::from_size(640, 480));
        assert!(!image.display().display_primary());

        image
            .surface_destroy(&SurfDestroy {
                handle: u64::from(overlay),
            })
            .unwrap();
        assert!(!image.display().has_overlay(list));
        assert!(image.display().list(list).is_none());
        assert_eq!(image.surface_id(overlay), None);
    }

    #[test]
    fn back_buffers_share_one_overlay_list() {
        let mut image = image();
        create(&mut image, primary_desc());
        let a = create(&mut image, overlay_desc(FOURCC_UYVY, 2));
        let b = create(&mut image, overlay_desc(FOURCC_UYVY, 2));
        let c = create(&mut image, overlay_desc(FOURCC_UYVY, 2));
        let d = create(&mut image, overlay_desc(FOURCC_UYVY, 0));
        let list_of = |h| image.display().list_of(image.surface_id(h).unwrap());
        assert_eq!(list_of(a), list_of(b));
        assert_eq!(list_of(a), list_of(c));
        assert_ne!(list_of(a), list_of(d));
        assert_eq!(image.display().overlays().len(), 2);
    }

    #[test]
    fn destroying_the_last_primary_keeps_the_vga_surface() {
        let mut image = image();
        let primary = create(&mut image, primary_desc());
        let vga = image.display().vga();
        image
            .surface_destroy(&SurfDestroy {
                handle: u64::from(primary),
            })
            .unwrap();
        assert_eq!(image.display().vga(), vga);
        assert_eq!(image.display().primaries().len(), 1);
        assert!(!image.has_surfaces());
        assert_eq!(
            image.surface_destroy(&SurfDestroy {
                handle: u64::from(primary)
            }),
            Err(VhwaError::InvalidParameter)
        );
    }

    #[test]
    fn overlay_key_modes() {
        let mut image = image();
        let primary = create(&mut image, primary_desc());
        let overlay = create(&mut image, overlay_desc(FOURCC_UYVY, 0));
        let key = ColorKeyDesc {
            low: 0x00ff00ff,
            high: 0x00ff00ff,
        };
        let mut cmd = SurfOverlayUpdate {
            dst_handle: u64::from(primary),
            dst_offset: VHWA_OFFSET64_VOID,
            dst_rect: RectL::new(10, 10, 74, 74),
            src_handle: u64::from(overlay),
            src_offset: VHWA_OFFSET64_VOID,
            src_rect: RectL::new(0, 0, 64, 64),
            flags: OverlayFlags::SHOW
                | OverlayFlags::KEYDESTOVERRIDE
                | OverlayFlags::KEYSRCOVERRIDE,
            updated_src_mem: None,
            fx: OverlayFx {
                dst_ck: key,
                src_ck: key,
                ..Default::default()
            },
        };
        image.surface_overlay_update(&cmd).unwrap();
        let s = image.surface_by_handle(overlay).unwrap();
        assert_eq!(s.dst_overlay_key().current(), Some(ColorKey::from(key)));
        assert_eq!(s.dst_overlay_key().default_key(), Some(ColorKey::from(key)));
        assert_eq!(s.src_overlay_key().current(), Some(ColorKey::from(key)));
        assert_eq!(s.targ_rect(), Rect::new(10, 10, 64, 64));
        assert_eq!(s.primary(), image.surface_id(primary));

        cmd.flags = OverlayFlags::HIDE;
        image.surface_overlay_update(&cmd).unwrap();
        let s = image.surface_by_handle(overlay).unwrap();
        assert_eq!(s.dst_overlay_key().default_key(), None);
        assert_eq!(s.active_dst_overlay_key(None), None);
        assert_eq!(s.src_overlay_key().current(), None);
        assert!(!image.has_visible_overlays());
    }

    #[test]
    fn set_position_moves_every_back_buffer() {
        let mut image = image();
        let primary = create(&mut image, primary_desc());
        let a = create(&mut image, overlay_desc(FOURCC_UYVY, 1));
        let b = create(&mut image, overlay_desc(FOURCC_UYVY, 1));
        show(&mut image, a, primary, RectL::new(0, 0, 64, 64));
        image
            .surface_overlay_set_position(&SurfOverlaySetPosition {
                dst_handle: u64::from(primary),
                dst_offset: VHWA_OFFSET64_VOID,
                src_handle: u64::from(a),
                src_offset: VHWA_OFFSET64_VOID,
                x: 100,
                y: 50,
                flags: 0,
            })
            .unwrap();
        for h in [a, b] {
            assert_eq!(
                image.surface_by_handle(h).unwrap().targ_rect(),
                Rect::new(100, 50, 64, 64)
            );
        }
        assert_eq!(image.overlays_rect_union(), Rect::new(100, 50, 64, 64));
    }

    #[test]
    fn flip_selects_the_target() {
        let mut image = image();
        let primary = create(&mut image, primary_desc());
        let a = create(&mut image, overlay_desc(FOURCC_UYVY, 1));
        let b = create(&mut image, overlay_desc(FOURCC_UYVY, 1));
        show(&mut image, a, primary, RectL::new(0, 0, 64, 64));
        image
            .surface_flip(&SurfFlip {
                targ_handle: u64::from(b),
                targ_offset: VHWA_OFFSET64_VOID,
                curr_handle: u64::from(a),
                curr_offset: VHWA_OFFSET64_VOID,
                flags: 0,
                updated_targ_mem: None,
                updated_curr_mem: None,
            })
            .unwrap();
        assert_eq!(
            image.display().visible_overlays().collect::<Vec<_>>(),
            vec![image.surface_id(b).unwrap()]
        );
        assert!(image.repaint_needed());
        image.perform_display(false);
        assert!(!image.repaint_needed());
    }

    #[test]
    fn lock_rebinds_moved_surfaces() {
        let mut image = image();
        create(&mut image, primary_desc());
        let overlay = create(&mut image, overlay_desc(FOURCC_UYVY, 0));
        let id = image.surface_id(overlay).unwrap();
        assert_eq!(image.vram_offset(id), VHWA_OFFSET64_VOID);
        image
            .surface_lock(&SurfLock {
                handle: u64::from(overlay),
                offset: 0x20_0000,
                flags: 0,
                rect: None,
            })
            .unwrap();
        assert_eq!(image.vram_offset(id), 0x20_0000);
        // Offsets beyond VRAM leave the backing alone.
        image
            .surface_unlock(&SurfUnlock {
                handle: u64::from(overlay),
                offset: 1 << 40,
                updated_mem: Some(RectL::new(0, 0, 8, 8)),
            })
            .unwrap();
        assert_eq!(image.vram_offset(id), 0x20_0000);
    }

    #[test]
    fn query_info_depends_only_on_probe_and_settings() {
        let image = image();
        let q = QueryInfo1 {
            guest_version: VhwaVersion::CURRENT,
        };
        let out = image.query_info1(&q);
        assert_eq!(out, image.query_info1(&q));
        assert_eq!(out.cfg_flags, VHWA_CFG_ENABLED);
        assert!(out.caps.contains(Caps::OVERLAYFOURCC | Caps::COLORKEY));
        assert_eq!(out.num_fourcc, 4);

        let stale = QueryInfo1 {
            guest_version: VhwaVersion {
                bld: 2,
                ..VhwaVersion::CURRENT
            },
        };
        assert_eq!(image.query_info1(&stale), QueryInfo1Out::default());

        assert_eq!(
            image.query_info2(&QueryInfo2 { num_fourcc: 2 }),
            Err(VhwaError::GeneralFailure)
        );
        let VhwaReply::QueryInfo2 { fourccs } =
            image.query_info2(&QueryInfo2 { num_fourcc: 4 }).unwrap()
        else {
            panic!("expected fourcc list");
        };
        assert_eq!(fourccs, image.settings().intersection(image.info()));
    }

    #[test]
    fn reset_hides_then_destroys() {
        let mut image = image();
        let primary = create(&mut image, primary_desc());
        let a = create(&mut image, overlay_desc(FOURCC_UYVY, 1));
        let b = create(&mut image, overlay_desc(FOURCC_UYVY, 1));
        show(&mut image, a, primary, RectL::new(0, 0, 64, 64));

        let cmds = image.reset();
        let summary: Vec<(&str, u64)> = cmds
            .iter()
            .map(|c| match c {
                VhwaCommand::SurfOverlayUpdate(u) => ("hide", u.src_handle),
                VhwaCommand::SurfDestroy(d) => ("destroy", d.handle),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("hide", u64::from(a)),
                ("destroy", u64::from(a)),
                ("destroy", u64::from(b)),
                ("destroy", u64::from(primary)),
            ]
        );

        for cmd in &cmds {
            image.execute(cmd).unwrap();
        }
        assert!(!image.has_surfaces());
    }

    #[test]
    fn resize_falls_back_for_unsupported_depths() {
        let mut image = image();
        let fb = FramebufferInfo {
            bits_per_pixel: 16,
            bytes_per_line: 1280,
            ..FramebufferInfo::bgr32(640, 480, Some(0))
        };
        image.resize(&fb);
        let vga = image.display().surface(image.display().vga().unwrap()).unwrap();
        assert_eq!(vga.format().bits_per_pixel(), 32);
        assert_eq!(vga.rect(), Rect::from_size(640, 480));
        assert_eq!(vga.memory().and_then(SurfaceMemory::vram_offset), None);
        assert!(image.vga_matches(&fb));
        assert!(!image.vga_matches(&FramebufferInfo::bgr32(640, 480, Some(0))));
    }

    #[test]
    fn blt_and_color_fill_are_not_implemented() {
        let mut image = image();
        let cmd = VhwaCommand::SurfColorFill(vhwa_protocol::vhwa_cmd::SurfColorFill {
            handle: 1,
            offset: 0,
            rect_count: 1,
            first_rect: RectL::new(0, 0, 1, 1),
        });
        assert_eq!(image.execute(&cmd), Err(VhwaError::NotImplemented));
    }
}
