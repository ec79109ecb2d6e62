//! One guest surface: its rectangles, color keys, backing memory and textured image.
//!
//! A surface never looks at other surfaces directly. Whatever needs the primary it is composed
//! onto (keying against the primary's texture, the primary's destination key) is resolved by
//! [`crate::display::Display`], which owns every surface.

use std::fmt;

use vhwa_protocol::{VhwaError, VhwaResult};

use crate::color::{ColorFormat, ColorKey};
use crate::dirty_rect::DirtyRect;
use crate::display::{ListId, SurfaceId};
use crate::gl::{GlBackend, GlError};
use crate::program::ProgramManager;
use crate::rect::Rect;
use crate::support_info::GlCaps;
use crate::texture::ImageFlags;
use crate::texture_image::{DisplayParams, TexturedImage};
use crate::vram::{SharedVram, VramError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum KeySource {
    #[default]
    Off,
    Default,
    Overridden,
}

/// An overlay color key slot.
///
/// The active key is either off, the surface's default key or an override. Selecting the
/// default tracks later changes to the default value, while an override is a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayKey {
    source: KeySource,
    default: Option<ColorKey>,
    default_value: ColorKey,
    overridden: ColorKey,
}

impl OverlayKey {
    /// A slot whose active key is `default`.
    pub fn new(default: Option<ColorKey>) -> Self {
        let mut key = Self::default();
        key.set_default(default);
        key.reset_default();
        key
    }

    /// The key in effect.
    pub fn current(&self) -> Option<ColorKey> {
        match self.source {
            KeySource::Off => None,
            KeySource::Default => Some(self.default_value),
            KeySource::Overridden => Some(self.overridden),
        }
    }

    pub fn default_key(&self) -> Option<ColorKey> {
        self.default
    }

    /// Replaces the default. The active key follows if it currently is the default.
    pub fn set_default(&mut self, key: Option<ColorKey>) {
        if let Some(key) = key {
            self.default_value = key;
        }
        self.default = key;
    }

    pub fn set_overridden(&mut self, key: Option<ColorKey>) {
        match key {
            Some(key) => {
                self.overridden = key;
                self.source = KeySource::Overridden;
            }
            None => self.source = KeySource::Off,
        }
    }

    pub fn reset_default(&mut self) {
        self.source = if self.default.is_some() {
            KeySource::Default
        } else {
            KeySource::Off
        };
    }

    /// Whether the active key is exactly the default (both absent counts).
    pub fn is_default(&self) -> bool {
        match self.source {
            KeySource::Off => self.default.is_none(),
            KeySource::Default => self.default.is_some(),
            KeySource::Overridden => false,
        }
    }
}

/// Where a surface's pixels live.
#[derive(Clone)]
pub enum SurfaceMemory {
    /// Guest VRAM at a byte offset.
    Vram { vram: SharedVram, offset: u64 },
    /// A host buffer owned by the surface.
    Host(Vec<u8>),
}

impl SurfaceMemory {
    /// A zeroed host buffer of `len` bytes.
    pub fn host(len: usize) -> Self {
        Self::Host(vec![0u8; len])
    }

    pub fn vram_offset(&self) -> Option<u64> {
        match self {
            Self::Vram { offset, .. } => Some(*offset),
            Self::Host(_) => None,
        }
    }

    /// Runs `f` over the first `len` bytes of the surface's memory.
    pub fn with_bytes<R>(&self, len: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R, VramError> {
        match self {
            Self::Host(buf) => Ok(f(&buf[..len.min(buf.len())])),
            Self::Vram { vram, offset } => {
                let mut f = Some(f);
                let mut out = None;
                vram.with_slice(*offset, len, &mut |bytes| {
                    if let Some(f) = f.take() {
                        out = Some(f(bytes));
                    }
                })?;
                out.ok_or(VramError::OutOfBounds {
                    offset: *offset,
                    len,
                })
            }
        }
    }
}

impl fmt::Debug for SurfaceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vram { offset, .. } => f
                .debug_struct("Vram")
                .field("offset", &format_args!("0x{offset:x}"))
                .finish(),
            Self::Host(buf) => f.debug_tuple("Host").field(&buf.len()).finish(),
        }
    }
}

/// Construction parameters for [`VhwaSurface::new`].
#[derive(Clone, Debug)]
pub struct SurfaceParams {
    pub width: i32,
    pub height: i32,
    pub targ_rect: Rect,
    pub src_rect: Rect,
    pub visible_rect: Rect,
    pub format: ColorFormat,
    pub dst_blt_key: Option<ColorKey>,
    pub src_blt_key: Option<ColorKey>,
    pub dst_overlay_key: Option<ColorKey>,
    pub src_overlay_key: Option<ColorKey>,
    pub flags: ImageFlags,
}

#[derive(Debug)]
pub struct VhwaSurface {
    handle: u32,
    rect: Rect,
    src_rect: Rect,
    targ_rect: Rect,
    vis_src_rect: Rect,
    vis_targ_rect: Rect,
    image: TexturedImage,
    memory: Option<SurfaceMemory>,
    dst_blt_key: Option<ColorKey>,
    src_blt_key: Option<ColorKey>,
    dst_overlay_key: OverlayKey,
    src_overlay_key: OverlayKey,
    lock_count: u32,
    /// Memory changed since the last texture upload.
    dirty: DirtyRect,
    not_intersected: bool,
    list: Option<ListId>,
    primary: Option<SurfaceId>,
}

impl VhwaSurface {
    pub fn new(params: SurfaceParams, caps: &GlCaps) -> Self {
        let rect = Rect::from_size(params.width, params.height);
        let image = TexturedImage::new(rect, params.format, params.flags, caps);
        let mut surface = Self {
            handle: 0,
            rect,
            src_rect: Rect::default(),
            targ_rect: Rect::default(),
            vis_src_rect: Rect::default(),
            vis_targ_rect: Rect::default(),
            image,
            memory: None,
            dst_blt_key: params.dst_blt_key,
            src_blt_key: params.src_blt_key,
            dst_overlay_key: OverlayKey::new(params.dst_overlay_key),
            src_overlay_key: OverlayKey::new(params.src_overlay_key),
            lock_count: 0,
            dirty: DirtyRect::new(),
            not_intersected: false,
            list: None,
            primary: None,
        };
        surface.set_rect_values(params.targ_rect, params.src_rect);
        surface.set_visible_rect_values(params.visible_rect);
        surface
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn set_handle(&mut self, handle: u32) {
        self.handle = handle;
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn width(&self) -> i32 {
        self.rect.w
    }

    pub fn height(&self) -> i32 {
        self.rect.h
    }

    pub fn src_rect(&self) -> Rect {
        self.src_rect
    }

    pub fn targ_rect(&self) -> Rect {
        self.targ_rect
    }

    pub fn visible_targ_rect(&self) -> Rect {
        self.vis_targ_rect
    }

    pub fn visible_src_rect(&self) -> Rect {
        self.vis_src_rect
    }

    pub fn format(&self) -> &ColorFormat {
        self.image.format()
    }

    pub fn image(&self) -> &TexturedImage {
        &self.image
    }

    pub fn bytes_per_line(&self) -> u32 {
        self.image.bytes_per_line()
    }

    pub fn mem_size(&self) -> usize {
        self.image.mem_size()
    }

    pub fn memory(&self) -> Option<&SurfaceMemory> {
        self.memory.as_ref()
    }

    pub fn dirty(&self) -> &DirtyRect {
        &self.dirty
    }

    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    pub fn not_intersected(&self) -> bool {
        self.not_intersected
    }

    pub fn list(&self) -> Option<ListId> {
        self.list
    }

    pub(crate) fn set_list(&mut self, list: Option<ListId>) {
        self.list = list;
    }

    /// The surface this one is composed onto, if it is an overlay that has been positioned.
    pub fn primary(&self) -> Option<SurfaceId> {
        self.primary
    }

    pub fn set_primary(&mut self, primary: Option<SurfaceId>) {
        self.primary = primary;
    }

    pub fn dst_blt_key(&self) -> Option<ColorKey> {
        self.dst_blt_key
    }

    pub fn set_dst_blt_key(&mut self, key: Option<ColorKey>) {
        self.dst_blt_key = key;
    }

    pub fn src_blt_key(&self) -> Option<ColorKey> {
        self.src_blt_key
    }

    pub fn set_src_blt_key(&mut self, key: Option<ColorKey>) {
        self.src_blt_key = key;
    }

    pub fn dst_overlay_key(&self) -> &OverlayKey {
        &self.dst_overlay_key
    }

    pub fn dst_overlay_key_mut(&mut self) -> &mut OverlayKey {
        &mut self.dst_overlay_key
    }

    pub fn src_overlay_key(&self) -> &OverlayKey {
        &self.src_overlay_key
    }

    pub fn src_overlay_key_mut(&mut self) -> &mut OverlayKey {
        &mut self.src_overlay_key
    }

    /// Destination key used when composing onto `primary`.
    ///
    /// An overlay that carries a destination key of its own uses its default value; otherwise
    /// the primary's active destination key applies.
    pub fn active_dst_overlay_key(&self, primary: Option<&VhwaSurface>) -> Option<ColorKey> {
        if self.dst_overlay_key.current().is_some() {
            self.dst_overlay_key.default_key()
        } else {
            primary.and_then(|p| p.dst_overlay_key.current())
        }
    }

    pub fn active_src_overlay_key(&self) -> Option<ColorKey> {
        self.src_overlay_key.current()
    }

    fn set_rect_values(&mut self, targ: Rect, src: Rect) {
        self.targ_rect = targ;
        self.src_rect = self.rect.intersected(&src);
    }

    /// Clips the target to `visible` and maps the clipped edges back into source space.
    fn set_visible_rect_values(&mut self, visible: Rect) {
        self.vis_targ_rect = visible.intersected(&self.targ_rect);
        if self.vis_targ_rect.is_empty() || self.targ_rect.is_empty() {
            self.vis_src_rect = Rect::default();
            return;
        }
        let (t, s, v) = (self.targ_rect, self.src_rect, self.vis_targ_rect);
        let stretch_x = s.w as f32 / t.w as f32;
        let stretch_y = s.h as f32 / t.h as f32;
        let dx1 = v.left() - t.left();
        let dy1 = v.top() - t.top();
        let dx2 = v.right() - t.right();
        let dy2 = v.bottom() - t.bottom();
        self.vis_src_rect = Rect::from_coords(
            s.left() + (dx1 as f32 * stretch_x) as i32,
            s.top() + (dy1 as f32 * stretch_y) as i32,
            s.right() + (dx2 as f32 * stretch_x) as i32,
            s.bottom() + (dy2 as f32 * stretch_y) as i32,
        );
    }

    /// Sets the target and source rects. Visible rects are recomputed by the next
    /// [`VhwaSurface::update_visibility`].
    pub fn set_rects(&mut self, targ: Rect, src: Rect) {
        if self.targ_rect != targ || self.src_rect != src {
            self.set_rect_values(targ, src);
        }
    }

    pub fn set_targ_position(&mut self, x: i32, y: i32) {
        let mut targ = self.targ_rect;
        targ.move_top_left(x, y);
        self.set_rects(targ, self.src_rect);
    }

    /// Clips against `visible` and records how the surface relates to `primary`. The caller
    /// re-initializes the display afterwards.
    pub fn update_visibility(
        &mut self,
        primary: Option<SurfaceId>,
        visible: Rect,
        not_intersected: bool,
        force: bool,
    ) {
        if force || visible.intersected(&self.targ_rect) != self.vis_targ_rect {
            self.set_visible_rect_values(visible);
        }
        self.primary = primary;
        self.not_intersected = not_intersected;
    }

    /// Creates the textures and attaches `memory`; the whole surface is uploaded on the next
    /// display.
    pub fn init<G: GlBackend>(&mut self, gl: &mut G, memory: SurfaceMemory) -> Result<(), GlError> {
        let zeros = vec![0u8; self.mem_size()];
        self.image.init(gl, &zeros)?;
        self.memory = Some(memory);
        self.dirty.set(self.rect);
        Ok(())
    }

    /// Rebinds the surface to `offset` in `vram`. Returns whether the backing moved.
    pub fn set_vram_offset(&mut self, vram: &SharedVram, offset: u64) -> bool {
        if self.memory.as_ref().and_then(SurfaceMemory::vram_offset) == Some(offset) {
            return false;
        }
        self.memory = Some(SurfaceMemory::Vram {
            vram: vram.clone(),
            offset,
        });
        self.dirty.set(self.rect);
        true
    }

    /// Marks `rect` (or the whole surface) as about to be written by the guest.
    pub fn lock(&mut self, rect: Option<Rect>) -> VhwaResult<()> {
        if let Some(r) = rect {
            if !self.rect.contains_rect(&r) {
                return Err(VhwaError::GeneralFailure);
            }
        }
        self.lock_count += 1;
        self.dirty
            .add(rect.map_or(self.rect, |r| self.rect.intersected(&r)));
        Ok(())
    }

    pub fn unlock(&mut self) {
        self.lock_count = 0;
    }

    /// Records guest writes to `rect`; rects outside the surface are ignored.
    pub fn updated_mem(&mut self, rect: Rect) {
        if self.rect.contains_rect(&rect) {
            self.dirty.add(rect);
        } else {
            tracing::debug!(?rect, surface = ?self.rect, "ignoring out-of-surface update");
        }
    }

    /// Uploads pending memory changes if they touch `rect`. Returns whether anything was
    /// uploaded.
    pub fn synch_tex_mem<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        rect: &Rect,
    ) -> bool {
        if !self.rect.contains_rect(rect) {
            return false;
        }
        let Some(dirty) = self.dirty.rect() else {
            return false;
        };
        if !dirty.intersects(rect) {
            return false;
        }
        let Some(memory) = self.memory.as_ref() else {
            return false;
        };
        let image = &mut self.image;
        let uploaded = memory.with_bytes(image.mem_size(), |bytes| {
            image.update(gl, programs, bytes, Some(dirty))
        });
        match uploaded {
            Ok(Ok(())) => {
                self.dirty.clear();
                true
            }
            Ok(Err(err)) => {
                tracing::warn!(handle = self.handle, %err, "texture upload failed");
                false
            }
            Err(err) => {
                tracing::warn!(handle = self.handle, %err, "surface memory unreadable");
                false
            }
        }
    }

    /// What the image should draw given `primary`; `None` when nothing is visible.
    pub fn display_params(&self, primary: Option<&VhwaSurface>) -> Option<DisplayParams> {
        if self.vis_targ_rect.is_empty() || self.vis_src_rect.is_empty() {
            return None;
        }
        Some(DisplayParams {
            dst: primary.map(|p| p.image.binding()),
            dst_rect: self.vis_targ_rect,
            src_rect: self.vis_src_rect,
            dst_ckey: self.active_dst_overlay_key(primary),
            src_ckey: self.active_src_overlay_key(),
            not_intersected: self.not_intersected,
        })
    }

    /// Brings the image's cached display in line with `params`.
    pub fn apply_display<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        params: Option<DisplayParams>,
    ) {
        match params {
            Some(params) => {
                if let Err(err) = self.image.init_display(gl, programs, params) {
                    tracing::warn!(handle = self.handle, %err, "display init failed");
                }
            }
            None => self.image.delete_display(gl),
        }
    }

    pub fn draw<G: GlBackend>(&mut self, gl: &mut G, programs: &mut ProgramManager) {
        self.image.display(gl, programs);
    }

    pub fn delete<G: GlBackend>(&mut self, gl: &mut G) {
        self.image.delete(gl);
        self.memory = None;
    }
}
