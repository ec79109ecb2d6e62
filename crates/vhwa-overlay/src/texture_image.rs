//! A surface's pixels as one or three textures, plus the cached draw into its destination.

use std::sync::atomic::{AtomicU64, Ordering};

use vhwa_protocol::fourcc::FOURCC_YV12;

use crate::color::{ColorFormat, ColorKey};
use crate::gl::{
    BufferId, DisplayId, DrawOp, FramebufferId, GlBackend, GlError, QuadVertex, TexFilter,
};
use crate::program::{ProgramFeatures, ProgramKey, ProgramManager};
use crate::rect::Rect;
use crate::support_info::GlCaps;
use crate::texture::{ImageFlags, PlaneBinding, Texture, TextureKind};

/// Identity of a [`TexturedImage`] for display-cache comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageId(u64);

impl ImageId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Row pitch the guest must use for `width` pixels of `format`.
pub fn calc_bytes_per_line(format: &ColorFormat, width: i32) -> u32 {
    let pitch = (format.bits_per_pixel() * width.max(0) as u32 + 7) / 8;
    if format.fourcc_code() == FOURCC_YV12 {
        // Chroma rows are half a luma row and must still hold whole 4-byte texels.
        (pitch + 7) & !7
    } else {
        (pitch + 3) & !3
    }
}

/// Bytes of guest memory a `width`x`height` surface of `format` occupies.
pub fn calc_mem_size(format: &ColorFormat, width: i32, height: i32) -> u32 {
    let pitch = calc_bytes_per_line(format, width);
    let height = height.max(0) as u32;
    if format.fourcc_code() == FOURCC_YV12 {
        3 * pitch * height / 2
    } else {
        pitch * height
    }
}

/// What a draw into an image needs to know about it, detached from the image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBinding {
    pub id: ImageId,
    pub format: ColorFormat,
    planes: Vec<PlaneBinding>,
}

impl ImageBinding {
    /// Pushes this image's coordinates for `(x, y)` starting at `unit`; returns the units used.
    fn tex_coords(&self, unit: u32, x: i32, y: i32, out: &mut Vec<(u32, [f32; 2])>) -> u32 {
        let Some(first) = self.planes.first() else {
            return 0;
        };
        out.push((unit, first.tex_coord(x, y)));
        match self.planes.get(1) {
            Some(chroma) if self.format.fourcc_code() == FOURCC_YV12 => {
                out.push((unit + 1, chroma.tex_coord(x / 2, y / 2)));
                2
            }
            _ => 1,
        }
    }

    /// Chroma planes first, then the destination after them, plane 0 on unit 0 last.
    fn bind_ops(&self, dst: Option<&ImageBinding>, ops: &mut Vec<DrawOp>) {
        let n = self.planes.len() as u32;
        for (i, plane) in self.planes.iter().enumerate().skip(1) {
            ops.push(plane.bind_op(i as u32));
        }
        if let Some(dst) = dst {
            for (i, plane) in dst.planes.iter().enumerate() {
                ops.push(plane.bind_op(i as u32 + n));
            }
        }
        if let Some(first) = self.planes.first() {
            ops.push(first.bind_op(0));
        }
    }

    fn draw_ops(
        &self,
        dst: Option<&ImageBinding>,
        dst_rect: &Rect,
        src_rect: &Rect,
    ) -> Vec<DrawOp> {
        let mut ops = Vec::new();
        self.bind_ops(dst, &mut ops);

        let (tx1, ty1) = (src_rect.left(), src_rect.top());
        let (tx2, ty2) = (src_rect.right() + 1, src_rect.bottom() + 1);
        let (bx1, by1) = (dst_rect.left(), dst_rect.top());
        let (bx2, by2) = (dst_rect.right() + 1, dst_rect.bottom() + 1);

        let vertex = |tx: i32, ty: i32, bx: i32, by: i32| {
            let mut tex_coords = Vec::new();
            let used = self.tex_coords(0, tx, ty, &mut tex_coords);
            if let Some(dst) = dst {
                dst.tex_coords(used, bx, by, &mut tex_coords);
            }
            QuadVertex {
                position: [bx, by],
                tex_coords,
            }
        };
        ops.push(DrawOp::Quad([
            vertex(tx1, ty1, bx1, by1),
            vertex(tx1, ty2, bx1, by2),
            vertex(tx2, ty2, bx2, by2),
            vertex(tx2, ty1, bx2, by1),
        ]));
        ops
    }
}

/// How an image is composed onto its destination.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplayParams {
    /// Destination sampled for keying; `None` draws without reading it.
    pub dst: Option<ImageBinding>,
    pub dst_rect: Rect,
    pub src_rect: Rect,
    pub dst_ckey: Option<ColorKey>,
    pub src_ckey: Option<ColorKey>,
    /// No other overlay covers the destination, so unkeyed pixels show the destination itself.
    pub not_intersected: bool,
}

/// The compile-relevant part of [`DisplayParams`]. Key values live in uniforms and do not count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct DisplayKey {
    dst: Option<ImageId>,
    dst_rect: Rect,
    src_rect: Rect,
    dst_ckey: bool,
    src_ckey: bool,
    not_intersected: bool,
    program: Option<ProgramKey>,
}

impl DisplayKey {
    fn new(params: &DisplayParams, program: Option<ProgramKey>) -> Self {
        Self {
            dst: params.dst.as_ref().map(|d| d.id),
            dst_rect: params.dst_rect,
            src_rect: params.src_rect,
            dst_ckey: params.dst_ckey.is_some(),
            src_ckey: params.src_ckey.is_some(),
            not_intersected: params.not_intersected,
            program,
        }
    }
}

#[derive(Debug)]
struct DisplayCache {
    params: DisplayParams,
    display: Option<DisplayId>,
    program: Option<ProgramKey>,
}

/// Intermediate pass converting the image into a plain RGB texture that is then stretched.
#[derive(Debug)]
struct FboPass {
    fb: Option<FramebufferId>,
    target: TexturedImage,
    mem: Vec<u8>,
}

#[derive(Debug)]
pub struct TexturedImage {
    id: ImageId,
    planes: Vec<Texture>,
    format: ColorFormat,
    flags: ImageFlags,
    /// Whole-image unpack buffer when uploads go through [`ImageFlags::PBOIMG`].
    pbo: Option<BufferId>,
    fbo: Option<Box<FboPass>>,
    cache: Option<DisplayCache>,
}

impl TexturedImage {
    /// Builds an image for `size`, dropping any `flags` the context cannot honor.
    pub fn new(size: Rect, format: ColorFormat, mut flags: ImageFlags, caps: &GlCaps) -> Self {
        let mut can_linear_non_fbo = false;
        if format.fourcc_code() == 0 {
            flags.remove(ImageFlags::FBO);
            can_linear_non_fbo = true;
        }
        if !caps.pbo {
            flags.remove(ImageFlags::PBO);
        }
        if !(caps.pbo && caps.pbo_offset) {
            flags.remove(ImageFlags::PBOIMG);
        }
        if !caps.fbo {
            flags.remove(ImageFlags::FBO);
        }
        if flags.contains(ImageFlags::PBOIMG) {
            flags.remove(ImageFlags::PBO);
        }

        if flags.contains(ImageFlags::FBO) {
            let inner_flags = flags - (ImageFlags::FBO | ImageFlags::LINEAR);
            let mut image = Self::with_planes(size, format, inner_flags, caps);
            let target = Self::new(size, ColorFormat::rgb32(), flags - ImageFlags::FBO, caps);
            image.fbo = Some(Box::new(FboPass {
                fb: None,
                target,
                mem: Vec::new(),
            }));
            return image;
        }
        if !can_linear_non_fbo {
            flags.remove(ImageFlags::LINEAR);
        }
        Self::with_planes(size, format, flags, caps)
    }

    fn with_planes(size: Rect, format: ColorFormat, flags: ImageFlags, caps: &GlCaps) -> Self {
        let pitch = calc_bytes_per_line(&format, size.w);
        let kind = TextureKind::select(flags, caps);
        let filter = if flags.contains(ImageFlags::LINEAR) {
            TexFilter::Linear
        } else {
            TexFilter::Nearest
        };
        let mut planes = vec![Texture::new(size, format, pitch, kind, filter)];
        if format.fourcc_code() == FOURCC_YV12 {
            let half = Rect::new(size.x / 2, size.y / 2, size.w / 2, size.h / 2);
            planes.push(Texture::new(half, format, pitch / 2, kind, filter));
            planes.push(Texture::new(half, format, pitch / 2, kind, filter));
        }
        Self {
            id: ImageId::next(),
            planes,
            format,
            flags,
            pbo: None,
            fbo: None,
            cache: None,
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn flags(&self) -> ImageFlags {
        self.flags
    }

    pub fn has_fbo_pass(&self) -> bool {
        self.fbo.is_some()
    }

    pub fn rect(&self) -> Rect {
        self.planes[0].rect()
    }

    pub fn format(&self) -> &ColorFormat {
        &self.format
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, i: usize) -> Option<&Texture> {
        self.planes.get(i)
    }

    pub fn bytes_per_line(&self) -> u32 {
        self.planes[0].bytes_per_line()
    }

    pub fn mem_size(&self) -> usize {
        self.planes.iter().map(Texture::mem_size).sum()
    }

    pub fn binding(&self) -> ImageBinding {
        ImageBinding {
            id: self.id,
            format: self.format,
            planes: self.planes.iter().filter_map(Texture::binding).collect(),
        }
    }

    /// Whether a compiled display is ready for [`TexturedImage::display`].
    pub fn display_initialized(&self) -> bool {
        match self.fbo.as_deref() {
            Some(pass) => pass.target.display_initialized(),
            None => self.cache.as_ref().is_some_and(|c| c.display.is_some()),
        }
    }

    /// Creates the textures and stages `mem`, the image's bytes laid out plane after plane.
    pub fn init<G: GlBackend>(&mut self, gl: &mut G, mem: &[u8]) -> Result<(), GlError> {
        if let Some(pass) = self.fbo.as_deref_mut() {
            pass.fb = Some(gl.create_framebuffer()?);
            pass.mem = vec![0u8; pass.target.mem_size()];
            pass.target.init(gl, &pass.mem)?;
        }
        let mut off = 0;
        for plane in &mut self.planes {
            let size = plane.mem_size();
            plane.init(gl, sub_slice(mem, off, size))?;
            off += size;
        }
        if self.flags.contains(ImageFlags::PBOIMG) {
            let pbo = gl.create_buffer(self.mem_size())?;
            self.pbo = Some(pbo);
            if let Err(err) = gl.write_buffer(pbo, 0, sub_slice(mem, 0, self.mem_size())) {
                tracing::warn!(%err, "initial image buffer fill failed");
            }
        }
        if let Some(pass) = self.fbo.as_deref() {
            let plane = &pass.target.planes[0];
            if let (Some(fb), Some(tex)) = (pass.fb, plane.id()) {
                gl.attach_texture(fb, plane.kind().target(), tex)?;
            }
        }
        Ok(())
    }

    /// Uploads `rect` (or everything) from `mem` into the textures.
    pub fn update<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        mem: &[u8],
        rect: Option<Rect>,
    ) -> Result<(), GlError> {
        self.update_planes(gl, mem, rect)?;
        if let Some(fb) = self.fbo.as_deref().and_then(|p| p.fb) {
            let r = self.rect();
            gl.set_viewport(0, 0, r.w, r.h);
            gl.setup_matrix(r.w, r.h, false);
            gl.bind_framebuffer(Some(fb));
            self.display_own(gl, programs);
            gl.bind_framebuffer(None);
        }
        Ok(())
    }

    fn update_planes<G: GlBackend>(
        &mut self,
        gl: &mut G,
        mem: &[u8],
        rect: Option<Rect>,
    ) -> Result<(), GlError> {
        if let Some(pbo) = self.pbo {
            match gl.write_buffer(pbo, 0, sub_slice(mem, 0, self.mem_size())) {
                Ok(()) => {
                    let mut off = 0;
                    for plane in &mut self.planes {
                        plane.upload_from_buffer(gl, pbo, off)?;
                        off += plane.mem_size();
                    }
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to map image PBO, falling back to direct upload");
                }
            }
        }

        let y_size = self.planes[0].mem_size();
        self.planes[0].update(gl, sub_slice(mem, 0, y_size), rect)?;
        if self.format.fourcc_code() == FOURCC_YV12 {
            let half = rect.map(|r| Rect::new(r.x / 2, r.y / 2, r.w / 2, r.h / 2));
            let mut off = y_size;
            for plane in &mut self.planes[1..] {
                let size = plane.mem_size();
                plane.update(gl, sub_slice(mem, off, size), half)?;
                off += size;
            }
        }
        Ok(())
    }

    fn calc_program<G: GlBackend>(
        &self,
        gl: &mut G,
        programs: &mut ProgramManager,
        params: &DisplayParams,
    ) -> Option<ProgramKey> {
        // Source keys take part in the display key but are never shaded.
        let keyed = params.dst_ckey.is_some();
        let mut features = ProgramFeatures::empty();
        features.set(ProgramFeatures::DST_COLORKEY, keyed);
        features.set(
            ProgramFeatures::COLORKEY_NODISCARD,
            keyed && params.not_intersected,
        );
        programs.get(gl, features, &self.format)
    }

    /// Makes the display match `params`, recompiling only when something other than a key
    /// value changed.
    pub fn init_display<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        mut params: DisplayParams,
    ) -> Result<(), GlError> {
        if params.dst.is_none() {
            params.dst_ckey = None;
        }

        if self.fbo.is_some() {
            let rect = self.rect();
            let raw = DisplayParams {
                dst_rect: rect,
                src_rect: rect,
                ..DisplayParams::default()
            };
            self.init_own_display(gl, programs, raw)?;
            if let Some(pass) = self.fbo.as_deref_mut() {
                pass.target.init_display(gl, programs, params)?;
            }
            return Ok(());
        }
        self.init_own_display(gl, programs, params)
    }

    fn init_own_display<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        params: DisplayParams,
    ) -> Result<(), GlError> {
        let program = self.calc_program(gl, programs, &params);
        let wanted = DisplayKey::new(&params, program);
        let reusable = self.cache.as_ref().is_some_and(|c| {
            c.display.is_some() && DisplayKey::new(&c.params, c.program) == wanted
        });
        if !reusable {
            return self.create_set_display(gl, programs, params);
        }

        let Some(cache) = self.cache.as_mut() else {
            return Ok(());
        };
        if cache.params.dst_ckey != params.dst_ckey {
            let dst_format = params.dst.as_ref().map(|d| d.format);
            update_ckeys(
                gl,
                programs,
                cache.program,
                &self.format,
                dst_format.as_ref(),
                &params,
            );
        }
        cache.params = params;
        Ok(())
    }

    fn create_set_display<G: GlBackend>(
        &mut self,
        gl: &mut G,
        programs: &mut ProgramManager,
        params: DisplayParams,
    ) -> Result<(), GlError> {
        self.delete_display(gl);
        let program = self.calc_program(gl, programs, &params);
        let dst_format = params.dst.as_ref().map(|d| d.format);
        update_ckeys(
            gl,
            programs,
            program,
            &self.format,
            dst_format.as_ref(),
            &params,
        );
        let ops = self
            .binding()
            .draw_ops(params.dst.as_ref(), &params.dst_rect, &params.src_rect);
        let compiled = gl.compile_display(ops);
        let (display, program) = match &compiled {
            Ok(display) => (Some(*display), program),
            Err(_) => (None, None),
        };
        self.cache = Some(DisplayCache {
            params,
            display,
            program,
        });
        compiled.map(|_| ())
    }

    /// Drops the compiled display; the parameters are kept for immediate-mode drawing.
    pub fn delete_display<G: GlBackend>(&mut self, gl: &mut G) {
        if let Some(cache) = self.cache.as_mut() {
            if let Some(display) = cache.display.take() {
                gl.delete_display(display);
            }
            cache.program = None;
        }
    }

    /// Draws with the current display parameters.
    pub fn display<G: GlBackend>(&mut self, gl: &mut G, programs: &mut ProgramManager) {
        if let Some(pass) = self.fbo.as_deref_mut() {
            pass.target.display(gl, programs);
            return;
        }
        self.display_own(gl, programs);
    }

    fn display_own<G: GlBackend>(&mut self, gl: &mut G, programs: &mut ProgramManager) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Some(display) = cache.display {
            if let Some(program) = cache.program {
                programs.start(gl, program);
            }
            gl.call_display(display);
            if cache.program.is_some() {
                programs.stop(gl);
            }
            return;
        }

        let params = cache.params.clone();
        let program = self.calc_program(gl, programs, &params);
        if let Some(program) = program {
            programs.start(gl, program);
        }
        let ops = self
            .binding()
            .draw_ops(params.dst.as_ref(), &params.dst_rect, &params.src_rect);
        gl.draw(&ops);
        if program.is_some() {
            programs.stop(gl);
        }
    }

    pub fn delete<G: GlBackend>(&mut self, gl: &mut G) {
        self.delete_display(gl);
        self.cache = None;
        for plane in &mut self.planes {
            plane.delete(gl);
        }
        if let Some(pbo) = self.pbo.take() {
            gl.delete_buffer(pbo);
        }
        if let Some(mut pass) = self.fbo.take() {
            pass.target.delete(gl);
            if let Some(fb) = pass.fb.take() {
                gl.delete_framebuffer(fb);
            }
        }
    }
}

fn sub_slice(mem: &[u8], off: usize, len: usize) -> &[u8] {
    let start = off.min(mem.len());
    let end = off.saturating_add(len).min(mem.len());
    &mem[start..end]
}

/// Loads key bounds into `program` as normalized colors of the format each key applies to.
fn update_ckeys<G: GlBackend>(
    gl: &mut G,
    programs: &mut ProgramManager,
    program: Option<ProgramKey>,
    src_format: &ColorFormat,
    dst_format: Option<&ColorFormat>,
    params: &DisplayParams,
) {
    let Some(key) = program else {
        return;
    };
    programs.start(gl, key);
    if let Some(p) = programs.program_mut(key) {
        if let Some(ck) = params.src_ckey {
            p.set_ckey_lower(gl, false, src_format.pixel_to_normalized(ck.lower));
        }
        if let (Some(ck), Some(fmt)) = (params.dst_ckey, dst_format) {
            p.set_ckey_lower(gl, true, fmt.pixel_to_normalized(ck.lower));
        }
    }
    programs.stop(gl);
}
