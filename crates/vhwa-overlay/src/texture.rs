//! One GL texture holding a single plane of surface memory.

use bitflags::bitflags;

use crate::color::ColorFormat;
use crate::gl::{
    BufferId, DrawOp, GlBackend, GlError, PixelSource, TexFilter, TexImageDesc, TexRegion,
    TexTarget, TextureId,
};
use crate::rect::Rect;
use crate::support_info::GlCaps;

bitflags! {
    /// Upload and filtering strategy requested for an image.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ImageFlags: u32 {
        /// Stream each texture through its own pixel-unpack buffer.
        const PBO = 0x0000_0001;
        /// Stream the whole image through one pixel-unpack buffer.
        const PBOIMG = 0x0000_0002;
        /// Convert through an intermediate RGB framebuffer before stretching.
        const FBO = 0x0000_0004;
        const LINEAR = 0x0000_0008;
    }
}

/// How a texture is allocated and addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    /// 2D texture padded to power-of-two dimensions.
    Plain,
    /// 2D texture of the exact size.
    Np2,
    /// Rectangle texture addressed in texels.
    Np2Rect,
    /// Rectangle texture uploaded through a pixel-unpack buffer.
    Np2RectPbo,
}

impl TextureKind {
    pub fn select(flags: ImageFlags, caps: &GlCaps) -> Self {
        if flags.contains(ImageFlags::PBO) && caps.pbo {
            TextureKind::Np2RectPbo
        } else if caps.texture_rectangle {
            TextureKind::Np2Rect
        } else if caps.texture_np2 {
            TextureKind::Np2
        } else {
            TextureKind::Plain
        }
    }

    pub fn target(self) -> TexTarget {
        match self {
            TextureKind::Plain | TextureKind::Np2 => TexTarget::Texture2d,
            TextureKind::Np2Rect | TextureKind::Np2RectPbo => TexTarget::Rectangle,
        }
    }
}

/// Smallest power of two not below `val`.
pub fn make_power_of_2(val: i32) -> i32 {
    if val <= 2 {
        return val;
    }
    (val as u32).next_power_of_two() as i32
}

/// What a draw needs to sample a texture, detached from the texture itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneBinding {
    pub target: TexTarget,
    pub texture: TextureId,
    tex_width: i32,
    tex_height: i32,
    width_compression: i32,
    height_compression: i32,
}

impl PlaneBinding {
    /// Texture coordinate of surface pixel `(x, y)`.
    pub fn tex_coord(&self, x: i32, y: i32) -> [f32; 2] {
        let (wc, hc) = (self.width_compression, self.height_compression);
        match self.target {
            TexTarget::Rectangle => [(x / wc) as f32, (y / hc) as f32],
            TexTarget::Texture2d => [
                x as f32 / self.tex_width as f32 / wc as f32,
                y as f32 / self.tex_height as f32 / hc as f32,
            ],
        }
    }

    pub fn bind_op(&self, unit: u32) -> DrawOp {
        DrawOp::BindTexture {
            unit,
            target: self.target,
            texture: self.texture,
        }
    }
}

#[derive(Debug)]
pub struct Texture {
    kind: TextureKind,
    id: Option<TextureId>,
    pbo: Option<BufferId>,
    /// Surface pixels covered by this plane.
    rect: Rect,
    /// Allocated texture size in texels.
    tex_rect: Rect,
    format: ColorFormat,
    bytes_per_line: u32,
    filter: TexFilter,
}

impl Texture {
    pub fn new(
        rect: Rect,
        format: ColorFormat,
        bytes_per_line: u32,
        kind: TextureKind,
        filter: TexFilter,
    ) -> Self {
        let wc = format.width_compression() as i32;
        let hc = format.height_compression() as i32;
        let bytes_per_line = if bytes_per_line != 0 {
            bytes_per_line
        } else {
            format.bits_per_pixel() / 8 * rect.w.max(0) as u32
        };
        let (w, h) = (rect.w / wc, rect.h / hc);
        let tex_rect = match kind {
            TextureKind::Plain => Rect::from_size(make_power_of_2(w), make_power_of_2(h)),
            _ => Rect::from_size(w, h),
        };
        Self {
            kind,
            id: None,
            pbo: None,
            rect,
            tex_rect,
            format,
            bytes_per_line,
            filter,
        }
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn id(&self) -> Option<TextureId> {
        self.id
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn tex_rect(&self) -> Rect {
        self.tex_rect
    }

    pub fn bytes_per_line(&self) -> u32 {
        self.bytes_per_line
    }

    pub fn mem_size(&self) -> usize {
        self.bytes_per_line as usize * self.rect.h.max(0) as usize
    }

    pub fn binding(&self) -> Option<PlaneBinding> {
        Some(PlaneBinding {
            target: self.kind.target(),
            texture: self.id?,
            tex_width: self.tex_rect.w,
            tex_height: self.tex_rect.h,
            width_compression: self.format.width_compression() as i32,
            height_compression: self.format.height_compression() as i32,
        })
    }

    fn desc(&self) -> TexImageDesc {
        TexImageDesc {
            target: self.kind.target(),
            internal_format: self.format.internal_format(),
            width: self.tex_rect.w.max(0) as u32,
            height: self.tex_rect.h.max(0) as u32,
            format: self.format.tex_format(),
            ty: self.format.tex_type(),
        }
    }

    /// Allocates the texture (and its unpack buffer) and stages `mem`, this plane's bytes.
    pub fn init<G: GlBackend>(&mut self, gl: &mut G, mem: &[u8]) -> Result<(), GlError> {
        let id = gl.create_texture(self.kind.target(), self.filter)?;
        self.id = Some(id);
        gl.tex_image(id, &self.desc(), None)?;
        if self.kind == TextureKind::Np2RectPbo {
            let pbo = gl.create_buffer(self.mem_size())?;
            self.pbo = Some(pbo);
            if let Err(err) = gl.write_buffer(pbo, 0, plane_bytes(mem, self.mem_size())) {
                tracing::warn!(%err, "initial pixel buffer fill failed");
            }
        }
        Ok(())
    }

    /// Uploads the part of `rect` (or the whole plane) covered by this texture from `mem`.
    pub fn update<G: GlBackend>(
        &mut self,
        gl: &mut G,
        mem: &[u8],
        rect: Option<Rect>,
    ) -> Result<(), GlError> {
        if let Some(pbo) = self.pbo {
            match gl.write_buffer(pbo, 0, plane_bytes(mem, self.mem_size())) {
                Ok(()) => return self.upload_from_buffer(gl, pbo, 0),
                Err(err) => {
                    tracing::warn!(%err, "failed to map PBO, falling back to direct upload");
                }
            }
        }
        self.upload_from_memory(gl, mem, rect)
    }

    pub fn upload_from_memory<G: GlBackend>(
        &mut self,
        gl: &mut G,
        mem: &[u8],
        rect: Option<Rect>,
    ) -> Result<(), GlError> {
        self.upload(gl, PixelSource::Memory(mem), 0, rect)
    }

    /// Uploads the whole plane from `buffer` starting at `base` bytes.
    pub fn upload_from_buffer<G: GlBackend>(
        &mut self,
        gl: &mut G,
        buffer: BufferId,
        base: usize,
    ) -> Result<(), GlError> {
        self.upload(gl, PixelSource::Buffer { buffer, offset: 0 }, base, None)
    }

    fn upload<G: GlBackend>(
        &mut self,
        gl: &mut G,
        src: PixelSource<'_>,
        base: usize,
        rect: Option<Rect>,
    ) -> Result<(), GlError> {
        let Some(id) = self.id else {
            return Err(GlError::InvalidResource {
                kind: "texture",
                id: 0,
            });
        };
        let rect = match rect {
            Some(r) => self.rect.intersected(&r),
            None => self.rect,
        };
        if rect.is_empty() {
            return Ok(());
        }
        let wc = self.format.width_compression() as i32;
        let hc = self.format.height_compression() as i32;
        let (x, y) = (rect.x / wc, rect.y / hc);
        let region = TexRegion {
            x: x.max(0) as u32,
            y: y.max(0) as u32,
            width: (rect.w / wc).max(0) as u32,
            height: (rect.h / hc).max(0) as u32,
            row_length: self.bytes_per_line * 8 / self.format.bits_per_pixel_tex(),
        };
        let offset = base
            + region.y as usize * self.bytes_per_line as usize
            + region.x as usize * (self.format.bits_per_pixel_tex() / 8) as usize;
        let src = match src {
            PixelSource::Memory(mem) => {
                PixelSource::Memory(mem.get(offset..).ok_or(GlError::OutOfBounds {
                    len: offset,
                    capacity: mem.len(),
                })?)
            }
            PixelSource::Buffer { buffer, .. } => PixelSource::Buffer { buffer, offset },
        };
        gl.tex_sub_image(id, &self.desc(), &region, src)
    }

    pub fn delete<G: GlBackend>(&mut self, gl: &mut G) {
        if let Some(pbo) = self.pbo.take() {
            gl.delete_buffer(pbo);
        }
        if let Some(id) = self.id.take() {
            gl.delete_texture(id);
        }
    }
}

fn plane_bytes(mem: &[u8], len: usize) -> &[u8] {
    &mem[..len.min(mem.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{GlEvent, RecordingGl};
    use pretty_assertions::assert_eq;
    use vhwa_protocol::fourcc::FOURCC_YUY2;

    #[test]
    fn power_of_two_padding() {
        assert_eq!(make_power_of_2(1), 1);
        assert_eq!(make_power_of_2(2), 2);
        assert_eq!(make_power_of_2(3), 4);
        assert_eq!(make_power_of_2(640), 1024);
        assert_eq!(make_power_of_2(1024), 1024);
    }

    #[test]
    fn kind_follows_flags_and_caps() {
        let full = GlCaps::full();
        assert_eq!(
            TextureKind::select(ImageFlags::PBO, &full),
            TextureKind::Np2RectPbo
        );
        assert_eq!(
            TextureKind::select(ImageFlags::empty(), &full),
            TextureKind::Np2Rect
        );
        let np2 = GlCaps {
            texture_rectangle: false,
            pbo: false,
            ..full
        };
        assert_eq!(TextureKind::select(ImageFlags::PBO, &np2), TextureKind::Np2);
        let bare = GlCaps {
            texture_np2: false,
            ..np2
        };
        assert_eq!(
            TextureKind::select(ImageFlags::empty(), &bare),
            TextureKind::Plain
        );
    }

    #[test]
    fn compressed_formats_address_texels() {
        let yuy2 = ColorFormat::fourcc(FOURCC_YUY2).unwrap();
        let tex = Texture::new(
            Rect::from_size(64, 8),
            yuy2,
            128,
            TextureKind::Np2Rect,
            TexFilter::Nearest,
        );
        assert_eq!(tex.tex_rect(), Rect::from_size(32, 8));
        assert_eq!(tex.mem_size(), 128 * 8);

        let plain = Texture::new(
            Rect::from_size(6, 6),
            ColorFormat::rgb32(),
            0,
            TextureKind::Plain,
            TexFilter::Linear,
        );
        assert_eq!(plain.tex_rect(), Rect::from_size(8, 8));
        assert_eq!(plain.bytes_per_line(), 24);
    }

    #[test]
    fn texture_coordinates() {
        let mut gl = RecordingGl::new();
        let mem = vec![0u8; 64 * 8 * 4];
        let mut rect_tex = Texture::new(
            Rect::from_size(64, 8),
            ColorFormat::rgb32(),
            0,
            TextureKind::Np2Rect,
            TexFilter::Nearest,
        );
        rect_tex.init(&mut gl, &mem).unwrap();
        assert_eq!(rect_tex.binding().unwrap().tex_coord(32, 4), [32.0, 4.0]);

        let mut plain = Texture::new(
            Rect::from_size(48, 8),
            ColorFormat::rgb32(),
            0,
            TextureKind::Plain,
            TexFilter::Nearest,
        );
        plain.init(&mut gl, &mem).unwrap();
        assert_eq!(plain.binding().unwrap().tex_coord(32, 4), [0.5, 0.5]);
    }

    #[test]
    fn partial_update_uploads_the_clipped_region() {
        let mut gl = RecordingGl::new();
        let mem = vec![0u8; 16 * 16 * 4];
        let mut tex = Texture::new(
            Rect::from_size(16, 16),
            ColorFormat::rgb32(),
            0,
            TextureKind::Np2Rect,
            TexFilter::Nearest,
        );
        tex.init(&mut gl, &mem).unwrap();
        gl.take_events();
        tex.update(&mut gl, &mem, Some(Rect::new(8, 8, 16, 16))).unwrap();
        assert_eq!(
            gl.take_events(),
            vec![GlEvent::TexSubImage {
                texture: tex.id().unwrap(),
                region: TexRegion {
                    x: 8,
                    y: 8,
                    width: 8,
                    height: 8,
                    row_length: 16
                },
                from_buffer: false,
            }]
        );
    }

    #[test]
    fn pbo_upload_falls_back_to_memory_when_mapping_fails() {
        let mut gl = RecordingGl::new();
        let mem = vec![0u8; 4 * 4 * 4];
        let mut tex = Texture::new(
            Rect::from_size(4, 4),
            ColorFormat::rgb32(),
            0,
            TextureKind::Np2RectPbo,
            TexFilter::Nearest,
        );
        tex.init(&mut gl, &mem).unwrap();
        gl.take_events();
        tex.update(&mut gl, &mem, None).unwrap();
        assert!(matches!(
            gl.take_events().as_slice(),
            [
                GlEvent::BufferWrite { .. },
                GlEvent::TexSubImage {
                    from_buffer: true,
                    ..
                }
            ]
        ));

        gl.fail_buffer_map = true;
        tex.update(&mut gl, &mem, Some(Rect::new(0, 0, 2, 2))).unwrap();
        assert!(matches!(
            gl.take_events().as_slice(),
            [GlEvent::TexSubImage {
                from_buffer: false,
                region: TexRegion { width: 2, .. },
                ..
            }]
        ));
    }
}
