//! Pixel layouts and chroma-key ranges.

use vhwa_protocol::fourcc::{FOURCC_AYUV, FOURCC_UYVY, FOURCC_YUY2, FOURCC_YV12};
use vhwa_protocol::vhwa_cmd::{ColorKeyDesc, PixelFormatDesc};
use vhwa_protocol::vhwa_flags::PixelFormatFlags;

use crate::gl::{InternalFormat, TexFormat, TexType};

/// Raw pixel range treated as transparent during composition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ColorKey {
    pub lower: u32,
    pub upper: u32,
}

impl ColorKey {
    pub const fn new(lower: u32, upper: u32) -> Self {
        Self { lower, upper }
    }
}

impl From<ColorKeyDesc> for ColorKey {
    fn from(desc: ColorKeyDesc) -> Self {
        Self::new(desc.low, desc.high)
    }
}

impl From<ColorKey> for ColorKeyDesc {
    fn from(key: ColorKey) -> Self {
        ColorKeyDesc {
            low: key.lower,
            high: key.upper,
        }
    }
}

/// One channel of a packed RGB layout, derived from its bit mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorComponent {
    mask: u32,
    offset: u32,
    bits: u32,
    range: u64,
}

impl Default for ColorComponent {
    fn default() -> Self {
        Self {
            mask: 0,
            offset: 32,
            bits: 0,
            range: 0,
        }
    }
}

impl ColorComponent {
    /// Channel for a contiguous mask. Bits above the first gap are ignored.
    pub fn from_mask(mask: u32) -> Self {
        if mask == 0 {
            return Self::default();
        }
        let offset = mask.trailing_zeros();
        let bits = (!(mask >> offset)).trailing_zeros().min(32 - offset);
        let mask = (u32::MAX >> (32 - bits)) << offset;
        Self {
            mask,
            offset,
            bits,
            range: u64::from(mask >> offset) + 1,
        }
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn range(&self) -> u64 {
        self.range
    }

    pub fn value(&self, pixel: u32) -> u32 {
        if self.mask == 0 {
            return 0;
        }
        (pixel & self.mask) >> self.offset
    }

    /// Channel value scaled by the channel range; 0.0 for an absent channel.
    pub fn normalized(&self, pixel: u32) -> f32 {
        if self.range == 0 {
            return 0.0;
        }
        self.value(pixel) as f32 / self.range as f32
    }
}

/// Layout of one surface's pixels, either packed RGB or a FOURCC.
///
/// FOURCC data is uploaded as 32bpp BGRA texels; `width_compression` is the number of source
/// pixels packed into one texel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorFormat {
    fourcc: u32,
    bits_per_pixel: u32,
    bits_per_pixel_tex: u32,
    width_compression: u32,
    height_compression: u32,
    internal_format: InternalFormat,
    format: TexFormat,
    ty: TexType,
    r: ColorComponent,
    g: ColorComponent,
    b: ColorComponent,
    a: ColorComponent,
}

impl ColorFormat {
    /// Packed RGB layout; `None` for depths the texture path cannot express.
    pub fn rgb(bits_per_pixel: u32, r: u32, g: u32, b: u32) -> Option<Self> {
        let (internal_format, format, r, g, b) = match bits_per_pixel {
            32 => (InternalFormat::Rgb8, TexFormat::Bgra, r, g, b),
            24 => (InternalFormat::Rgb8, TexFormat::Bgr, r, g, b),
            16 => (InternalFormat::Rgb5, TexFormat::Bgr, r, g, b),
            8 => (InternalFormat::Red8, TexFormat::Red, 0xff, 0, 0),
            1 => (InternalFormat::Index1, TexFormat::ColorIndex, 0x1, 0, 0),
            _ => return None,
        };
        let ty = if bits_per_pixel == 1 {
            TexType::Bitmap
        } else {
            TexType::UnsignedByte
        };
        Some(Self {
            fourcc: 0,
            bits_per_pixel,
            bits_per_pixel_tex: bits_per_pixel,
            width_compression: 1,
            height_compression: 1,
            internal_format,
            format,
            ty,
            r: ColorComponent::from_mask(r),
            g: ColorComponent::from_mask(g),
            b: ColorComponent::from_mask(b),
            a: ColorComponent::default(),
        })
    }

    /// FOURCC layout; `None` for codes the shaders cannot convert.
    pub fn fourcc(fourcc: u32) -> Option<Self> {
        let (bits_per_pixel, width_compression) = match fourcc {
            FOURCC_AYUV => (32, 1),
            FOURCC_UYVY | FOURCC_YUY2 => (16, 2),
            FOURCC_YV12 => (8, 4),
            _ => return None,
        };
        let byte = ColorComponent::from_mask(0xff);
        Some(Self {
            fourcc,
            bits_per_pixel,
            bits_per_pixel_tex: 32,
            width_compression,
            height_compression: 1,
            internal_format: InternalFormat::Rgba8,
            format: TexFormat::Bgra,
            ty: TexType::UnsignedByte,
            r: byte,
            g: byte,
            b: byte,
            a: byte,
        })
    }

    /// Plain 32bpp BGRX used for host-allocated fallbacks and FBO intermediates.
    pub fn rgb32() -> Self {
        Self {
            fourcc: 0,
            bits_per_pixel: 32,
            bits_per_pixel_tex: 32,
            width_compression: 1,
            height_compression: 1,
            internal_format: InternalFormat::Rgb8,
            format: TexFormat::Bgra,
            ty: TexType::UnsignedByte,
            r: ColorComponent::from_mask(0x00ff_0000),
            g: ColorComponent::from_mask(0x0000_ff00),
            b: ColorComponent::from_mask(0x0000_00ff),
            a: ColorComponent::default(),
        }
    }

    pub fn from_desc(desc: &PixelFormatDesc) -> Option<Self> {
        if desc.flags.contains(PixelFormatFlags::RGB) {
            Self::rgb(desc.bit_count, desc.r_mask, desc.g_mask, desc.b_mask)
        } else if desc.flags.contains(PixelFormatFlags::FOURCC) {
            Self::fourcc(desc.fourcc)
        } else {
            None
        }
    }

    pub fn to_desc(&self) -> PixelFormatDesc {
        if self.fourcc != 0 {
            return PixelFormatDesc::fourcc(self.fourcc);
        }
        PixelFormatDesc {
            a_mask: self.a.mask(),
            ..PixelFormatDesc::rgb(
                self.bits_per_pixel,
                self.r.mask(),
                self.g.mask(),
                self.b.mask(),
            )
        }
    }

    /// FOURCC code, or 0 for RGB layouts.
    pub fn fourcc_code(&self) -> u32 {
        self.fourcc
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    pub fn bits_per_pixel_tex(&self) -> u32 {
        self.bits_per_pixel_tex
    }

    pub fn width_compression(&self) -> u32 {
        self.width_compression
    }

    pub fn height_compression(&self) -> u32 {
        self.height_compression
    }

    pub fn internal_format(&self) -> InternalFormat {
        self.internal_format
    }

    pub fn tex_format(&self) -> TexFormat {
        self.format
    }

    pub fn tex_type(&self) -> TexType {
        self.ty
    }

    pub fn r(&self) -> &ColorComponent {
        &self.r
    }

    pub fn g(&self) -> &ColorComponent {
        &self.g
    }

    pub fn b(&self) -> &ColorComponent {
        &self.b
    }

    pub fn a(&self) -> &ColorComponent {
        &self.a
    }

    /// FOURCC formats match on the code, RGB formats on depth alone.
    pub fn equals(&self, other: &ColorFormat) -> bool {
        if self.fourcc != 0 {
            return self.fourcc == other.fourcc;
        }
        if other.fourcc != 0 {
            return false;
        }
        self.bits_per_pixel == other.bits_per_pixel
    }

    pub fn pixel_to_normalized(&self, pixel: u32) -> [f32; 3] {
        [
            self.r.normalized(pixel),
            self.g.normalized(pixel),
            self.b.normalized(pixel),
        ]
    }
}
