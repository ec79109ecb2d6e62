//! GL backend abstraction.
//!
//! The compositor is backend-agnostic: every texture upload, program compile and draw goes through
//! [`GlBackend`], which the hosting application implements over its live GL context. All calls
//! happen on the render thread. For tests the crate ships [`RecordingGl`], a headless backend that
//! records what it was asked to do.

mod recording;

use thiserror::Error;

pub use recording::{GlEvent, RecordingGl, UniformValue};

/// Storage layout the driver allocates for a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InternalFormat {
    Rgba8,
    Rgb8,
    Rgb5,
    Red8,
    Index1,
}

/// Client-side layout of uploaded texel rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexFormat {
    Bgra,
    Bgr,
    Red,
    ColorIndex,
}

impl TexFormat {
    pub fn components(self) -> u32 {
        match self {
            TexFormat::Bgra => 4,
            TexFormat::Bgr => 3,
            TexFormat::Red | TexFormat::ColorIndex => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexType {
    UnsignedByte,
    Bitmap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexTarget {
    /// Normalized coordinates, size may be padded to a power of two.
    Texture2d,
    /// Texel coordinates, any size.
    Rectangle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexFilter {
    Nearest,
    Linear,
}

macro_rules! gl_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

gl_id!(
    TextureId,
    BufferId,
    FramebufferId,
    ShaderId,
    ProgramId,
    DisplayId,
    UniformLocation,
);

/// Full allocation of a texture's storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexImageDesc {
    pub target: TexTarget,
    pub internal_format: InternalFormat,
    pub width: u32,
    pub height: u32,
    pub format: TexFormat,
    pub ty: TexType,
}

/// A sub-rectangle upload, in texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Texels per source row.
    pub row_length: u32,
}

/// Where texel data for an upload comes from.
#[derive(Clone, Copy, Debug)]
pub enum PixelSource<'a> {
    Memory(&'a [u8]),
    /// Bytes already staged in a pixel-unpack buffer.
    Buffer { buffer: BufferId, offset: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuadVertex {
    pub position: [i32; 2],
    /// `(texture unit, coordinate)` for every bound unit that samples at this vertex.
    pub tex_coords: Vec<(u32, [f32; 2])>,
}

/// One step of a compiled draw sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawOp {
    BindTexture {
        unit: u32,
        target: TexTarget,
        texture: TextureId,
    },
    Quad([QuadVertex; 4]),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GlError {
    #[error("shader compilation failed: {0}")]
    Compile(String),
    #[error("program link failed: {0}")]
    Link(String),
    #[error("unknown {kind} id {id}")]
    InvalidResource { kind: &'static str, id: u32 },
    #[error("pixel buffer {0} could not be mapped")]
    MapFailed(u32),
    #[error("upload of {len} bytes exceeds the {capacity}-byte buffer")]
    OutOfBounds { len: usize, capacity: usize },
    #[error("backend out of resources: {0}")]
    OutOfResources(&'static str),
}

pub trait GlBackend {
    fn create_texture(&mut self, target: TexTarget, filter: TexFilter)
        -> Result<TextureId, GlError>;
    fn delete_texture(&mut self, texture: TextureId);
    /// (Re)allocates the storage of `texture`, optionally filling it from `src`.
    fn tex_image(
        &mut self,
        texture: TextureId,
        desc: &TexImageDesc,
        src: Option<PixelSource<'_>>,
    ) -> Result<(), GlError>;
    fn tex_sub_image(
        &mut self,
        texture: TextureId,
        desc: &TexImageDesc,
        region: &TexRegion,
        src: PixelSource<'_>,
    ) -> Result<(), GlError>;

    fn create_buffer(&mut self, size_bytes: usize) -> Result<BufferId, GlError>;
    fn delete_buffer(&mut self, buffer: BufferId);
    /// Maps `buffer`, copies `data` at `offset` and unmaps it again.
    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8])
        -> Result<(), GlError>;

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GlError>;
    fn delete_framebuffer(&mut self, fb: FramebufferId);
    fn attach_texture(
        &mut self,
        fb: FramebufferId,
        target: TexTarget,
        texture: TextureId,
    ) -> Result<(), GlError>;
    /// `None` binds the default framebuffer.
    fn bind_framebuffer(&mut self, fb: Option<FramebufferId>);

    /// Compiles one fragment shader from concatenated source fragments.
    fn compile_shader(&mut self, sources: &[&str]) -> Result<ShaderId, GlError>;
    fn delete_shader(&mut self, shader: ShaderId);
    fn link_program(&mut self, shaders: &[ShaderId]) -> Result<ProgramId, GlError>;
    fn delete_program(&mut self, program: ProgramId);
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn use_program(&mut self, program: Option<ProgramId>);
    fn uniform_1i(&mut self, location: UniformLocation, value: i32);
    fn uniform_4f(&mut self, location: UniformLocation, value: [f32; 4]);

    /// Compiles `ops` into a replayable display.
    fn compile_display(&mut self, ops: Vec<DrawOp>) -> Result<DisplayId, GlError>;
    fn delete_display(&mut self, display: DisplayId);
    fn call_display(&mut self, display: DisplayId);
    /// Executes `ops` immediately.
    fn draw(&mut self, ops: &[DrawOp]);

    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    /// Sets up an orthographic projection of `width`x`height` pixels.
    fn setup_matrix(&mut self, width: i32, height: i32, inverted: bool);
}
