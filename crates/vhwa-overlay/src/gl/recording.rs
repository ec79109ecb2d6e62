use hashbrown::HashMap;

use super::{
    BufferId, DisplayId, DrawOp, FramebufferId, GlBackend, GlError, PixelSource, ProgramId,
    ShaderId, TexFilter, TexImageDesc, TexRegion, TexTarget, TextureId, UniformLocation,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Vec4([f32; 4]),
}

/// Side effects a [`RecordingGl`] observed, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum GlEvent {
    TexImage {
        texture: TextureId,
        width: u32,
        height: u32,
    },
    TexSubImage {
        texture: TextureId,
        region: TexRegion,
        from_buffer: bool,
    },
    BufferWrite {
        buffer: BufferId,
        len: usize,
    },
    BindFramebuffer(Option<FramebufferId>),
    UseProgram(Option<ProgramId>),
    CallDisplay(DisplayId),
    Draw(Vec<DrawOp>),
    Viewport([i32; 4]),
}

/// Headless backend that keeps every object in host memory.
///
/// Uniform locations resolve when the linked source mentions the name, so the shader generator is
/// checked against the names the program manager binds. The `fail_*` knobs and
/// `missing_uniforms` simulate driver failures.
#[derive(Debug, Default)]
pub struct RecordingGl {
    next_id: u32,
    textures: HashMap<TextureId, Option<TexImageDesc>>,
    buffers: HashMap<BufferId, Vec<u8>>,
    framebuffers: HashMap<FramebufferId, Option<TextureId>>,
    shaders: HashMap<ShaderId, String>,
    programs: HashMap<ProgramId, String>,
    locations: HashMap<UniformLocation, (ProgramId, String)>,
    uniforms: HashMap<UniformLocation, UniformValue>,
    displays: HashMap<DisplayId, Vec<DrawOp>>,
    display_compilations: usize,
    events: Vec<GlEvent>,

    pub fail_compile: bool,
    pub fail_link: bool,
    pub missing_uniforms: Vec<String>,
    pub fail_buffer_map: bool,
}

impl RecordingGl {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Number of displays compiled since creation.
    pub fn display_compilations(&self) -> usize {
        self.display_compilations
    }

    pub fn live_displays(&self) -> usize {
        self.displays.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<TexImageDesc> {
        self.textures.get(&texture).copied().flatten()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn display_ops(&self, display: DisplayId) -> Option<&[DrawOp]> {
        self.displays.get(&display).map(Vec::as_slice)
    }

    pub fn program_source(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(String::as_str)
    }

    /// Last value set for `name` in `program`.
    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let (loc, _) = self
            .locations
            .iter()
            .find(|(_, (p, n))| *p == program && n == name)?;
        self.uniforms.get(loc).copied()
    }

    pub fn events(&self) -> &[GlEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<GlEvent> {
        std::mem::take(&mut self.events)
    }

    fn check_source(&self, src: &PixelSource<'_>) -> Result<bool, GlError> {
        match *src {
            PixelSource::Memory(_) => Ok(false),
            PixelSource::Buffer { buffer, offset } => {
                let data = self.buffers.get(&buffer).ok_or(GlError::InvalidResource {
                    kind: "buffer",
                    id: buffer.0,
                })?;
                if offset > data.len() {
                    return Err(GlError::OutOfBounds {
                        len: offset,
                        capacity: data.len(),
                    });
                }
                Ok(true)
            }
        }
    }
}

impl GlBackend for RecordingGl {
    fn create_texture(
        &mut self,
        _target: TexTarget,
        _filter: TexFilter,
    ) -> Result<TextureId, GlError> {
        let id = TextureId(self.alloc());
        self.textures.insert(id, None);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn tex_image(
        &mut self,
        texture: TextureId,
        desc: &TexImageDesc,
        src: Option<PixelSource<'_>>,
    ) -> Result<(), GlError> {
        if let Some(src) = &src {
            self.check_source(src)?;
        }
        let slot = self
            .textures
            .get_mut(&texture)
            .ok_or(GlError::InvalidResource {
                kind: "texture",
                id: texture.0,
            })?;
        *slot = Some(*desc);
        self.events.push(GlEvent::TexImage {
            texture,
            width: desc.width,
            height: desc.height,
        });
        Ok(())
    }

    fn tex_sub_image(
        &mut self,
        texture: TextureId,
        _desc: &TexImageDesc,
        region: &TexRegion,
        src: PixelSource<'_>,
    ) -> Result<(), GlError> {
        let from_buffer = self.check_source(&src)?;
        if !self.textures.contains_key(&texture) {
            return Err(GlError::InvalidResource {
                kind: "texture",
                id: texture.0,
            });
        }
        self.events.push(GlEvent::TexSubImage {
            texture,
            region: *region,
            from_buffer,
        });
        Ok(())
    }

    fn create_buffer(&mut self, size_bytes: usize) -> Result<BufferId, GlError> {
        let id = BufferId(self.alloc());
        self.buffers.insert(id, vec![0u8; size_bytes]);
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn write_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), GlError> {
        if self.fail_buffer_map {
            return Err(GlError::MapFailed(buffer.0));
        }
        let store = self.buffers.get_mut(&buffer).ok_or(GlError::InvalidResource {
            kind: "buffer",
            id: buffer.0,
        })?;
        let capacity = store.len();
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= capacity)
            .ok_or(GlError::OutOfBounds {
                len: data.len(),
                capacity,
            })?;
        store[offset..end].copy_from_slice(data);
        self.events.push(GlEvent::BufferWrite {
            buffer,
            len: data.len(),
        });
        Ok(())
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GlError> {
        let id = FramebufferId(self.alloc());
        self.framebuffers.insert(id, None);
        Ok(id)
    }

    fn delete_framebuffer(&mut self, fb: FramebufferId) {
        self.framebuffers.remove(&fb);
    }

    fn attach_texture(
        &mut self,
        fb: FramebufferId,
        _target: TexTarget,
        texture: TextureId,
    ) -> Result<(), GlError> {
        if !self.textures.contains_key(&texture) {
            return Err(GlError::InvalidResource {
                kind: "texture",
                id: texture.0,
            });
        }
        let slot = self
            .framebuffers
            .get_mut(&fb)
            .ok_or(GlError::InvalidResource {
                kind: "framebuffer",
                id: fb.0,
            })?;
        *slot = Some(texture);
        Ok(())
    }

    fn bind_framebuffer(&mut self, fb: Option<FramebufferId>) {
        self.events.push(GlEvent::BindFramebuffer(fb));
    }

    fn compile_shader(&mut self, sources: &[&str]) -> Result<ShaderId, GlError> {
        if self.fail_compile {
            return Err(GlError::Compile("simulated compile failure".into()));
        }
        let id = ShaderId(self.alloc());
        self.shaders.insert(id, sources.concat());
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn link_program(&mut self, shaders: &[ShaderId]) -> Result<ProgramId, GlError> {
        if self.fail_link {
            return Err(GlError::Link("simulated link failure".into()));
        }
        let mut source = String::new();
        for shader in shaders {
            let text = self.shaders.get(shader).ok_or(GlError::InvalidResource {
                kind: "shader",
                id: shader.0,
            })?;
            source.push_str(text);
        }
        let id = ProgramId(self.alloc());
        self.programs.insert(id, source);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.locations.retain(|_, (p, _)| *p != program);
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        if self.missing_uniforms.iter().any(|m| m == name) {
            return None;
        }
        if !self.programs.get(&program)?.contains(name) {
            return None;
        }
        if let Some((loc, _)) = self
            .locations
            .iter()
            .find(|(_, (p, n))| *p == program && n == name)
        {
            return Some(*loc);
        }
        let loc = UniformLocation(self.alloc());
        self.locations.insert(loc, (program, name.to_owned()));
        Some(loc)
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.events.push(GlEvent::UseProgram(program));
    }

    fn uniform_1i(&mut self, location: UniformLocation, value: i32) {
        self.uniforms.insert(location, UniformValue::Int(value));
    }

    fn uniform_4f(&mut self, location: UniformLocation, value: [f32; 4]) {
        self.uniforms.insert(location, UniformValue::Vec4(value));
    }

    fn compile_display(&mut self, ops: Vec<DrawOp>) -> Result<DisplayId, GlError> {
        let id = DisplayId(self.alloc());
        self.displays.insert(id, ops);
        self.display_compilations += 1;
        Ok(id)
    }

    fn delete_display(&mut self, display: DisplayId) {
        self.displays.remove(&display);
    }

    fn call_display(&mut self, display: DisplayId) {
        self.events.push(GlEvent::CallDisplay(display));
    }

    fn draw(&mut self, ops: &[DrawOp]) {
        self.events.push(GlEvent::Draw(ops.to_vec()));
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.events.push(GlEvent::Viewport([x, y, width, height]));
    }

    fn setup_matrix(&mut self, _width: i32, _height: i32, _inverted: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_locations_follow_program_source() {
        let mut gl = RecordingGl::new();
        let sh = gl
            .compile_shader(&["uniform sampler2DRect uSrcTex;", "void main(){}"])
            .unwrap();
        let prog = gl.link_program(&[sh]).unwrap();
        let loc = gl.uniform_location(prog, "uSrcTex").unwrap();
        assert_eq!(gl.uniform_location(prog, "uSrcTex"), Some(loc));
        assert_eq!(gl.uniform_location(prog, "uDstTex"), None);

        gl.uniform_1i(loc, 0);
        assert_eq!(gl.uniform(prog, "uSrcTex"), Some(UniformValue::Int(0)));

        gl.missing_uniforms.push("uSrcTex".into());
        assert_eq!(gl.uniform_location(prog, "uSrcTex"), None);
    }

    #[test]
    fn buffer_writes_are_bounds_checked_and_can_fail_to_map() {
        let mut gl = RecordingGl::new();
        let buf = gl.create_buffer(4).unwrap();
        gl.write_buffer(buf, 1, &[7, 8]).unwrap();
        assert_eq!(gl.buffer_contents(buf), Some(&[0, 7, 8, 0][..]));
        assert!(matches!(
            gl.write_buffer(buf, 3, &[1, 2]).unwrap_err(),
            GlError::OutOfBounds { .. }
        ));
        gl.fail_buffer_map = true;
        assert_eq!(gl.write_buffer(buf, 0, &[1]), Err(GlError::MapFailed(buf.0)));
    }

    #[test]
    fn compiling_displays_is_counted() {
        let mut gl = RecordingGl::new();
        let d = gl.compile_display(Vec::new()).unwrap();
        gl.compile_display(Vec::new()).unwrap();
        gl.delete_display(d);
        assert_eq!(gl.display_compilations(), 2);
        assert_eq!(gl.live_displays(), 1);
    }
}
