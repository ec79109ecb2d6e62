//! Compiled compositing programs, cached by feature set and source FOURCC.

use bitflags::bitflags;
use hashbrown::HashMap;
use vhwa_protocol::fourcc::{fourcc_name, FOURCC_YV12};

use crate::color::ColorFormat;
use crate::gl::{GlBackend, GlError, ProgramId, UniformLocation};
use crate::shaders;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ProgramFeatures: u32 {
        const DST_COLORKEY = 0x0000_0001;
        const SRC_COLORKEY = 0x0000_0002;
        const COLORCONV = 0x0000_0004;
        /// Draw the destination where the key does not match instead of discarding.
        const COLORKEY_NODISCARD = 0x0000_0008;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub features: ProgramFeatures,
    pub fourcc: u32,
}

#[derive(Debug)]
pub struct VhwaProgram {
    id: ProgramId,
    features: ProgramFeatures,
    fourcc: u32,
    dst_clr: Option<UniformLocation>,
    src_clr: Option<UniformLocation>,
    dst_lower: [f32; 3],
    src_lower: [f32; 3],
}

impl VhwaProgram {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn features(&self) -> ProgramFeatures {
        self.features
    }

    pub fn fourcc(&self) -> u32 {
        self.fourcc
    }

    /// Sets the lower bound of the destination (`dst`) or source key. Returns whether the
    /// uniform changed. The program must be in use.
    pub fn set_ckey_lower<G: GlBackend>(&mut self, gl: &mut G, dst: bool, rgb: [f32; 3]) -> bool {
        let (loc, cur) = if dst {
            (self.dst_clr, &mut self.dst_lower)
        } else {
            (self.src_clr, &mut self.src_lower)
        };
        let Some(loc) = loc else {
            return false;
        };
        if *cur == rgb {
            return false;
        }
        gl.uniform_4f(loc, [rgb[0], rgb[1], rgb[2], 0.0]);
        *cur = rgb;
        true
    }

    fn create<G: GlBackend>(
        gl: &mut G,
        features: ProgramFeatures,
        fourcc: u32,
    ) -> Result<Self, GlError> {
        let (fragments, features) = shaders::assemble(features, fourcc);
        let sources: Vec<&str> = fragments.iter().map(|f| f.source()).collect();
        let shader = gl.compile_shader(&sources)?;
        let linked = gl.link_program(&[shader]);
        gl.delete_shader(shader);
        let id = linked?;

        let mut program = Self {
            id,
            features,
            fourcc,
            dst_clr: None,
            src_clr: None,
            dst_lower: [0.0; 3],
            src_lower: [0.0; 3],
        };
        gl.use_program(Some(id));
        let bound = program.bind_uniforms(gl);
        gl.use_program(None);
        if let Err(err) = bound {
            gl.delete_program(id);
            return Err(err);
        }
        Ok(program)
    }

    /// Assigns texture units in bind order: source, YV12 chroma planes, then the destination.
    fn bind_uniforms<G: GlBackend>(&mut self, gl: &mut G) -> Result<(), GlError> {
        let id = self.id;
        let mut unit = 0;
        let mut sampler = |gl: &mut G, name: &'static str| -> Result<(), GlError> {
            let loc = locate(gl, id, name)?;
            gl.uniform_1i(loc, unit);
            unit += 1;
            Ok(())
        };

        sampler(gl, "uSrcTex")?;
        if self.features.contains(ProgramFeatures::COLORCONV) && self.fourcc == FOURCC_YV12 {
            sampler(gl, "uVTex")?;
            sampler(gl, "uUTex")?;
        }
        if self.features.contains(ProgramFeatures::DST_COLORKEY) {
            sampler(gl, "uDstTex")?;
            let loc = locate(gl, id, "uDstClr")?;
            gl.uniform_4f(loc, [0.0; 4]);
            self.dst_clr = Some(loc);
        }
        if self.features.contains(ProgramFeatures::SRC_COLORKEY) {
            let loc = locate(gl, id, "uSrcClr")?;
            gl.uniform_4f(loc, [0.0; 4]);
            self.src_clr = Some(loc);
        }
        Ok(())
    }
}

fn locate<G: GlBackend>(
    gl: &mut G,
    program: ProgramId,
    name: &'static str,
) -> Result<UniformLocation, GlError> {
    gl.uniform_location(program, name)
        .ok_or_else(|| GlError::Link(format!("uniform {name} not found")))
}

/// Programs by [`ProgramKey`]. A combination that failed to build is remembered as `None` so it
/// is not recompiled on every frame.
#[derive(Debug, Default)]
pub struct ProgramManager {
    programs: HashMap<ProgramKey, Option<VhwaProgram>>,
}

impl ProgramManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes `features` for a source of format `from`; `None` when no program is needed.
    pub fn key_for(features: ProgramFeatures, from: &ColorFormat) -> Option<ProgramKey> {
        let mut features = features & ProgramFeatures::all();
        let fourcc = from.fourcc_code();
        features.set(ProgramFeatures::COLORCONV, fourcc != 0);
        if !features.intersects(ProgramFeatures::DST_COLORKEY | ProgramFeatures::SRC_COLORKEY) {
            features.remove(ProgramFeatures::COLORKEY_NODISCARD);
        }
        (!features.is_empty()).then_some(ProgramKey { features, fourcc })
    }

    /// Looks up or builds the program for `features` drawing from `from`. Returns `None` if no
    /// program is needed or it cannot be built; callers then draw without one.
    pub fn get<G: GlBackend>(
        &mut self,
        gl: &mut G,
        features: ProgramFeatures,
        from: &ColorFormat,
    ) -> Option<ProgramKey> {
        let key = Self::key_for(features, from)?;
        let entry = self.programs.entry(key).or_insert_with(|| {
            match VhwaProgram::create(gl, key.features, key.fourcc) {
                Ok(program) => {
                    tracing::debug!(
                        features = key.features.bits(),
                        fourcc = %fourcc_name(key.fourcc),
                        "compiled overlay program"
                    );
                    Some(program)
                }
                Err(err) => {
                    tracing::warn!(
                        features = key.features.bits(),
                        fourcc = %fourcc_name(key.fourcc),
                        %err,
                        "overlay program unavailable, drawing without it"
                    );
                    None
                }
            }
        });
        entry.as_ref().map(|_| key)
    }

    pub fn program(&self, key: ProgramKey) -> Option<&VhwaProgram> {
        self.programs.get(&key)?.as_ref()
    }

    pub fn program_mut(&mut self, key: ProgramKey) -> Option<&mut VhwaProgram> {
        self.programs.get_mut(&key)?.as_mut()
    }

    pub fn start<G: GlBackend>(&self, gl: &mut G, key: ProgramKey) {
        if let Some(program) = self.program(key) {
            gl.use_program(Some(program.id));
        }
    }

    pub fn stop<G: GlBackend>(&self, gl: &mut G) {
        gl.use_program(None);
    }

    pub fn delete_all<G: GlBackend>(&mut self, gl: &mut G) {
        for program in self.programs.drain().filter_map(|(_, p)| p) {
            gl.delete_program(program.id);
        }
    }
}
