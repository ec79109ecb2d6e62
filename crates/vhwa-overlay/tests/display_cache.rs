mod common;

use common::{create, image_with_vram, overlay_desc, primary_desc};
use vhwa_overlay::program::ProgramManager;
use vhwa_overlay::texture::ImageFlags;
use vhwa_overlay::texture_image::{DisplayParams, TexturedImage};
use vhwa_overlay::{ColorFormat, ColorKey, GlCaps, Rect, RecordingGl};
use vhwa_protocol::fourcc::FOURCC_UYVY;
use vhwa_protocol::vhwa_cmd::{
    ColorKeyDesc, OverlayFx, RectL, SurfOverlaySetPosition, SurfOverlayUpdate,
};
use vhwa_protocol::vhwa_flags::{OverlayFlags, VHWA_OFFSET64_VOID};
use vhwa_protocol::VhwaCommand;

fn keyed_update(src: u64, dst: u64, key: u32) -> VhwaCommand {
    VhwaCommand::SurfOverlayUpdate(SurfOverlayUpdate {
        dst_handle: dst,
        dst_offset: VHWA_OFFSET64_VOID,
        dst_rect: RectL::new(64, 64, 192, 160),
        src_handle: src,
        src_offset: VHWA_OFFSET64_VOID,
        src_rect: RectL::new(0, 0, 128, 96),
        flags: OverlayFlags::SHOW | OverlayFlags::KEYDESTOVERRIDE,
        updated_src_mem: None,
        fx: OverlayFx {
            dst_ck: ColorKeyDesc {
                low: key,
                high: key,
            },
            ..Default::default()
        },
    })
}

#[test]
fn key_value_changes_reuse_the_compiled_display() {
    let (mut image, _vram) = image_with_vram();
    let viewport = Rect::from_size(640, 480);
    let primary = create(&mut image, &primary_desc());
    let overlay = create(
        &mut image,
        &overlay_desc(FOURCC_UYVY, 128, 96, 0, VHWA_OFFSET64_VOID),
    );

    image.execute(&keyed_update(overlay, primary, 0x00ff_00ff)).unwrap();
    image.update_viewport(viewport);
    let compiled = image.gl().display_compilations();

    // Same geometry, same keying mode, different key value.
    image.execute(&keyed_update(overlay, primary, 0x0000_ff00)).unwrap();
    image.update_viewport(viewport);
    assert_eq!(image.gl().display_compilations(), compiled);

    // Moving the overlay changes the draw geometry.
    image
        .execute(&VhwaCommand::SurfOverlaySetPosition(SurfOverlaySetPosition {
            dst_handle: primary,
            dst_offset: VHWA_OFFSET64_VOID,
            src_handle: overlay,
            src_offset: VHWA_OFFSET64_VOID,
            x: 10,
            y: 20,
            flags: 0,
        }))
        .unwrap();
    image.update_viewport(viewport);
    assert_eq!(image.gl().display_compilations(), compiled + 1);
}

#[test]
fn unchanged_viewport_compiles_nothing() {
    let (mut image, _vram) = image_with_vram();
    let viewport = Rect::from_size(640, 480);
    create(&mut image, &primary_desc());
    image.update_viewport(viewport);
    let compiled = image.gl().display_compilations();
    image.update_viewport(viewport);
    image.update_viewport(viewport);
    assert_eq!(image.gl().display_compilations(), compiled);
}

struct Cache {
    gl: RecordingGl,
    programs: ProgramManager,
    primary: TexturedImage,
    other: TexturedImage,
    overlay: TexturedImage,
}

impl Cache {
    fn new() -> Self {
        let mut gl = RecordingGl::new();
        let mut ready = |w, h| {
            let mut img = TexturedImage::new(
                Rect::from_size(w, h),
                ColorFormat::rgb32(),
                ImageFlags::empty(),
                &GlCaps::full(),
            );
            let mem = vec![0u8; img.mem_size()];
            img.init(&mut gl, &mem).unwrap();
            img
        };
        let primary = ready(64, 64);
        let other = ready(64, 64);
        let overlay = ready(32, 32);
        Self {
            gl,
            programs: ProgramManager::new(),
            primary,
            other,
            overlay,
        }
    }

    fn base(&self) -> DisplayParams {
        DisplayParams {
            dst: Some(self.primary.binding()),
            dst_rect: Rect::new(8, 8, 32, 32),
            src_rect: Rect::from_size(32, 32),
            ..DisplayParams::default()
        }
    }

    /// Applies `params` and returns how many display lists that compiled.
    fn apply(&mut self, params: DisplayParams) -> usize {
        let before = self.gl.display_compilations();
        self.overlay
            .init_display(&mut self.gl, &mut self.programs, params)
            .unwrap();
        self.gl.display_compilations() - before
    }

    /// Compiles `from`, then reports the compilations switching to `to` costs.
    fn switch(from: impl Fn(&Cache) -> DisplayParams, to: impl Fn(&Cache) -> DisplayParams) -> usize {
        let mut cache = Cache::new();
        let first = from(&cache);
        assert_eq!(cache.apply(first.clone()), 1);
        assert_eq!(cache.apply(first), 0);
        let second = to(&cache);
        cache.apply(second)
    }
}

#[test]
fn destination_identity_recompiles_once() {
    let n = Cache::switch(Cache::base, |c| DisplayParams {
        dst: Some(c.other.binding()),
        ..c.base()
    });
    assert_eq!(n, 1);
}

#[test]
fn destination_rect_recompiles_once() {
    let n = Cache::switch(Cache::base, |c| DisplayParams {
        dst_rect: Rect::new(0, 0, 32, 32),
        ..c.base()
    });
    assert_eq!(n, 1);
}

#[test]
fn source_rect_recompiles_once() {
    let n = Cache::switch(Cache::base, |c| DisplayParams {
        src_rect: Rect::new(0, 0, 16, 16),
        ..c.base()
    });
    assert_eq!(n, 1);
}

#[test]
fn destination_key_presence_recompiles_once() {
    let n = Cache::switch(Cache::base, |c| DisplayParams {
        dst_ckey: Some(ColorKey::new(0xff00ff, 0xff00ff)),
        ..c.base()
    });
    assert_eq!(n, 1);
}

#[test]
fn source_key_presence_recompiles_once() {
    let n = Cache::switch(Cache::base, |c| DisplayParams {
        src_ckey: Some(ColorKey::new(0x10, 0x10)),
        ..c.base()
    });
    assert_eq!(n, 1);
}

#[test]
fn not_intersected_recompiles_once() {
    let n = Cache::switch(Cache::base, |c| DisplayParams {
        not_intersected: true,
        ..c.base()
    });
    assert_eq!(n, 1);
}

#[test]
fn program_change_recompiles_once() {
    // With a destination key, coverage picks the no-discard program variant.
    let keyed = |c: &Cache| DisplayParams {
        dst_ckey: Some(ColorKey::new(0xff00ff, 0xff00ff)),
        ..c.base()
    };
    let n = Cache::switch(keyed, |c| DisplayParams {
        not_intersected: true,
        ..keyed(c)
    });
    assert_eq!(n, 1);
}

#[test]
fn key_values_alone_compile_nothing() {
    let keyed = |c: &Cache| DisplayParams {
        dst_ckey: Some(ColorKey::new(0xff00ff, 0xff00ff)),
        src_ckey: Some(ColorKey::new(0x10, 0x10)),
        ..c.base()
    };
    let n = Cache::switch(keyed, |c| DisplayParams {
        dst_ckey: Some(ColorKey::new(0x00ff00, 0x00ff00)),
        src_ckey: Some(ColorKey::new(0x20, 0x20)),
        ..c.base()
    });
    assert_eq!(n, 0);
}
